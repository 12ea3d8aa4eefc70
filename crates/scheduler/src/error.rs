//! Errors raised by the scheduler.

/// Result alias for `same-scheduler` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors the scheduler can raise.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One or more required tasks failed or were skipped as a result.
    /// Carries the names of the tasks that actually failed (not their
    /// cascaded dependents).
    #[error("build failed: {0:?}")]
    BuildExecutionFailed(Vec<String>),

    /// A task's inputs could not be resolved or hashed.
    #[error("failed to resolve inputs for task '{task}': {source}")]
    InputResolutionFailed {
        /// The task whose inputs failed to resolve.
        task: String,
        /// Underlying core error.
        #[source]
        source: same_core::Error,
    },

    /// The build-info store could not be read or written.
    #[error(transparent)]
    Store(#[from] same_store::Error),

    /// A task's command failed to execute.
    #[error(transparent)]
    Executor(#[from] same_executor::Error),

    /// The run was cancelled before completion.
    #[error("run cancelled")]
    Cancelled,
}
