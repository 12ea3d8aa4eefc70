//! Errors raised while composing a task's environment or running its
//! command.

/// Result alias for `same-executor` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors the executor can raise.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The command's argv[0] could not be found, neither as an absolute
    /// path nor on the resolved `PATH`.
    #[error("executable '{0}' not found on PATH")]
    ExecutableNotFound(String),

    /// A PTY could not be allocated and no pipe fallback was possible.
    #[error("failed to allocate pty: {0}")]
    PtyAllocationFailed(String),

    /// The child process could not be spawned.
    #[error("failed to spawn task command: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// Waiting on the child process failed.
    #[error("failed to wait on task process: {0}")]
    WaitFailed(String),

    /// The task's command exited with a non-zero status.
    #[error("task exited with status {exit_code}")]
    TaskExecutionFailed {
        /// The process exit code, or a sentinel when the process was
        /// terminated by a signal and no code is available.
        exit_code: i32,
    },

    /// A PTY resize request carried out-of-range dimensions.
    #[error("pty resize dimensions out of range: {0}")]
    InvalidResize(String),
}
