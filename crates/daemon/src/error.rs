//! Errors raised by the daemon's lifecycle, caches, watcher, and RPC server.

/// Result alias for `same-daemon` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors the daemon can raise.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The Unix-domain socket could not be bound.
    #[error("failed to bind daemon socket at {path}: {source}")]
    SocketBindFailed {
        /// The socket path.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A filesystem operation under `<root>/.same/daemon/` failed.
    #[error("daemon filesystem operation on {path} failed: {source}")]
    Io {
        /// The path being operated on.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A workspace graph is requested but has never been cached and
    /// cannot be parsed (e.g. bad config).
    #[error(transparent)]
    Core(#[from] same_core::Error),

    /// A requested resolved environment was never populated and the
    /// daemon has no collaborator to materialize it out-of-band.
    #[error("environment '{0}' is not cached")]
    EnvironmentNotCached(String),

    /// Wire protocol framing or transport failure.
    #[error(transparent)]
    Wire(#[from] same_wire::Error),

    /// Task execution failed.
    #[error(transparent)]
    Executor(#[from] same_executor::Error),

    /// The filesystem watcher could not be started.
    #[error("failed to start filesystem watcher: {0}")]
    WatcherStartFailed(String),

    /// An RPC named a task that does not exist in the requested workspace's
    /// graph.
    #[error("task '{0}' not found")]
    TaskNotFound(String),

    /// A client request could not be parsed against the expected payload
    /// shape for its declared message type.
    #[error("malformed request: {0}")]
    MalformedRequest(String),
}
