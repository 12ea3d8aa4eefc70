//! The CLI's own aggregate error type and its exit-code mapping (spec §7),
//! mirroring the teacher's `cli::{CliError, exit_code_for}` split but
//! without its `miette` diagnostics layer: plain config/graph/store/
//! executor/scheduler/wire/daemon errors all get a `thiserror` message and
//! the same exit code, since this crate has no source-span to render.

/// Result alias for the `same` binary's top-level operations.
pub type Result<T> = std::result::Result<T, CliError>;

/// Every failure `same`'s `main` can observe, aggregated from each
/// downstream crate's own error type via `#[from]`.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// The task graph could not be built or fingerprinted.
    #[error(transparent)]
    Core(#[from] same_core::Error),

    /// The build-info store could not be read or written.
    #[error(transparent)]
    Store(#[from] same_store::Error),

    /// A task's command failed to compose its environment or spawn.
    #[error(transparent)]
    Executor(#[from] same_executor::Error),

    /// The `--no-daemon` scheduler reported a build failure or cancellation.
    #[error(transparent)]
    Scheduler(#[from] same_scheduler::Error),

    /// Wire protocol framing or transport failure talking to the daemon.
    #[error(transparent)]
    Wire(#[from] same_wire::Error),

    /// The daemon itself (in `same daemon serve`, or an RPC it rejected)
    /// reported a failure.
    #[error(transparent)]
    Daemon(#[from] same_daemon::Error),

    /// No workspace root could be determined, or a target named on the
    /// command line does not exist in the loaded graph.
    #[error("{0}")]
    Usage(String),

    /// The daemon could not be reached or spawned within the connect
    /// budget (spec §4.10).
    #[error("failed to connect to the same daemon: {0}")]
    DaemonSpawnFailed(String),

    /// A filesystem or subprocess operation outside any downstream crate's
    /// own error type failed (spawning the detached daemon, writing its
    /// log file, etc).
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Maps every [`CliError`] variant to a process exit code (spec §7): `0` on
/// success is handled by the caller not constructing a `CliError` at all;
/// every variant here is already a failure, so this only ever returns `1`.
/// Kept as its own function, rather than inlined at the call site, so the
/// mapping has one place to grow if `same` ever needs a richer exit-code
/// scheme than the teacher's 3-tier `EXIT_CLI`/`EXIT_EVAL` split.
#[must_use]
pub fn exit_code_for(_err: &CliError) -> i32 {
    1
}
