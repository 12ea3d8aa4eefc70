//! Hermetic task execution (spec §4.4): environment composition,
//! executable resolution, and PTY-backed process spawning.
//!
//! ```rust,no_run
//! use same_executor::{Executor, PtyDimensions};
//! use std::collections::BTreeMap;
//! use std::io::Cursor;
//! use std::sync::{Arc, Mutex};
//!
//! let executor = Executor::default();
//! let sink = Arc::new(Mutex::new(Cursor::new(Vec::<u8>::new())));
//! executor
//!     .execute(
//!         &["echo".to_string(), "hi".to_string()],
//!         &[],
//!         &BTreeMap::new(),
//!         std::env::current_dir().unwrap(),
//!         PtyDimensions::default(),
//!         sink,
//!     )
//!     .unwrap();
//! ```

pub mod environment;
pub mod error;
pub mod process;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub use crate::error::{Error, Result};
pub use crate::process::{PtyDimensions, TaskCommand, TaskHandle};

/// Runs task commands under a hermetic, composed environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct Executor;

impl Executor {
    /// Resolves `argv[0]`, composes the environment, and spawns the
    /// command under a PTY (or a pipe fallback), blocking until it exits.
    ///
    /// This is `Start` followed by `Wait` (spec §4.4); use
    /// [`Executor::start`] directly for callers that need to `Resize`
    /// mid-flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExecutableNotFound`], [`Error::SpawnFailed`], or
    /// [`Error::TaskExecutionFailed`].
    pub fn execute(
        &self,
        argv: &[String],
        tool_env: &[(String, String)],
        task_env: &BTreeMap<String, String>,
        working_dir: PathBuf,
        dims: PtyDimensions,
        output_sink: Arc<Mutex<dyn Write + Send>>,
    ) -> Result<()> {
        let handle = self.start(argv, tool_env, task_env, working_dir, dims, output_sink)?;
        handle.wait()
    }

    /// Resolves, composes, and spawns the command, returning a
    /// [`TaskHandle`] the caller can `resize` and must eventually `wait`
    /// on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExecutableNotFound`] or [`Error::SpawnFailed`].
    pub fn start(
        &self,
        argv: &[String],
        tool_env: &[(String, String)],
        task_env: &BTreeMap<String, String>,
        working_dir: PathBuf,
        dims: PtyDimensions,
        output_sink: Arc<Mutex<dyn Write + Send>>,
    ) -> Result<TaskHandle> {
        let composed_env = environment::compose(tool_env, task_env);
        let path = composed_env
            .iter()
            .find(|(key, _)| key == "PATH")
            .map(|(_, value)| value.as_str());

        let resolved_argv0 = environment::resolve_executable(&argv[0], path)
            .ok_or_else(|| Error::ExecutableNotFound(argv[0].clone()))?;

        let mut resolved_argv = argv.to_vec();
        resolved_argv[0] = resolved_argv0.to_string_lossy().into_owned();

        let command = TaskCommand::new(resolved_argv, tool_env, task_env, working_dir);
        process::spawn(&command, dims, output_sink)
    }

    /// Spawns an already-resolved, already-composed command directly,
    /// without running [`environment::compose`] or executable resolution
    /// again. Used by the daemon's `ExecuteTask` RPC handler, where the
    /// client performed both steps before sending the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SpawnFailed`].
    pub fn start_prepared(
        &self,
        argv: Vec<String>,
        env: Vec<(String, String)>,
        working_dir: PathBuf,
        dims: PtyDimensions,
        output_sink: Arc<Mutex<dyn Write + Send>>,
    ) -> Result<TaskHandle> {
        let command = TaskCommand::prepared(argv, env, working_dir);
        process::spawn(&command, dims, output_sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn executes_a_simple_command() {
        let executor = Executor;
        let sink: Arc<Mutex<dyn Write + Send>> = Arc::new(Mutex::new(Cursor::new(Vec::<u8>::new())));
        executor
            .execute(
                &["true".to_string()],
                &[],
                &BTreeMap::new(),
                std::env::temp_dir(),
                PtyDimensions::default(),
                sink,
            )
            .unwrap();
    }

    #[test]
    fn start_prepared_runs_without_recomposing_environment() {
        let executor = Executor;
        let sink: Arc<Mutex<dyn Write + Send>> = Arc::new(Mutex::new(Cursor::new(Vec::<u8>::new())));
        let handle = executor
            .start_prepared(
                vec!["true".to_string()],
                vec![],
                std::env::temp_dir(),
                PtyDimensions::default(),
                sink,
            )
            .unwrap();
        handle.wait().unwrap();
    }

    #[test]
    fn unknown_executable_is_reported() {
        let executor = Executor;
        let sink: Arc<Mutex<dyn Write + Send>> = Arc::new(Mutex::new(Cursor::new(Vec::<u8>::new())));
        let err = executor
            .execute(
                &["same-definitely-not-a-real-binary".to_string()],
                &[],
                &BTreeMap::new(),
                std::env::temp_dir(),
                PtyDimensions::default(),
                sink,
            )
            .unwrap_err();
        assert!(matches!(err, Error::ExecutableNotFound(_)));
    }
}
