//! PTY-backed (falling back to pipes) process execution (spec §4.4).

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tracing::{debug, warn};

use crate::environment::compose;
use crate::error::{Error, Result};

/// How the task's PTY should be sized on launch. Callers may resize later
/// via [`TaskHandle::resize`].
#[derive(Debug, Clone, Copy)]
pub struct PtyDimensions {
    /// Terminal rows.
    pub rows: u16,
    /// Terminal columns.
    pub cols: u16,
}

impl Default for PtyDimensions {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// A fully resolved, ready-to-spawn task invocation.
#[derive(Debug, Clone)]
pub struct TaskCommand {
    /// argv, `command[0]` already resolved against the composed `PATH`.
    pub argv: Vec<String>,
    /// Environment, already composed per spec §4.4.
    pub env: Vec<(String, String)>,
    /// Working directory for the child process.
    pub working_dir: PathBuf,
}

impl TaskCommand {
    /// Builds a [`TaskCommand`] by composing the task's environment from
    /// the resolved tool environment and the task's literal overrides.
    #[must_use]
    pub fn new(
        argv: Vec<String>,
        tool_env: &[(String, String)],
        task_env: &BTreeMap<String, String>,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            argv,
            env: compose(tool_env, task_env),
            working_dir,
        }
    }

    /// Builds a [`TaskCommand`] from an already-resolved `argv[0]` and an
    /// already-composed environment, skipping [`compose`] entirely.
    ///
    /// Used by the daemon's `ExecuteTask` RPC handler: the client resolves
    /// the executable and composes the environment locally (so it reflects
    /// the client's own system environment, not the daemon's), and sends
    /// the result over the wire for the daemon to spawn verbatim.
    #[must_use]
    pub fn prepared(argv: Vec<String>, env: Vec<(String, String)>, working_dir: PathBuf) -> Self {
        Self { argv, env, working_dir }
    }
}

/// A spawned task's handle: callers read output via the `Write` sink they
/// supplied to [`spawn`], then call [`TaskHandle::wait`].
pub struct TaskHandle {
    child: Box<dyn portable_pty::Child + Send + Sync>,
    controller: Option<Box<dyn portable_pty::MasterPty + Send>>,
    copy_thread: Option<std::thread::JoinHandle<()>>,
}

impl TaskHandle {
    /// Blocks until the child process and the output-copy thread have both
    /// completed, returning its exit code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WaitFailed`] if the underlying wait call fails, or
    /// [`Error::TaskExecutionFailed`] if the process exited with a
    /// non-zero status.
    pub fn wait(mut self) -> Result<()> {
        let status = self
            .child
            .wait()
            .map_err(|source| Error::WaitFailed(source.to_string()))?;
        if let Some(thread) = self.copy_thread.take() {
            let _ = thread.join();
        }
        let exit_code = status.exit_code() as i32;
        if !status.success() {
            return Err(Error::TaskExecutionFailed { exit_code });
        }
        Ok(())
    }

    /// Resizes the PTY, if one was allocated (a no-op under the pipe
    /// fallback).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidResize`] if the resize call fails.
    pub fn resize(&self, dims: PtyDimensions) -> Result<()> {
        let Some(controller) = &self.controller else {
            return Ok(());
        };
        controller
            .resize(PtySize {
                rows: dims.rows,
                cols: dims.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| Error::InvalidResize(err.to_string()))
    }
}

/// Spawns `command` under a PTY sized to `dims`, copying its output to
/// `output_sink` as it is produced. stdout and stderr are merged
/// intentionally: a PTY has a single output stream by design, and the
/// pipe fallback preserves that merge for parity (spec §9 open question).
///
/// Falls back to a plain piped child process if PTY allocation fails on
/// this platform.
///
/// # Errors
///
/// Returns [`Error::SpawnFailed`] if the child process itself could not be
/// started.
pub fn spawn(
    command: &TaskCommand,
    dims: PtyDimensions,
    output_sink: Arc<Mutex<dyn Write + Send>>,
) -> Result<TaskHandle> {
    match spawn_pty(command, dims, Arc::clone(&output_sink)) {
        Ok(handle) => Ok(handle),
        Err(err) => {
            warn!(error = %err, "pty allocation failed, falling back to pipes");
            spawn_piped(command, output_sink)
        }
    }
}

fn build_command(command: &TaskCommand) -> CommandBuilder {
    let mut builder = CommandBuilder::new(&command.argv[0]);
    builder.args(&command.argv[1..]);
    builder.cwd(&command.working_dir);
    builder.env_clear();
    for (key, value) in &command.env {
        builder.env(key, value);
    }
    builder
}

fn spawn_pty(
    command: &TaskCommand,
    dims: PtyDimensions,
    output_sink: Arc<Mutex<dyn Write + Send>>,
) -> Result<TaskHandle> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: dims.rows,
            cols: dims.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|err| Error::PtyAllocationFailed(err.to_string()))?;

    let builder = build_command(command);
    let child = pair
        .slave
        .spawn_command(builder)
        .map_err(|err| Error::PtyAllocationFailed(err.to_string()))?;
    drop(pair.slave);

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|err| Error::PtyAllocationFailed(err.to_string()))?;

    let copy_thread = std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut sink = output_sink.lock().expect("output sink mutex poisoned");
                    if sink.write_all(&buf[..n]).is_err() {
                        break;
                    }
                    let _ = sink.flush();
                }
            }
        }
    });

    debug!("spawned task under pty");

    Ok(TaskHandle {
        child,
        controller: Some(pair.master),
        copy_thread: Some(copy_thread),
    })
}

fn spawn_piped(command: &TaskCommand, output_sink: Arc<Mutex<dyn Write + Send>>) -> Result<TaskHandle> {
    let mut std_command = std::process::Command::new(&command.argv[0]);
    std_command
        .args(&command.argv[1..])
        .current_dir(&command.working_dir)
        .env_clear()
        .envs(command.env.iter().cloned())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = std_command.spawn().map_err(Error::SpawnFailed)?;
    let mut stdout = child.stdout.take().expect("piped stdout");
    let mut stderr = child.stderr.take().expect("piped stderr");

    let sink_for_stdout = Arc::clone(&output_sink);
    let stdout_thread = std::thread::spawn(move || copy_to_sink(&mut stdout, &sink_for_stdout));
    let sink_for_stderr = Arc::clone(&output_sink);
    let stderr_thread = std::thread::spawn(move || copy_to_sink(&mut stderr, &sink_for_stderr));

    let copy_thread = std::thread::spawn(move || {
        let _ = stdout_thread.join();
        let _ = stderr_thread.join();
    });

    Ok(TaskHandle {
        child: Box::new(PipeChild { inner: child }),
        controller: None,
        copy_thread: Some(copy_thread),
    })
}

fn copy_to_sink(reader: &mut impl Read, sink: &Arc<Mutex<dyn Write + Send>>) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut sink = sink.lock().expect("output sink mutex poisoned");
                if sink.write_all(&buf[..n]).is_err() {
                    break;
                }
                let _ = sink.flush();
            }
        }
    }
}

/// Adapts `std::process::Child` to `portable_pty::Child` so the pipe
/// fallback path can share [`TaskHandle`]'s wait/resize API with the PTY
/// path.
struct PipeChild {
    inner: std::process::Child,
}

impl portable_pty::Child for PipeChild {
    fn try_wait(&mut self) -> std::io::Result<Option<portable_pty::ExitStatus>> {
        Ok(self
            .inner
            .try_wait()?
            .map(|status| portable_pty::ExitStatus::with_exit_code(status.code().unwrap_or(1) as u32)))
    }

    fn wait(&mut self) -> std::io::Result<portable_pty::ExitStatus> {
        let status = self.inner.wait()?;
        Ok(portable_pty::ExitStatus::with_exit_code(status.code().unwrap_or(1) as u32))
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.inner.kill()
    }

    fn process_id(&self) -> Option<u32> {
        Some(self.inner.id())
    }

    #[cfg(windows)]
    fn as_raw_handle(&self) -> Option<std::os::windows::io::RawHandle> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn piped_fallback_runs_a_command_and_captures_output() {
        let sink: Arc<Mutex<dyn Write + Send>> = Arc::new(Mutex::new(Cursor::new(Vec::<u8>::new())));
        let command = TaskCommand::new(
            vec!["echo".to_string(), "hello".to_string()],
            &[],
            &BTreeMap::new(),
            std::env::temp_dir(),
        );
        let handle = spawn_piped(&command, Arc::clone(&sink)).unwrap();
        handle.wait().unwrap();
    }

    #[test]
    fn nonzero_exit_is_surfaced() {
        let sink: Arc<Mutex<dyn Write + Send>> = Arc::new(Mutex::new(Cursor::new(Vec::<u8>::new())));
        let command = TaskCommand::new(
            vec!["false".to_string()],
            &[],
            &BTreeMap::new(),
            std::env::temp_dir(),
        );
        let handle = spawn_piped(&command, Arc::clone(&sink)).unwrap();
        let err = handle.wait().unwrap_err();
        assert!(matches!(err, Error::TaskExecutionFailed { .. }));
    }
}
