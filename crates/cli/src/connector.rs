//! Connect-or-spawn (spec §4.10), grounded on the teacher's
//! `coordinator::discovery` module: dial the socket and `Ping`; if that
//! fails, spawn a detached `same daemon serve` and poll until it answers.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use same_daemon::paths;
use same_wire::{MessageType, WireMessage};

use crate::error::CliError;

/// Poll interval while waiting for a freshly spawned daemon to come up.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Total budget for a freshly spawned daemon to start answering `Ping`.
const CONNECT_BUDGET: Duration = Duration::from_secs(5);

/// Opens a fresh connection to the workspace's daemon, dial-or-spawn.
///
/// # Errors
///
/// Returns [`CliError::DaemonSpawnFailed`] if no daemon answers a `Ping`
/// within the connect budget, even after spawning one.
pub async fn connect(root: &Path) -> Result<UnixStream, CliError> {
    let socket_path = paths::socket_path(root);

    if let Ok(stream) = try_ping(&socket_path).await {
        return Ok(stream);
    }

    clean_stale_files(root);

    spawn_daemon(root).await?;

    let deadline = tokio::time::Instant::now() + CONNECT_BUDGET;
    while tokio::time::Instant::now() < deadline {
        if let Ok(stream) = try_ping(&socket_path).await {
            return Ok(stream);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    Err(CliError::DaemonSpawnFailed(format!(
        "no daemon answered on {} within {CONNECT_BUDGET:?}",
        socket_path.display()
    )))
}

async fn try_ping(socket_path: &Path) -> std::io::Result<UnixStream> {
    let mut stream = UnixStream::connect(socket_path).await?;
    WireMessage::ping()
        .write_to(&mut stream)
        .await
        .map_err(std::io::Error::other)?;
    let reply = WireMessage::read_from(&mut stream).await.map_err(std::io::Error::other)?;
    if reply.msg_type == MessageType::Pong {
        Ok(stream)
    } else {
        Err(std::io::Error::other("unexpected reply to Ping"))
    }
}

/// Spawns a detached `same daemon serve` for `root`, with its own session
/// and its stdout/stderr appended to `<root>/.same/daemon/daemon.log`.
async fn spawn_daemon(root: &Path) -> Result<(), CliError> {
    let dir = paths::daemon_dir(root);
    std::fs::create_dir_all(&dir)?;

    let log_path = paths::log_path(root);
    let log_file = open_log_file(&log_path)?;

    let exe = std::env::current_exe()?;
    let correlation = Uuid::new_v4();
    debug!(%correlation, exe = %exe.display(), root = %root.display(), "spawning detached daemon");

    let mut command = Command::new(&exe);
    command
        .arg("--root")
        .arg(root)
        .arg("daemon")
        .arg("serve")
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file.try_clone()?))
        .stderr(Stdio::from(log_file));
    detach_session(&mut command);

    let child = command.spawn()?;
    info!(pid = child.id(), "daemon spawned");
    // We intentionally do not wait on the child; it outlives this process.
    drop(child);
    Ok(())
}

#[cfg(unix)]
fn detach_session(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: setsid() is async-signal-safe and takes no arguments; called
    // only in the post-fork child before exec, per `CommandExt::pre_exec`'s
    // contract.
    unsafe {
        command.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn detach_session(_command: &mut Command) {}

#[cfg(unix)]
fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new().create(true).append(true).mode(0o600).open(path)
}

#[cfg(not(unix))]
fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

/// A failed `Ping` can mean the daemon crashed without cleaning up after
/// itself. `Daemon::run` already unlinks the socket on its own next start,
/// but the PID file lingers, so a subsequent `same daemon` status/cleanup
/// command would misreport a dead daemon as running. Removes `daemon.pid`
/// when the recorded PID either is gone or was reused by an unrelated
/// process, mirroring the teacher's `discovery` module stale-PID sweep.
fn clean_stale_files(root: &Path) {
    let Some(pid) = read_stale_pid(root) else { return };
    if !is_same_daemon_process(pid) {
        let pid_path = paths::pid_path(root);
        debug!(pid, path = %pid_path.display(), "removing stale daemon.pid");
        let _ = std::fs::remove_file(&pid_path);
    }
}

/// Returns the stale PID's cmdline-verified liveness, mirroring the
/// teacher's `is_cuenv_process`: before trusting a PID recorded in
/// `daemon.pid`, confirm it is actually a `same daemon` process and not an
/// unrelated one that happened to reuse the PID.
#[cfg(target_os = "linux")]
#[must_use]
pub fn is_same_daemon_process(pid: i32) -> bool {
    let cmdline_path = format!("/proc/{pid}/cmdline");
    std::fs::read_to_string(cmdline_path).is_ok_and(|cmdline| cmdline.contains("same") && cmdline.contains("daemon"))
}

#[cfg(target_os = "macos")]
#[must_use]
pub fn is_same_daemon_process(pid: i32) -> bool {
    std::process::Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "command="])
        .output()
        .ok()
        .is_some_and(|output| {
            let cmd = String::from_utf8_lossy(&output.stdout);
            cmd.contains("same") && cmd.contains("daemon")
        })
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
#[must_use]
pub fn is_same_daemon_process(_pid: i32) -> bool {
    true
}

/// Reads the PID recorded in `<root>/.same/daemon/daemon.pid`, if any,
/// without checking whether it is still alive or still a `same daemon`
/// process — callers pair this with [`is_same_daemon_process`] for that.
#[must_use]
pub fn read_stale_pid(root: &Path) -> Option<i32> {
    let pid_path = paths::pid_path(root);
    let raw = std::fs::read_to_string(pid_path).ok()?;
    raw.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn is_same_daemon_process_is_false_for_an_unrelated_pid() {
        assert!(!is_same_daemon_process(1));
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    #[test]
    fn clean_stale_files_removes_a_pid_file_for_an_unrelated_process() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(paths::daemon_dir(dir.path())).unwrap();
        std::fs::write(paths::pid_path(dir.path()), "1").unwrap();

        clean_stale_files(dir.path());

        assert_eq!(read_stale_pid(dir.path()), None);
    }

    #[test]
    fn clean_stale_files_is_a_noop_without_a_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        clean_stale_files(dir.path());
        assert_eq!(read_stale_pid(dir.path()), None);
    }

    #[test]
    fn read_stale_pid_returns_none_without_a_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_stale_pid(dir.path()), None);
    }
}
