//! File layout under `<root>/.same/daemon/` (spec §6).

use std::path::{Path, PathBuf};

/// The daemon's Unix-domain socket: `<root>/.same/daemon/daemon.sock`.
#[must_use]
pub fn socket_path(root: &Path) -> PathBuf {
    daemon_dir(root).join("daemon.sock")
}

/// The daemon's PID file: `<root>/.same/daemon/daemon.pid`.
#[must_use]
pub fn pid_path(root: &Path) -> PathBuf {
    daemon_dir(root).join("daemon.pid")
}

/// The daemon's append-only log file: `<root>/.same/daemon/daemon.log`.
#[must_use]
pub fn log_path(root: &Path) -> PathBuf {
    daemon_dir(root).join("daemon.log")
}

/// `<root>/.same/daemon/`, the directory holding the socket, PID file, and
/// log.
#[must_use]
pub fn daemon_dir(root: &Path) -> PathBuf {
    root.join(".same").join("daemon")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_rooted_under_dot_same_daemon() {
        let root = Path::new("/workspace");
        assert_eq!(socket_path(root), Path::new("/workspace/.same/daemon/daemon.sock"));
        assert_eq!(pid_path(root), Path::new("/workspace/.same/daemon/daemon.pid"));
        assert_eq!(log_path(root), Path::new("/workspace/.same/daemon/daemon.log"));
    }
}
