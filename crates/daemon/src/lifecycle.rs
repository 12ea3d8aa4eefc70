//! Idle-timeout watchdog with activity reset and an explicit shutdown
//! channel (spec §4.8).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Default idle timeout: 3 hours.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10_800);

/// Owns the daemon's single reset-able idle timer. All state accesses are
/// mutex-guarded; the shutdown signal is a [`CancellationToken`] so every
/// long-running loop in the daemon (accept loop, rehash worker, watcher)
/// can `select!` on it directly.
pub struct DaemonLifecycle {
    idle_timeout: Duration,
    start: Instant,
    last_activity: Mutex<Instant>,
    shutdown: CancellationToken,
}

impl DaemonLifecycle {
    /// Builds a lifecycle with the given idle timeout, starting its clock
    /// now.
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            idle_timeout,
            start: now,
            last_activity: Mutex::new(now),
            shutdown: CancellationToken::new(),
        }
    }

    /// Resets the idle timer. Called on every RPC entry before dispatch.
    pub fn reset_timer(&self) {
        *self.last_activity.lock().expect("lifecycle mutex poisoned") = Instant::now();
    }

    /// Schedules termination. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("daemon lifecycle: shutdown requested");
        }
        self.shutdown.cancel();
    }

    /// A token that becomes cancelled exactly when the daemon should
    /// terminate, whether by explicit [`DaemonLifecycle::shutdown`] or by
    /// idle timeout.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wall-clock time since the daemon started.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time elapsed since the idle timer was last reset.
    #[must_use]
    pub fn since_last_activity(&self) -> Duration {
        self.last_activity.lock().expect("lifecycle mutex poisoned").elapsed()
    }

    /// Time remaining before the idle timeout fires, zero if already
    /// elapsed.
    #[must_use]
    pub fn idle_remaining(&self) -> Duration {
        self.idle_timeout.saturating_sub(self.since_last_activity())
    }

    /// Runs the idle watchdog until it either times out (calling
    /// [`DaemonLifecycle::shutdown`] itself) or the shutdown token fires
    /// for some other reason. Intended to be spawned as its own task
    /// alongside the accept loop.
    pub async fn watch_idle(&self) {
        loop {
            let remaining = self.idle_remaining();
            if remaining.is_zero() {
                info!(uptime_secs = self.uptime().as_secs(), "daemon idle timeout reached");
                self.shutdown();
                return;
            }
            tokio::select! {
                () = tokio::time::sleep(remaining) => {
                    // Activity may have reset the timer while we slept;
                    // loop around and re-check rather than assuming timeout.
                }
                () = self.shutdown.cancelled() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_timer_extends_idle_remaining() {
        let lifecycle = DaemonLifecycle::new(Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(30));
        lifecycle.reset_timer();
        assert!(lifecycle.idle_remaining() > Duration::from_millis(30));
    }

    #[test]
    fn shutdown_is_idempotent_and_cancels_token() {
        let lifecycle = DaemonLifecycle::new(Duration::from_secs(1));
        let token = lifecycle.shutdown_token();
        assert!(!token.is_cancelled());
        lifecycle.shutdown();
        lifecycle.shutdown();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn watch_idle_fires_after_timeout() {
        let lifecycle = DaemonLifecycle::new(Duration::from_millis(20));
        let token = lifecycle.shutdown_token();
        lifecycle.watch_idle().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn watch_idle_returns_immediately_on_explicit_shutdown() {
        let lifecycle = DaemonLifecycle::new(Duration::from_secs(3600));
        lifecycle.shutdown();
        tokio::time::timeout(Duration::from_millis(100), lifecycle.watch_idle())
            .await
            .expect("watch_idle should return promptly after explicit shutdown");
    }
}
