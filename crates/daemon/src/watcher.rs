//! Recursive filesystem watcher and change debouncer (spec §4.6).
//!
//! Grounded on `turbo-tasks-fs`'s `recommended_watcher` + `RecursiveMode::Recursive`
//! setup: a std-threaded `notify` watcher feeding a channel that an async
//! consumer drains. Here the consumer is a bounded, lossy `tokio::mpsc`
//! channel rather than a raw `std::sync::mpsc`, since the daemon's
//! downstream (the debouncer) is async.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Directory names skipped entirely; no event whose path contains one of
/// these components is forwarded.
const SKIPPED_COMPONENTS: &[&str] = &[".git", ".jj", "node_modules"];

/// Depth of the channel between the notify callback (sync) and the async
/// debouncer. Bounded and lossy: a burst that outruns the consumer drops
/// the oldest overflow rather than blocking the watcher thread or growing
/// without limit, since the debounce window will ask for a full rehash of
/// the affected paths regardless of how many individual events landed.
const EVENT_CHANNEL_DEPTH: usize = 100;

/// The debouncer's default quiet window (spec §4.6).
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(50);

/// One filesystem change relevant to the daemon: a path that was created,
/// modified, or removed.
#[derive(Debug, Clone)]
pub struct FsEvent {
    /// The affected path.
    pub path: PathBuf,
}

fn is_skipped(path: &Path) -> bool {
    path.components()
        .any(|component| SKIPPED_COMPONENTS.contains(&component.as_os_str().to_string_lossy().as_ref()))
}

/// A live recursive watch on a workspace root. Dropping this stops the
/// watch; the underlying `notify::RecommendedWatcher` is kept alive for
/// exactly that purpose even though its handle is never read again.
pub struct Watcher {
    _inner: RecommendedWatcher,
    events: mpsc::Receiver<FsEvent>,
}

impl Watcher {
    /// Starts watching `root` recursively, filtering out
    /// `.git`/`.jj`/`node_modules` subtrees.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WatcherStartFailed`] if the underlying OS watch
    /// cannot be installed.
    pub fn start(root: &Path) -> Result<Self> {
        let (raw_tx, mut raw_rx) = std::sync::mpsc::channel();
        let mut inner = recommended_watcher(raw_tx)
            .map_err(|source| Error::WatcherStartFailed(source.to_string()))?;
        inner
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| Error::WatcherStartFailed(source.to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        std::thread::spawn(move || {
            while let Ok(result) = raw_rx.recv() {
                forward(result, &tx);
            }
        });

        Ok(Self { _inner: inner, events: rx })
    }

    /// Receives the next relevant filesystem event, awaiting one if none
    /// is immediately available. Returns `None` once the watcher thread
    /// has exited (the watch was dropped or the OS backend died).
    pub async fn recv(&mut self) -> Option<FsEvent> {
        self.events.recv().await
    }
}

fn forward(result: notify::Result<Event>, tx: &mpsc::Sender<FsEvent>) {
    let event = match result {
        Ok(event) => event,
        Err(source) => {
            warn!(%source, "filesystem watch error");
            return;
        }
    };
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
        return;
    }
    for path in event.paths {
        if is_skipped(&path) {
            continue;
        }
        if tx.try_send(FsEvent { path }).is_err() {
            debug!("filesystem event channel full or closed, dropping event");
        }
    }
}

/// Collapses a burst of [`FsEvent`]s into a single flush after a quiet
/// window, so that e.g. an editor's save-via-rename (remove + create)
/// triggers one rehash instead of two.
///
/// The window resets on every path added; it only elapses once `window`
/// passes with nothing new arriving, per spec §4.6. Intended to be driven
/// by a loop that calls [`Debouncer::add`] as events arrive and
/// [`Debouncer::tick`] to find out when to flush.
pub struct Debouncer {
    window: Duration,
    pending: Vec<PathBuf>,
    deadline: Option<Instant>,
}

impl Debouncer {
    /// Builds a debouncer with the given quiet window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window, pending: Vec::new(), deadline: None }
    }

    /// Adds a path to the pending batch, strictly resetting the flush
    /// deadline.
    pub fn add(&mut self, path: PathBuf) {
        self.pending.push(path);
        self.deadline = Some(Instant::now() + self.window);
    }

    /// Waits until the debounce window elapses with no further [`Debouncer::add`]
    /// calls, then returns the accumulated batch, clearing it. If nothing
    /// is pending, waits forever (callers should race this against their
    /// own event source in a `select!`).
    pub async fn flush(&mut self) -> Vec<PathBuf> {
        loop {
            match self.deadline {
                None => std::future::pending::<()>().await,
                Some(deadline) => {
                    tokio::time::sleep_until(deadline).await;
                    if self.deadline == Some(deadline) {
                        self.deadline = None;
                        return std::mem::take(&mut self.pending);
                    }
                    // `add` moved the deadline further out while we slept;
                    // loop and wait for the new one.
                }
            }
        }
    }

    /// Immediately returns and clears the pending batch without waiting
    /// out the window, used on shutdown to flush whatever was captured.
    pub fn drain(&mut self) -> Vec<PathBuf> {
        self.deadline = None;
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_git_and_node_modules_subtrees() {
        assert!(is_skipped(Path::new("/workspace/.git/HEAD")));
        assert!(is_skipped(Path::new("/workspace/.jj/repo")));
        assert!(is_skipped(Path::new("/workspace/web/node_modules/pkg/index.js")));
        assert!(!is_skipped(Path::new("/workspace/src/main.rs")));
    }

    #[tokio::test]
    async fn flush_waits_out_the_full_window_after_last_add() {
        let mut debouncer = Debouncer::new(Duration::from_millis(20));
        debouncer.add(PathBuf::from("/workspace/a"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        debouncer.add(PathBuf::from("/workspace/b"));

        let batch = tokio::time::timeout(Duration::from_millis(100), debouncer.flush())
            .await
            .expect("flush should complete once the window elapses");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn drain_returns_and_clears_pending_without_waiting() {
        let mut debouncer = Debouncer::new(Duration::from_secs(3600));
        debouncer.add(PathBuf::from("/workspace/a"));
        let batch = debouncer.drain();
        assert_eq!(batch, vec![PathBuf::from("/workspace/a")]);
        assert!(debouncer.drain().is_empty());
    }
}
