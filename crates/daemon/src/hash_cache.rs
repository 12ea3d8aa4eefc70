//! The server-side input-hash cache (spec §4.6).
//!
//! Distinct from [`same_core::build_info::BuildInfoStore`]: that store
//! records the hash the *last successful run* observed, on disk, one file
//! per task. This cache records the hash the daemon currently believes is
//! correct for a task's *present* filesystem state, in memory, keyed by
//! task identity and environment. A filesystem event invalidates the
//! relevant entries to [`HashState::Pending`] rather than recomputing
//! inline; a background [`crate::rehash::RehashWorker`] drains the pending
//! queue and recomputes off the hot path of any RPC.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Identifies one cached hash: a task, in a workspace, under a specific
/// resolved environment (two env maps that differ are different cache
/// entries even for the same task name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashCacheKey {
    /// Workspace root the task belongs to.
    pub root: PathBuf,
    /// The task's name.
    pub task_name: String,
    /// A digest of the resolved environment this hash was computed under.
    pub env_digest: u64,
}

impl HashCacheKey {
    /// Builds a key from a task name, root, and resolved environment,
    /// digesting the environment with [`env_digest`].
    #[must_use]
    pub fn new(root: PathBuf, task_name: String, environment: &[(String, String)]) -> Self {
        let env_digest = env_digest(environment);
        Self { root, task_name, env_digest }
    }
}

/// Order-independent digest of a resolved environment, used to distinguish
/// cache entries for the same task run under different tool environments.
#[must_use]
pub fn env_digest(environment: &[(String, String)]) -> u64 {
    let mut pairs: Vec<&(String, String)> = environment.iter().collect();
    pairs.sort();
    let mut hasher = DefaultHasher::new();
    for (key, value) in pairs {
        key.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    hasher.finish()
}

/// The externally observable state of one cache entry, distinct from the
/// wire protocol's [`same_wire::HashState`]; [`crate::server`] translates
/// between the two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashState {
    /// The hash is known and current.
    Ready(String),
    /// The hash is being recomputed; the last known value, if any, is no
    /// longer trustworthy.
    Pending,
    /// No entry exists for this key at all.
    Unknown,
}

struct Entry {
    state: EntryState,
    environment: Vec<(String, String)>,
    resolved_inputs: Vec<PathBuf>,
}

enum EntryState {
    Ready(String),
    Pending,
}

/// A task whose hash needs recomputation, carrying enough context
/// (environment snapshot) that the rehash worker does not need to consult
/// anything beyond the graph's task definitions.
#[derive(Debug, Clone)]
pub struct PendingRehash {
    /// The key to recompute.
    pub key: HashCacheKey,
    /// The environment snapshot in effect when this entry was last ready
    /// or first requested.
    pub environment: Vec<(String, String)>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<HashCacheKey, Entry>,
    /// Path -> keys whose resolved inputs include that path, for
    /// efficient invalidation on filesystem events.
    reverse: HashMap<PathBuf, HashSet<HashCacheKey>>,
    queue: VecDeque<PendingRehash>,
    queued_keys: HashSet<HashCacheKey>,
}

/// The daemon's in-memory, mutex-guarded input-hash cache.
#[derive(Default)]
pub struct HashCache {
    inner: Mutex<Inner>,
}

impl HashCache {
    /// Builds an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the current state of `key` without triggering any
    /// recomputation.
    #[must_use]
    pub fn get(&self, key: &HashCacheKey) -> HashState {
        let inner = self.inner.lock().expect("hash cache mutex poisoned");
        match inner.entries.get(key) {
            Some(Entry { state: EntryState::Ready(hash), .. }) => HashState::Ready(hash.clone()),
            Some(Entry { state: EntryState::Pending, .. }) => HashState::Pending,
            None => HashState::Unknown,
        }
    }

    /// Records a freshly computed hash for `key`, overwriting any prior
    /// entry and rebuilding the reverse path index for it.
    pub fn put(
        &self,
        key: HashCacheKey,
        hash: String,
        environment: Vec<(String, String)>,
        resolved_inputs: Vec<PathBuf>,
    ) {
        let mut inner = self.inner.lock().expect("hash cache mutex poisoned");
        Self::unindex(&mut inner, &key);
        for path in &resolved_inputs {
            inner.reverse.entry(path.clone()).or_default().insert(key.clone());
        }
        inner.entries.insert(
            key,
            Entry { state: EntryState::Ready(hash), environment, resolved_inputs },
        );
    }

    /// Marks `key` pending recomputation and enqueues it for the rehash
    /// worker, unless it is already queued. A no-op if `key` has no entry
    /// and no environment is known to seed a [`PendingRehash`] with; callers
    /// invalidating on a filesystem event should prefer
    /// [`HashCache::invalidate_path`], which only touches keys that exist.
    pub fn invalidate(&self, key: &HashCacheKey) {
        let mut inner = self.inner.lock().expect("hash cache mutex poisoned");
        let Some(entry) = inner.entries.get_mut(key) else { return };
        entry.state = EntryState::Pending;
        let environment = entry.environment.clone();
        if inner.queued_keys.insert(key.clone()) {
            inner.queue.push_back(PendingRehash { key: key.clone(), environment });
        }
    }

    /// Invalidates every cache entry whose resolved inputs include `path`,
    /// called by the debouncer's flush callback for each changed path.
    pub fn invalidate_path(&self, path: &Path) {
        let keys: Vec<HashCacheKey> = {
            let inner = self.inner.lock().expect("hash cache mutex poisoned");
            inner.reverse.get(path).map(|keys| keys.iter().cloned().collect()).unwrap_or_default()
        };
        for key in keys {
            self.invalidate(&key);
        }
    }

    /// Removes `key` entirely, used when a task disappears from the graph
    /// on reload.
    pub fn remove(&self, key: &HashCacheKey) {
        let mut inner = self.inner.lock().expect("hash cache mutex poisoned");
        Self::unindex(&mut inner, key);
        inner.entries.remove(key);
        inner.queued_keys.remove(key);
    }

    /// Pops the next pending rehash, if any, for the rehash worker to
    /// process. The key remains marked pending and present in
    /// `queued_keys` until [`HashCache::put`] or [`HashCache::requeue`]
    /// resolves it, so a concurrent `invalidate` on the same key will not
    /// enqueue a duplicate.
    pub fn dequeue(&self) -> Option<PendingRehash> {
        let mut inner = self.inner.lock().expect("hash cache mutex poisoned");
        let item = inner.queue.pop_front();
        if let Some(item) = &item {
            inner.queued_keys.remove(&item.key);
        }
        item
    }

    /// Re-enqueues a rehash attempt that failed transiently (spec: "not
    /// fatal, retried on the next tick"), without re-running the
    /// dedup-on-insert check, since the key may or may not still be in
    /// `queued_keys` depending on whether something else invalidated it
    /// again in the meantime.
    pub fn requeue(&self, item: PendingRehash) {
        let mut inner = self.inner.lock().expect("hash cache mutex poisoned");
        inner.queued_keys.insert(item.key.clone());
        inner.queue.push_back(item);
    }

    /// Number of entries currently pending recomputation, for `same daemon status`.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        let inner = self.inner.lock().expect("hash cache mutex poisoned");
        inner.entries.values().filter(|e| matches!(e.state, EntryState::Pending)).count()
    }

    fn unindex(inner: &mut Inner, key: &HashCacheKey) {
        if let Some(entry) = inner.entries.get(key) {
            for path in &entry.resolved_inputs {
                if let Some(keys) = inner.reverse.get_mut(path) {
                    keys.remove(key);
                    if keys.is_empty() {
                        inner.reverse.remove(path);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> HashCacheKey {
        HashCacheKey::new(PathBuf::from("/workspace"), name.to_string(), &[])
    }

    #[test]
    fn env_digest_is_order_independent() {
        let a = env_digest(&[("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())]);
        let b = env_digest(&[("B".to_string(), "2".to_string()), ("A".to_string(), "1".to_string())]);
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_key_reports_unknown() {
        let cache = HashCache::new();
        assert_eq!(cache.get(&key("build")), HashState::Unknown);
    }

    #[test]
    fn put_then_get_reports_ready() {
        let cache = HashCache::new();
        let k = key("build");
        cache.put(k.clone(), "abc123".to_string(), vec![], vec![]);
        assert_eq!(cache.get(&k), HashState::Ready("abc123".to_string()));
    }

    #[test]
    fn invalidate_moves_ready_entry_to_pending_and_queues_it() {
        let cache = HashCache::new();
        let k = key("build");
        cache.put(k.clone(), "abc123".to_string(), vec![], vec![PathBuf::from("/workspace/src/main.rs")]);
        cache.invalidate(&k);
        assert_eq!(cache.get(&k), HashState::Pending);
        let item = cache.dequeue().expect("should have queued a rehash");
        assert_eq!(item.key, k);
    }

    #[test]
    fn invalidate_path_invalidates_only_dependent_entries() {
        let cache = HashCache::new();
        let build = key("build");
        let test = key("test");
        cache.put(build.clone(), "h1".to_string(), vec![], vec![PathBuf::from("/workspace/src/main.rs")]);
        cache.put(test.clone(), "h2".to_string(), vec![], vec![PathBuf::from("/workspace/src/lib.rs")]);

        cache.invalidate_path(Path::new("/workspace/src/main.rs"));

        assert_eq!(cache.get(&build), HashState::Pending);
        assert_eq!(cache.get(&test), HashState::Ready("h2".to_string()));
    }

    #[test]
    fn invalidating_twice_does_not_queue_a_duplicate() {
        let cache = HashCache::new();
        let k = key("build");
        cache.put(k.clone(), "h1".to_string(), vec![], vec![]);
        cache.invalidate(&k);
        cache.invalidate(&k);
        assert!(cache.dequeue().is_some());
        assert!(cache.dequeue().is_none());
    }

    #[test]
    fn requeue_makes_item_available_again() {
        let cache = HashCache::new();
        let k = key("build");
        cache.put(k.clone(), "h1".to_string(), vec![], vec![]);
        cache.invalidate(&k);
        let item = cache.dequeue().unwrap();
        cache.requeue(item);
        assert!(cache.dequeue().is_some());
    }

    #[test]
    fn remove_clears_entry_and_reverse_index() {
        let cache = HashCache::new();
        let k = key("build");
        cache.put(k.clone(), "h1".to_string(), vec![], vec![PathBuf::from("/workspace/a")]);
        cache.remove(&k);
        assert_eq!(cache.get(&k), HashState::Unknown);
        cache.invalidate_path(Path::new("/workspace/a"));
        assert!(cache.dequeue().is_none());
    }

    #[test]
    fn pending_count_reflects_only_pending_entries() {
        let cache = HashCache::new();
        let a = key("a");
        let b = key("b");
        cache.put(a.clone(), "h1".to_string(), vec![], vec![]);
        cache.put(b, "h2".to_string(), vec![], vec![]);
        assert_eq!(cache.pending_count(), 0);
        cache.invalidate(&a);
        assert_eq!(cache.pending_count(), 1);
    }
}
