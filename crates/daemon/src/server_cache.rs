//! Per-workspace cache of parsed graphs and resolved tool environments
//! (spec §4.7).
//!
//! An in-memory, mutex-guarded map from workspace root to
//! [`GraphCacheEntry`], plus a separate map from `envID` to a resolved
//! environment. Both support concurrent readers and single-writer-per-key;
//! insertion overwrites prior entries. No LRU: entries are bounded by
//! workspace-root count and tool-set diversity per daemon.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use same_core::ValidatedGraph;
use same_wire::MtimeMap;

/// A cached, parsed [`ValidatedGraph`] plus the mtimes of the config paths
/// that produced it.
struct GraphCacheEntry {
    graph: Arc<ValidatedGraph>,
    mtimes: MtimeMap,
}

/// A cached, resolved environment for one tool set.
struct EnvironmentEntry {
    environment: Vec<(String, String)>,
}

/// The daemon's in-memory graph and environment caches.
#[derive(Default)]
pub struct ServerCache {
    graphs: Mutex<HashMap<PathBuf, GraphCacheEntry>>,
    environments: Mutex<HashMap<String, EnvironmentEntry>>,
}

impl ServerCache {
    /// Builds an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached graph for `root` only if the stored mtime map is
    /// exactly equal (same keys, same values) to `mtimes`; any mismatch is
    /// a miss.
    #[must_use]
    pub fn get_graph(&self, root: &Path, mtimes: &MtimeMap) -> Option<Arc<ValidatedGraph>> {
        let graphs = self.graphs.lock().expect("server cache mutex poisoned");
        graphs
            .get(root)
            .filter(|entry| &entry.mtimes == mtimes)
            .map(|entry| Arc::clone(&entry.graph))
    }

    /// Returns the cached graph for `root` regardless of mtime freshness,
    /// for collaborators (the rehash worker) that only need the task
    /// definitions, not a cache-hit decision.
    #[must_use]
    pub fn graph_for(&self, root: &Path) -> Option<Arc<ValidatedGraph>> {
        let graphs = self.graphs.lock().expect("server cache mutex poisoned");
        graphs.get(root).map(|entry| Arc::clone(&entry.graph))
    }

    /// Inserts or overwrites the cached graph for `root`.
    pub fn put_graph(&self, root: PathBuf, graph: Arc<ValidatedGraph>, mtimes: MtimeMap) {
        let mut graphs = self.graphs.lock().expect("server cache mutex poisoned");
        graphs.insert(root, GraphCacheEntry { graph, mtimes });
    }

    /// Returns the cached resolved environment for `env_id`, if any.
    #[must_use]
    pub fn get_environment(&self, env_id: &str) -> Option<Vec<(String, String)>> {
        let environments = self.environments.lock().expect("server cache mutex poisoned");
        environments.get(env_id).map(|entry| entry.environment.clone())
    }

    /// Inserts or overwrites the cached resolved environment for `env_id`.
    pub fn put_environment(&self, env_id: String, environment: Vec<(String, String)>) {
        let mut environments = self.environments.lock().expect("server cache mutex poisoned");
        environments.insert(env_id, EnvironmentEntry { environment });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use same_core::Graph;

    #[test]
    fn graph_cache_hits_only_on_exact_mtime_match() {
        let cache = ServerCache::new();
        let graph = Arc::new(Graph::new("/workspace").validate().unwrap());
        let mut mtimes = MtimeMap::new();
        mtimes.insert(PathBuf::from("/workspace/same.yaml"), 100);
        cache.put_graph(PathBuf::from("/workspace"), Arc::clone(&graph), mtimes.clone());

        assert!(cache.get_graph(Path::new("/workspace"), &mtimes).is_some());

        let mut stale = mtimes.clone();
        stale.insert(PathBuf::from("/workspace/same.yaml"), 200);
        assert!(cache.get_graph(Path::new("/workspace"), &stale).is_none());
    }

    #[test]
    fn environment_cache_round_trips() {
        let cache = ServerCache::new();
        assert!(cache.get_environment("abc").is_none());
        cache.put_environment("abc".to_string(), vec![("PATH".to_string(), "/bin".to_string())]);
        assert_eq!(
            cache.get_environment("abc"),
            Some(vec![("PATH".to_string(), "/bin".to_string())])
        );
    }
}
