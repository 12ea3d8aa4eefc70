//! Background worker that drains the hash cache's pending queue (spec §4.6).
//!
//! Recomputation happens off the RPC hot path: a filesystem change marks
//! entries [`crate::hash_cache::HashState::Pending`] and enqueues them, and
//! this worker pops them one at a time, resolves the owning task's inputs
//! under the entry's recorded environment, and writes the fresh hash back.
//! A task that has since left the graph, or whose inputs fail to resolve,
//! is not fatal: the entry is left pending and the attempt is logged.

use std::sync::Arc;
use std::time::Duration;

use same_core::collaborators::InputResolver;
use same_core::fingerprint::{compute_input_hash, exposed_hex, FingerprintInput};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::hash_cache::HashCache;
use crate::server_cache::ServerCache;

/// Drains `hash_cache`'s pending queue on a fixed tick until `shutdown`
/// fires, resolving each task's current definition via `server_cache` and
/// its inputs via `resolver`.
pub async fn run(
    hash_cache: Arc<HashCache>,
    server_cache: Arc<ServerCache>,
    resolver: Arc<dyn InputResolver>,
    tick_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                while let Some(item) = hash_cache.dequeue() {
                    process(&hash_cache, &server_cache, resolver.as_ref(), item);
                }
            }
            () = shutdown.cancelled() => return,
        }
    }
}

fn process(
    hash_cache: &HashCache,
    server_cache: &ServerCache,
    resolver: &dyn InputResolver,
    item: crate::hash_cache::PendingRehash,
) {
    let Some(graph) = server_cache.graph_for(&item.key.root) else {
        debug!(task = %item.key.task_name, "rehash: workspace graph not cached, requeuing");
        hash_cache.requeue(item);
        return;
    };
    let Some(task) = graph.get_task(&item.key.task_name) else {
        debug!(task = %item.key.task_name, "rehash: task no longer present in graph, dropping");
        hash_cache.remove(&item.key);
        return;
    };

    let resolved_inputs = match resolver.resolve(&item.key.root, &task.inputs) {
        Ok(resolved) => resolved,
        Err(source) => {
            warn!(task = %item.key.task_name, %source, "rehash: failed to resolve inputs, requeuing");
            hash_cache.requeue(item);
            return;
        }
    };

    let environment = item.environment.iter().cloned().collect();
    let input = FingerprintInput {
        command: task.command.clone(),
        tools: task.tools.clone(),
        environment,
        resolved_inputs: resolved_inputs.clone(),
        working_dir: task.working_dir.clone(),
    };

    match compute_input_hash(&input) {
        Ok(digest) => {
            let hash = exposed_hex(&digest);
            hash_cache.put(item.key.clone(), hash, item.environment.clone(), resolved_inputs);
        }
        Err(source) => {
            warn!(task = %item.key.task_name, %source, "rehash: failed to compute input hash, requeuing");
            hash_cache.requeue(item);
        }
    }
}
