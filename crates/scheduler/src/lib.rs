//! Bounded-parallelism DAG scheduler (spec §4.5): cache-skip decisions,
//! cascading skip-as-failed, and deterministic dispatch order.
//!
//! ```rust,no_run
//! use same_core::collaborators::{GlobInputResolver, StaticToolEnvironment};
//! use same_executor::Executor;
//! use same_scheduler::renderer::LinearRenderer;
//! use same_scheduler::{Scheduler, SchedulerConfig};
//! use same_store::BuildInfoStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> same_scheduler::Result<()> {
//! let graph = same_core::config::YamlConfigLoader.load(std::path::Path::new(".")).unwrap();
//! use same_core::config::ConfigLoader;
//! let scheduler = Scheduler::new(
//!     Arc::new(Executor),
//!     Arc::new(BuildInfoStore::new(graph.root())),
//!     Arc::new(GlobInputResolver),
//!     Arc::new(StaticToolEnvironment),
//!     Arc::new(LinearRenderer::default()),
//! );
//! scheduler
//!     .run(&graph, &["build".to_string()], SchedulerConfig::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod renderer;
pub mod tui;

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

pub use crate::error::{Error, Result};
pub use crate::renderer::{RenderEvent, Renderer, TaskOutcome};

use same_core::collaborators::{InputResolver, ToolEnvironment};
use same_core::{compute_input_hash, compute_output_hash, exposed_hex, BuildInfo, FingerprintInput, RebuildStrategy, Task, ValidatedGraph};
use same_executor::{Executor, PtyDimensions};
use same_store::BuildInfoStore;

/// Scheduler-wide knobs not carried by individual tasks.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of tasks executing concurrently.
    pub concurrency: usize,
    /// Bypasses the build-info cache check for every task, as if every
    /// task were declared `rebuild: always`.
    pub no_cache: bool,
    /// PTY dimensions for spawned tasks.
    pub pty_dimensions: PtyDimensions,
    /// Cooperative cancellation token; cancelling this stops dispatch of
    /// new tasks and signals in-flight executors.
    pub cancellation: CancellationToken,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            no_cache: false,
            pty_dimensions: PtyDimensions::default(),
            cancellation: CancellationToken::new(),
        }
    }
}

/// Orchestrates execution of a validated [`ValidatedGraph`] subgraph with
/// bounded parallelism, cache-skip decisions, and cascading failure.
pub struct Scheduler {
    executor: Arc<Executor>,
    store: Arc<BuildInfoStore>,
    input_resolver: Arc<dyn InputResolver>,
    tool_env: Arc<dyn ToolEnvironment>,
    renderer: Arc<dyn Renderer>,
}

impl Scheduler {
    /// Builds a scheduler from its collaborators.
    #[must_use]
    pub fn new(
        executor: Arc<Executor>,
        store: Arc<BuildInfoStore>,
        input_resolver: Arc<dyn InputResolver>,
        tool_env: Arc<dyn ToolEnvironment>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            executor,
            store,
            input_resolver,
            tool_env,
            renderer,
        }
    }

    /// Runs the minimal set of tasks that transitively includes every
    /// name in `targets`, in dependency order, with at most
    /// `config.concurrency` tasks executing at once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BuildExecutionFailed`] naming the tasks that
    /// actually failed (as opposed to tasks cascaded as
    /// skipped-as-failed), or [`Error::Cancelled`] if `config.cancellation`
    /// fires before completion.
    #[instrument(skip(self, graph, config))]
    pub async fn run(&self, graph: &ValidatedGraph, targets: &[String], config: SchedulerConfig) -> Result<()> {
        let root = graph.root().to_path_buf();
        let required: Vec<&Task> = graph.subgraph_for(targets);
        let names: BTreeSet<String> = required.iter().map(|t| t.name.clone()).collect();

        self.renderer.on_event(RenderEvent::Plan {
            tasks: required.iter().map(|t| t.name.clone()).collect(),
        });

        let mut in_degree: HashMap<String, usize> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for task in &required {
            let deps_in_scope = task.dependencies.iter().filter(|d| names.contains(*d)).count();
            in_degree.insert(task.name.clone(), deps_in_scope);
            for dep in &task.dependencies {
                if names.contains(dep) {
                    dependents.entry(dep.clone()).or_default().push(task.name.clone());
                }
            }
        }
        for deps in dependents.values_mut() {
            deps.sort();
        }

        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel::<String>();
        let mut ready_now: BTreeSet<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &ready_now {
            ready_tx.send(name.clone()).expect("ready channel receiver dropped");
        }

        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        let mut in_flight = tokio::task::JoinSet::new();
        let mut terminated = 0usize;
        let mut failed_real: Vec<String> = Vec::new();
        let mut skipped_failed: BTreeSet<String> = BTreeSet::new();
        let mut failed_by: HashMap<String, String> = HashMap::new();

        let total = required.len();
        let task_by_name: HashMap<&str, &Task> = required.iter().map(|t| (t.name.as_str(), *t)).collect();

        while terminated < total {
            if config.cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }

            tokio::select! {
                biased;
                _ = config.cancellation.cancelled() => {
                    return Err(Error::Cancelled);
                }
                Some(name) = ready_rx.recv() => {
                    ready_now.remove(&name);
                    let task = (*task_by_name.get(name.as_str()).expect("ready task must be in scope")).clone();
                    let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore closed");
                    let this = self.clone_refs();
                    let no_cache = config.no_cache;
                    let dims = config.pty_dimensions;
                    let root = root.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        let outcome = tokio::task::spawn_blocking(move || this.dispatch_one(&task, &root, no_cache, dims))
                            .await
                            .expect("dispatch task panicked");
                        (name, outcome)
                    });
                }
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    let (name, outcome) = result.expect("dispatch task join failed");
                    terminated += 1;
                    match outcome {
                        Ok(render_outcome) => {
                            self.renderer.on_event(RenderEvent::TaskComplete {
                                name: name.clone(),
                                outcome: render_outcome,
                            });
                            for dependent in dependents.get(&name).cloned().unwrap_or_default() {
                                let deg = in_degree.get_mut(&dependent).expect("dependent tracked in in_degree");
                                *deg -= 1;
                                if *deg == 0 {
                                    ready_tx.send(dependent).expect("ready channel receiver dropped");
                                }
                            }
                        }
                        Err(message) => {
                            failed_real.push(name.clone());
                            self.renderer.on_event(RenderEvent::TaskComplete {
                                name: name.clone(),
                                outcome: TaskOutcome::Failed { message },
                            });
                            self.cascade_failure(&name, &dependents, &mut in_degree, &mut skipped_failed, &mut failed_by, &mut terminated);
                        }
                    }
                }
            }
        }

        if failed_real.is_empty() {
            Ok(())
        } else {
            Err(Error::BuildExecutionFailed(failed_real))
        }
    }

    fn cascade_failure(
        &self,
        failed: &str,
        dependents: &HashMap<String, Vec<String>>,
        in_degree: &mut HashMap<String, usize>,
        skipped_failed: &mut BTreeSet<String>,
        failed_by: &mut HashMap<String, String>,
        terminated: &mut usize,
    ) {
        let mut stack = vec![failed.to_string()];
        while let Some(name) = stack.pop() {
            for dependent in dependents.get(&name).cloned().unwrap_or_default() {
                if skipped_failed.insert(dependent.clone()) {
                    in_degree.remove(&dependent);
                    failed_by.insert(dependent.clone(), failed_by.get(&name).cloned().unwrap_or_else(|| failed.to_string()));
                    *terminated += 1;
                    self.renderer.on_event(RenderEvent::TaskComplete {
                        name: dependent.clone(),
                        outcome: TaskOutcome::SkippedFailed {
                            failed_dependency: failed_by[&dependent].clone(),
                        },
                    });
                    stack.push(dependent);
                }
            }
        }
    }

    fn clone_refs(&self) -> DispatchContext {
        DispatchContext {
            executor: Arc::clone(&self.executor),
            store: Arc::clone(&self.store),
            input_resolver: Arc::clone(&self.input_resolver),
            tool_env: Arc::clone(&self.tool_env),
            renderer: Arc::clone(&self.renderer),
        }
    }
}

/// Owned collaborator handles passed into a blocking dispatch closure.
struct DispatchContext {
    executor: Arc<Executor>,
    store: Arc<BuildInfoStore>,
    input_resolver: Arc<dyn InputResolver>,
    tool_env: Arc<dyn ToolEnvironment>,
    renderer: Arc<dyn Renderer>,
}

impl DispatchContext {
    fn dispatch_one(&self, task: &Task, root: &Path, no_cache: bool, dims: PtyDimensions) -> std::result::Result<TaskOutcome, String> {
        let resolved_inputs = self
            .input_resolver
            .resolve(root, &task.inputs)
            .map_err(|e| e.to_string())?;

        let fingerprint = FingerprintInput {
            command: task.command.clone(),
            tools: task.tools.clone(),
            environment: task.environment.clone(),
            resolved_inputs,
            working_dir: task.working_dir.clone(),
        };
        let input_digest = compute_input_hash(&fingerprint).map_err(|e| e.to_string())?;
        let input_hash = exposed_hex(&input_digest);

        if task.rebuild != RebuildStrategy::Always && !no_cache {
            if let Some(info) = self.store.get(&task.name).map_err(|e| e.to_string())? {
                if info.matches(&input_hash) {
                    return Ok(TaskOutcome::Cached);
                }
            }
        }

        self.renderer.on_event(RenderEvent::TaskStart {
            name: task.name.clone(),
            command: task.command.join(" "),
        });

        let tool_env = self.tool_env.resolve(&task.tools).map_err(|e| e.to_string())?;
        let sink: Arc<Mutex<dyn Write + Send>> = Arc::new(Mutex::new(RenderWriter {
            name: task.name.clone(),
            renderer: Arc::clone(&self.renderer),
        }));

        let start = Instant::now();
        self.executor
            .execute(&task.command, &tool_env, &task.environment, task.working_dir.clone(), dims, sink)
            .map_err(|e| e.to_string())?;
        let duration_ms = start.elapsed().as_millis();

        let resolved_outputs = self
            .input_resolver
            .resolve(root, &task.outputs)
            .map_err(|e| e.to_string())?;
        let output_hash = if resolved_outputs.is_empty() {
            String::new()
        } else {
            exposed_hex(&compute_output_hash(&resolved_outputs).map_err(|e| e.to_string())?)
        };

        self.store
            .put(&BuildInfo::new(task.name.clone(), input_hash, output_hash))
            .map_err(|e| e.to_string())?;

        Ok(TaskOutcome::Succeeded { duration_ms })
    }
}

/// Adapts the executor's `Write` sink into per-chunk [`RenderEvent::TaskLog`]
/// events.
struct RenderWriter {
    name: String,
    renderer: Arc<dyn Renderer>,
}

impl Write for RenderWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let chunk = String::from_utf8_lossy(buf).into_owned();
        self.renderer.on_event(RenderEvent::TaskLog {
            name: self.name.clone(),
            chunk,
        });
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use same_core::collaborators::{GlobInputResolver, StaticToolEnvironment};
    use same_core::{Graph, Task as CoreTask};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn task(name: &str, deps: &[&str], cmd: &[&str]) -> CoreTask {
        CoreTask {
            name: name.to_string(),
            command: cmd.iter().map(|s| s.to_string()).collect(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            tools: BTreeMap::new(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            environment: BTreeMap::new(),
            working_dir: PathBuf::from("."),
            rebuild: RebuildStrategy::default(),
        }
    }

    struct NullRenderer;
    impl Renderer for NullRenderer {
        fn on_event(&self, _event: RenderEvent) {}
    }

    struct CapturingRenderer {
        outcomes: Mutex<Vec<TaskOutcome>>,
    }

    impl Renderer for CapturingRenderer {
        fn on_event(&self, event: RenderEvent) {
            if let RenderEvent::TaskComplete { outcome, .. } = event {
                self.outcomes.lock().unwrap().push(outcome);
            }
        }
    }

    #[tokio::test]
    async fn runs_a_diamond_graph_in_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut graph = Graph::new(dir.path());
        graph.add_task(task("a", &[], &["true"])).unwrap();
        graph.add_task(task("b", &["a"], &["true"])).unwrap();
        graph.add_task(task("c", &["a"], &["true"])).unwrap();
        graph.add_task(task("d", &["b", "c"], &["true"])).unwrap();
        let graph = graph.validate().unwrap();

        let scheduler = Scheduler::new(
            Arc::new(Executor),
            Arc::new(BuildInfoStore::new(dir.path())),
            Arc::new(GlobInputResolver),
            Arc::new(StaticToolEnvironment),
            Arc::new(NullRenderer),
        );

        scheduler
            .run(&graph, &["d".to_string()], SchedulerConfig::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failure_cascades_to_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let mut graph = Graph::new(dir.path());
        graph.add_task(task("a", &[], &["false"])).unwrap();
        graph.add_task(task("b", &["a"], &["true"])).unwrap();
        let graph = graph.validate().unwrap();

        let scheduler = Scheduler::new(
            Arc::new(Executor),
            Arc::new(BuildInfoStore::new(dir.path())),
            Arc::new(GlobInputResolver),
            Arc::new(StaticToolEnvironment),
            Arc::new(NullRenderer),
        );

        let err = scheduler
            .run(&graph, &["b".to_string()], SchedulerConfig::default())
            .await
            .unwrap_err();
        match err {
            Error::BuildExecutionFailed(failed) => assert_eq!(failed, vec!["a".to_string()]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_run_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut graph = Graph::new(dir.path());
        graph.add_task(task("a", &[], &["true"])).unwrap();
        let graph = graph.validate().unwrap();

        let renderer = Arc::new(CapturingRenderer {
            outcomes: Mutex::new(Vec::new()),
        });
        let scheduler = Scheduler::new(
            Arc::new(Executor),
            Arc::new(BuildInfoStore::new(dir.path())),
            Arc::new(GlobInputResolver),
            Arc::new(StaticToolEnvironment),
            Arc::clone(&renderer) as Arc<dyn Renderer>,
        );

        scheduler
            .run(&graph, &["a".to_string()], SchedulerConfig::default())
            .await
            .unwrap();
        scheduler
            .run(&graph, &["a".to_string()], SchedulerConfig::default())
            .await
            .unwrap();

        let outcomes = renderer.outcomes.lock().unwrap();
        assert!(matches!(outcomes[0], TaskOutcome::Succeeded { .. }));
        assert!(matches!(outcomes[1], TaskOutcome::Cached));
    }
}
