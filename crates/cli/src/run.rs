//! The `same run` command: a `--no-daemon` path that reuses
//! `same_scheduler::Scheduler` directly, and a daemon-mode path with its
//! own dispatch loop driving the daemon's RPC surface, since `Scheduler`
//! is hard-wired to an in-process `Executor` and cannot be parameterized
//! to call RPCs in its place.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use same_core::collaborators::{GlobInputResolver, InputResolver};
use same_core::config::{ConfigLoader, YamlConfigLoader};
use same_core::{compute_output_hash, exposed_hex, BuildInfo, Graph, RebuildStrategy, Task, ValidatedGraph};
use same_daemon::{env_id, paths};
use same_executor::{environment, Executor, PtyDimensions};
use same_scheduler::renderer::{renderer_for_env, LinearRenderer, RenderEvent, Renderer, TaskOutcome};
use same_scheduler::tui::TuiRenderer;
use same_scheduler::{Scheduler, SchedulerConfig};
use same_store::BuildInfoStore;
use same_wire::{
    ExecuteTaskRequest, GetEnvironmentRequest, GetEnvironmentResult, GetGraphRequest, GetGraphResult,
    GetInputHashRequest, GetInputHashResult, HashState as WireHashState, MessageType, MtimeMap, WireTask,
};

use crate::cli::OutputFormat;
use crate::error::CliError;
use crate::rpc;

/// The flags `same run` was invoked with, decoupled from `clap`'s enum so
/// both dispatch paths take the same plain struct.
pub struct RunOptions {
    /// Targets named on the command line.
    pub targets: Vec<String>,
    /// Bypasses the build-info cache for every task.
    pub no_cache: bool,
    /// Prints the resolved plan and returns without executing anything.
    pub inspect: bool,
    /// Runs in-process instead of through the daemon.
    pub no_daemon: bool,
    /// Chosen output renderer.
    pub output: OutputFormat,
    /// Overrides the default (logical-CPU) concurrency.
    pub concurrency: Option<usize>,
}

/// Runs `same run`, dispatching to the in-process scheduler or the
/// daemon-mode RPC loop depending on `options.no_daemon`.
///
/// # Errors
///
/// Propagates any graph, store, executor, scheduler, or daemon failure, or
/// [`CliError::Usage`] if `targets` is empty or names an unknown task.
#[instrument(skip(options, cancellation))]
pub async fn run(root: &Path, options: RunOptions, cancellation: CancellationToken) -> Result<(), CliError> {
    if options.targets.is_empty() {
        return Err(CliError::Usage("no targets given; usage: same run <target>...".to_string()));
    }

    let concurrency = options
        .concurrency
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get));

    let (renderer, tui): (Arc<dyn Renderer>, Option<Arc<TuiRenderer>>) = select_renderer(options.output);
    let tui_thread = tui.as_ref().map(|tui| {
        let tui = Arc::clone(tui);
        std::thread::spawn(move || tui.run())
    });

    let result = if options.no_daemon {
        run_no_daemon(root, &options, concurrency, Arc::clone(&renderer), cancellation).await
    } else {
        run_daemon_mode(root, &options, concurrency, Arc::clone(&renderer), cancellation).await
    };

    if let Some(handle) = tui_thread {
        let _ = handle.join();
    }
    result
}

/// Picks a concrete [`Renderer`] for `format`, also returning the
/// [`TuiRenderer`] handle when one was chosen so the caller can drive its
/// blocking `run` loop on a dedicated thread.
fn select_renderer(format: OutputFormat) -> (Arc<dyn Renderer>, Option<Arc<TuiRenderer>>) {
    let effective = match format {
        OutputFormat::Auto => {
            let ci = std::env::var("CI").is_ok_and(|value| value == "true" || value == "1");
            if ci || !std::io::stdout().is_terminal() {
                OutputFormat::Linear
            } else {
                OutputFormat::Tui
            }
        }
        other => other,
    };

    match effective {
        OutputFormat::Tui => {
            let tui = Arc::new(TuiRenderer::default());
            (Arc::clone(&tui) as Arc<dyn Renderer>, Some(tui))
        }
        OutputFormat::Ci => (Arc::new(LinearRenderer::with_colors(false)) as Arc<dyn Renderer>, None),
        OutputFormat::Linear | OutputFormat::Auto => (Arc::new(renderer_for_env()) as Arc<dyn Renderer>, None),
    }
}

async fn run_no_daemon(
    root: &Path,
    options: &RunOptions,
    concurrency: usize,
    renderer: Arc<dyn Renderer>,
    cancellation: CancellationToken,
) -> Result<(), CliError> {
    let graph = YamlConfigLoader.load(root)?;
    check_targets_exist(&graph, &options.targets)?;

    if options.inspect {
        print_plan(&graph, &options.targets);
        return Ok(());
    }

    let scheduler = Scheduler::new(
        Arc::new(Executor),
        Arc::new(BuildInfoStore::new(root)),
        Arc::new(GlobInputResolver),
        Arc::new(same_core::collaborators::StaticToolEnvironment),
        renderer,
    );
    let config = SchedulerConfig {
        concurrency,
        no_cache: options.no_cache,
        pty_dimensions: PtyDimensions::default(),
        cancellation,
    };
    scheduler.run(&graph, &options.targets, config).await?;
    Ok(())
}

fn check_targets_exist(graph: &ValidatedGraph, targets: &[String]) -> Result<(), CliError> {
    for target in targets {
        if graph.get_task(target).is_none() {
            return Err(CliError::Usage(format!("unknown target '{target}'")));
        }
    }
    Ok(())
}

fn print_plan(graph: &ValidatedGraph, targets: &[String]) {
    let names: Vec<&str> = graph.subgraph_for(targets).iter().map(|task| task.name.as_str()).collect();
    println!("{}", names.join("\n"));
}

/// Daemon-mode dispatch: connects (spawning the daemon if needed), fetches
/// the graph and per-tool environments over RPC, then runs the same
/// bounded-parallelism in-degree/dependents walk as
/// [`same_scheduler::Scheduler::run`], dispatching each ready task through
/// `ExecuteTask` instead of an in-process [`Executor`].
async fn run_daemon_mode(
    root: &Path,
    options: &RunOptions,
    concurrency: usize,
    renderer: Arc<dyn Renderer>,
    cancellation: CancellationToken,
) -> Result<(), CliError> {
    let root = root.to_path_buf();
    let stream = crate::connector::connect(&root).await?;
    drop(stream); // only used to establish liveness; subsequent RPCs dial fresh connections.
    let socket_path = paths::socket_path(&root);

    let mtimes = config_mtimes(&root);
    let graph_result: GetGraphResult = rpc::call(&socket_path, MessageType::GetGraph, &GetGraphRequest { cwd: root.clone(), mtimes }).await?;
    let graph = lower_wire_graph(&root, graph_result.tasks)?;
    check_targets_exist(&graph, &options.targets)?;

    if options.inspect {
        print_plan(&graph, &options.targets);
        return Ok(());
    }

    let dispatcher = DaemonDispatcher {
        root: root.clone(),
        socket_path,
        store: Arc::new(BuildInfoStore::new(&root)),
        input_resolver: Arc::new(GlobInputResolver),
        renderer,
        no_cache: options.no_cache,
    };
    dispatcher.run(&graph, &options.targets, concurrency, cancellation).await
}

/// The mtime map a `GetGraph` request carries (spec §4.9): here, just the
/// workspace config file's own mtime, since the narrow `YamlConfigLoader`
/// reads exactly one file.
fn config_mtimes(root: &Path) -> MtimeMap {
    let mut mtimes = MtimeMap::new();
    if let Ok(path) = YamlConfigLoader::config_path(root) {
        if let Ok(modified) = std::fs::metadata(&path).and_then(|meta| meta.modified()) {
            if let Ok(secs) = modified.duration_since(std::time::UNIX_EPOCH) {
                mtimes.insert(path, secs.as_secs());
            }
        }
    }
    mtimes
}

/// Rebuilds a local [`ValidatedGraph`] from the daemon's flattened
/// [`WireTask`] list, so the dispatch loop can reuse
/// [`ValidatedGraph::subgraph_for`] and friends instead of re-implementing
/// them against the wire DTO.
fn lower_wire_graph(root: &Path, tasks: Vec<WireTask>) -> Result<ValidatedGraph, CliError> {
    let mut graph = Graph::new(root.to_path_buf());
    for wire_task in tasks {
        let task = Task {
            name: wire_task.name,
            command: wire_task.command,
            inputs: wire_task.inputs,
            outputs: wire_task.outputs,
            tools: wire_task.tools,
            dependencies: wire_task.dependencies,
            environment: wire_task.environment,
            working_dir: wire_task.working_dir,
            rebuild: RebuildStrategy::parse(&wire_task.rebuild)?,
        };
        graph.add_task(task)?;
    }
    Ok(graph.validate()?)
}

struct DaemonDispatcher {
    root: PathBuf,
    socket_path: PathBuf,
    store: Arc<BuildInfoStore>,
    input_resolver: Arc<dyn InputResolver>,
    renderer: Arc<dyn Renderer>,
    no_cache: bool,
}

impl DaemonDispatcher {
    /// Mirrors [`same_scheduler::Scheduler::run`]'s in-degree/dependents
    /// walk, substituting an RPC-driven dispatch for the in-process one.
    async fn run(&self, graph: &ValidatedGraph, targets: &[String], concurrency: usize, cancellation: CancellationToken) -> Result<(), CliError> {
        let required: Vec<&Task> = graph.subgraph_for(targets);
        let names: BTreeSet<String> = required.iter().map(|task| task.name.clone()).collect();

        self.renderer.on_event(RenderEvent::Plan {
            tasks: required.iter().map(|task| task.name.clone()).collect(),
        });

        let mut in_degree: HashMap<String, usize> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for task in &required {
            let deps_in_scope = task.dependencies.iter().filter(|dep| names.contains(*dep)).count();
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
        let ready_now: BTreeSet<String> = in_degree.iter().filter(|(_, &deg)| deg == 0).map(|(name, _)| name.clone()).collect();
        for name in ready_now {
            ready_tx.send(name).expect("ready channel receiver dropped");
        }

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut in_flight = tokio::task::JoinSet::new();
        let mut terminated = 0usize;
        let mut failed_real: Vec<String> = Vec::new();
        let mut skipped_failed: BTreeSet<String> = BTreeSet::new();
        let mut failed_by: HashMap<String, String> = HashMap::new();
        let total = required.len();
        let task_by_name: HashMap<&str, &Task> = required.iter().map(|task| (task.name.as_str(), *task)).collect();

        while terminated < total {
            if cancellation.is_cancelled() {
                return Err(CliError::Usage("run cancelled".to_string()));
            }

            tokio::select! {
                biased;
                () = cancellation.cancelled() => {
                    return Err(CliError::Usage("run cancelled".to_string()));
                }
                Some(name) = ready_rx.recv() => {
                    let task = (*task_by_name.get(name.as_str()).expect("ready task must be in scope")).clone();
                    let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore closed");
                    let root = self.root.clone();
                    let socket_path = self.socket_path.clone();
                    let store = Arc::clone(&self.store);
                    let input_resolver = Arc::clone(&self.input_resolver);
                    let renderer = Arc::clone(&self.renderer);
                    let no_cache = self.no_cache;
                    in_flight.spawn(async move {
                        let _permit = permit;
                        let outcome = dispatch_one(&root, &socket_path, &task, no_cache, &store, input_resolver.as_ref(), renderer.as_ref()).await;
                        (name, outcome)
                    });
                }
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    let (name, outcome) = result.expect("dispatch task join failed");
                    terminated += 1;
                    match outcome {
                        Ok(render_outcome) => {
                            self.renderer.on_event(RenderEvent::TaskComplete { name: name.clone(), outcome: render_outcome });
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
                            self.renderer.on_event(RenderEvent::TaskComplete { name: name.clone(), outcome: TaskOutcome::Failed { message } });
                            cascade_failure(&name, &dependents, &mut in_degree, &mut skipped_failed, &mut failed_by, &mut terminated, self.renderer.as_ref());
                        }
                    }
                }
            }
        }

        if failed_real.is_empty() {
            Ok(())
        } else {
            Err(same_scheduler::Error::BuildExecutionFailed(failed_real).into())
        }
    }
}

fn cascade_failure(
    failed: &str,
    dependents: &HashMap<String, Vec<String>>,
    in_degree: &mut HashMap<String, usize>,
    skipped_failed: &mut BTreeSet<String>,
    failed_by: &mut HashMap<String, String>,
    terminated: &mut usize,
    renderer: &dyn Renderer,
) {
    let mut stack = vec![failed.to_string()];
    while let Some(name) = stack.pop() {
        for dependent in dependents.get(&name).cloned().unwrap_or_default() {
            if skipped_failed.insert(dependent.clone()) {
                in_degree.remove(&dependent);
                failed_by.insert(dependent.clone(), failed_by.get(&name).cloned().unwrap_or_else(|| failed.to_string()));
                *terminated += 1;
                renderer.on_event(RenderEvent::TaskComplete {
                    name: dependent.clone(),
                    outcome: TaskOutcome::SkippedFailed { failed_dependency: failed_by[&dependent].clone() },
                });
                stack.push(dependent);
            }
        }
    }
}

/// Upper bound on `GetInputHash` polling before giving up on a `Pending`
/// hash and running the task as a cache miss.
const INPUT_HASH_POLL_ATTEMPTS: usize = 20;
const INPUT_HASH_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

async fn dispatch_one(
    root: &Path,
    socket_path: &Path,
    task: &Task,
    no_cache: bool,
    store: &BuildInfoStore,
    input_resolver: &dyn InputResolver,
    renderer: &dyn Renderer,
) -> Result<TaskOutcome, String> {
    let env_id = env_id::compute(&task.tools);
    let env_result: GetEnvironmentResult = rpc::call(
        socket_path,
        MessageType::GetEnvironment,
        &GetEnvironmentRequest { env_id, tools: task.tools.clone() },
    )
    .await
    .map_err(|e| e.to_string())?;
    let composed = environment::compose(&env_result.environment, &task.environment);

    let input_hash = resolve_input_hash(root, socket_path, task, &composed).await.map_err(|e| e.to_string())?;

    if task.rebuild != RebuildStrategy::Always && !no_cache {
        if let Some(info) = store.get(&task.name).map_err(|e| e.to_string())? {
            if info.matches(&input_hash) {
                return Ok(TaskOutcome::Cached);
            }
        }
    }

    renderer.on_event(RenderEvent::TaskStart { name: task.name.clone(), command: task.command.join(" ") });

    let path = composed.iter().find(|(key, _)| key == "PATH").map(|(_, value)| value.as_str());
    let resolved_argv0 =
        environment::resolve_executable(&task.command[0], path).ok_or_else(|| same_executor::Error::ExecutableNotFound(task.command[0].clone()).to_string())?;
    let mut command = task.command.clone();
    command[0] = resolved_argv0.to_string_lossy().into_owned();

    let request = ExecuteTaskRequest {
        task_name: task.name.clone(),
        command,
        working_dir: task.working_dir.clone(),
        environment: composed,
        pty_rows: 24,
        pty_cols: 80,
    };

    let start = Instant::now();
    let exit_code = rpc::execute_task(socket_path, &task.name, request, renderer).await.map_err(|e| e.to_string())?;
    let duration_ms = start.elapsed().as_millis();

    if exit_code != 0 {
        return Ok(TaskOutcome::Failed { message: format!("exited with status {exit_code}") });
    }

    let resolved_outputs = input_resolver.resolve(root, &task.outputs).map_err(|e| e.to_string())?;
    let output_hash = if resolved_outputs.is_empty() {
        String::new()
    } else {
        exposed_hex(&compute_output_hash(&resolved_outputs).map_err(|e| e.to_string())?)
    };
    store.put(&BuildInfo::new(task.name.clone(), input_hash, output_hash)).map_err(|e| e.to_string())?;

    Ok(TaskOutcome::Succeeded { duration_ms })
}

/// Polls `GetInputHash` until it reports [`WireHashState::Ready`] or the
/// poll budget is exhausted, per spec §4.9's "callers should retry with
/// backoff" guidance for [`WireHashState::Pending`].
async fn resolve_input_hash(root: &Path, socket_path: &Path, task: &Task, environment: &[(String, String)]) -> Result<String, CliError> {
    let request = GetInputHashRequest {
        task_name: task.name.clone(),
        root: root.to_path_buf(),
        environment: environment.to_vec(),
    };

    for attempt in 0..INPUT_HASH_POLL_ATTEMPTS {
        let result: GetInputHashResult = rpc::call(socket_path, MessageType::GetInputHash, &request).await?;
        match (result.state, result.hash) {
            (WireHashState::Ready, Some(hash)) => return Ok(hash),
            (WireHashState::Unknown, _) if attempt == 0 => {
                // Give the daemon one more round trip: a just-loaded graph's
                // first request computes inline on the server, so a second
                // immediate poll is expected to land on `Ready`.
            }
            _ => tokio::time::sleep(INPUT_HASH_POLL_INTERVAL).await,
        }
    }
    Err(CliError::DaemonSpawnFailed(format!("input hash for '{}' never became ready", task.name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_renderer_ci_forces_linear() {
        // SAFETY: test-only, single-threaded within this test body.
        unsafe {
            std::env::set_var("CI", "true");
        }
        let (_, tui) = select_renderer(OutputFormat::Auto);
        assert!(tui.is_none());
        // SAFETY: test-only, single-threaded within this test body.
        unsafe {
            std::env::remove_var("CI");
        }
    }

    #[test]
    fn lower_wire_graph_round_trips_a_single_task() {
        let wire_task = WireTask {
            name: "build".to_string(),
            command: vec!["true".to_string()],
            inputs: vec![],
            outputs: vec![],
            tools: BTreeMap::new(),
            dependencies: vec![],
            environment: BTreeMap::new(),
            working_dir: PathBuf::from("/workspace"),
            rebuild: "on-change".to_string(),
        };
        let graph = lower_wire_graph(Path::new("/workspace"), vec![wire_task]).unwrap();
        assert!(graph.get_task("build").is_some());
    }
}
