//! The daemon's accept loop and RPC dispatch (spec §4.9), grounded on
//! `crates/cuenv/src/coordinator/server.rs`'s `EventCoordinator::run`
//! (`UnixListener::bind`, stale-socket cleanup, PID file write, per-client
//! `tokio::spawn`, `tokio::select!` over accept/idle/shutdown).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use same_core::collaborators::{InputResolver, ToolEnvironment};
use same_core::config::ConfigLoader;
use same_core::{compute_input_hash, exposed_hex, FingerprintInput, ValidatedGraph};
use same_executor::{Executor, PtyDimensions};
use same_wire::{
    ExecuteTaskComplete, ExecuteTaskLog, ExecuteTaskRequest, GetEnvironmentRequest, GetEnvironmentResult, GetGraphRequest,
    GetGraphResult, GetInputHashRequest, GetInputHashResult, HashState as WireHashState, MessageType, StatusResult,
    WireMessage, WireTask,
};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::env_id;
use crate::error::{Error, Result};
use crate::hash_cache::{self, HashCache};
use crate::lifecycle::DaemonLifecycle;
use crate::paths;
use crate::rehash;
use crate::server_cache::ServerCache;
use crate::watcher::{Debouncer, Watcher, DEFAULT_DEBOUNCE_WINDOW};

/// Background rehash worker tick interval.
const REHASH_TICK_INTERVAL: Duration = Duration::from_millis(200);

/// The daemon process: owns every long-lived subsystem and serves the RPC
/// surface over a Unix-domain socket.
pub struct DaemonServer {
    root: PathBuf,
    config_loader: Arc<dyn ConfigLoader>,
    tool_env: Arc<dyn ToolEnvironment>,
    input_resolver: Arc<dyn InputResolver>,
    executor: Arc<Executor>,
    lifecycle: Arc<DaemonLifecycle>,
    server_cache: Arc<ServerCache>,
    hash_cache: Arc<HashCache>,
}

impl DaemonServer {
    /// Builds a daemon for `root` from its collaborators.
    #[must_use]
    pub fn new(
        root: PathBuf,
        config_loader: Arc<dyn ConfigLoader>,
        tool_env: Arc<dyn ToolEnvironment>,
        input_resolver: Arc<dyn InputResolver>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            root,
            config_loader,
            tool_env,
            input_resolver,
            executor: Arc::new(Executor),
            lifecycle: Arc::new(DaemonLifecycle::new(idle_timeout)),
            server_cache: Arc::new(ServerCache::new()),
            hash_cache: Arc::new(HashCache::new()),
        }
    }

    /// Binds the socket, writes the PID file, and serves connections until
    /// idle timeout or explicit shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SocketBindFailed`] or [`Error::Io`].
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let dir = paths::daemon_dir(&self.root);
        std::fs::create_dir_all(&dir).map_err(|source| Error::Io { path: dir.clone(), source })?;

        let socket_path = paths::socket_path(&self.root);
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path).map_err(|source| Error::SocketBindFailed {
            path: socket_path.clone(),
            source,
        })?;
        set_restrictive_mode(&socket_path);

        let pid_path = paths::pid_path(&self.root);
        std::fs::write(&pid_path, std::process::id().to_string())
            .map_err(|source| Error::Io { path: pid_path.clone(), source })?;

        info!(socket = %socket_path.display(), "daemon listening");

        let shutdown = self.lifecycle.shutdown_token();
        let watch_handle = tokio::spawn(run_watch_loop(self.root.clone(), Arc::clone(&self.hash_cache), shutdown.clone()));
        let rehash_handle = tokio::spawn(rehash::run(
            Arc::clone(&self.hash_cache),
            Arc::clone(&self.server_cache),
            Arc::clone(&self.input_resolver),
            REHASH_TICK_INTERVAL,
            shutdown.clone(),
        ));
        let idle_handle = tokio::spawn({
            let lifecycle = Arc::clone(&self.lifecycle);
            async move { lifecycle.watch_idle().await }
        });

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("shutdown signal received");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            self.lifecycle.reset_timer();
                            let this = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(source) = this.handle_connection(stream).await {
                                    debug!(%source, "client connection ended with an error");
                                }
                            });
                        }
                        Err(source) => warn!(%source, "failed to accept connection"),
                    }
                }
            }
        }

        watch_handle.abort();
        rehash_handle.abort();
        idle_handle.abort();
        let _ = std::fs::remove_file(&socket_path);
        let _ = std::fs::remove_file(&pid_path);
        Ok(())
    }

    async fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let (mut read_half, mut write_half) = stream.into_split();
        loop {
            let request = match WireMessage::read_from(&mut read_half).await {
                Ok(request) => request,
                Err(_) => return Ok(()),
            };
            self.lifecycle.reset_timer();

            let correlation_id = request.correlation_id;
            let reply = match request.msg_type {
                MessageType::Ping => Some(WireMessage::pong(correlation_id)),
                MessageType::Status => Some(self.handle_status(correlation_id)),
                MessageType::Shutdown => {
                    self.lifecycle.shutdown();
                    Some(WireMessage::empty(MessageType::Shutdown, correlation_id))
                }
                MessageType::GetGraph => Some(self.handle_get_graph(&request)?),
                MessageType::GetEnvironment => Some(self.handle_get_environment(&request)?),
                MessageType::GetInputHash => Some(self.handle_get_input_hash(&request)?),
                MessageType::ExecuteTask => {
                    self.handle_execute_task(&request, &mut write_half).await?;
                    None
                }
                other => Some(WireMessage::error(correlation_id, format!("unexpected request type {other:?}"))),
            };

            if let Some(reply) = reply {
                reply.write_to(&mut write_half).await?;
            }
        }
    }

    fn handle_status(&self, correlation_id: Uuid) -> WireMessage {
        let status = StatusResult {
            running: true,
            pid: std::process::id(),
            uptime_secs: self.lifecycle.uptime().as_secs(),
            last_activity_secs_ago: self.lifecycle.since_last_activity().as_secs(),
            idle_remaining_secs: self.lifecycle.idle_remaining().as_secs(),
        };
        WireMessage::with_payload(MessageType::StatusResult, correlation_id, &status)
            .expect("StatusResult always serializes")
    }

    fn handle_get_graph(&self, request: &WireMessage) -> Result<WireMessage> {
        let req: GetGraphRequest = request
            .payload_as()
            .map_err(|source| Error::MalformedRequest(source.to_string()))?;

        if let Some(graph) = self.server_cache.get_graph(&req.cwd, &req.mtimes) {
            let result = GetGraphResult { tasks: to_wire_tasks(&graph), cache_hit: true };
            return WireMessage::with_payload(MessageType::GetGraphResult, request.correlation_id, &result)
                .map_err(Into::into);
        }

        let graph = Arc::new(self.config_loader.load(&req.cwd)?);
        self.server_cache.put_graph(req.cwd.clone(), Arc::clone(&graph), req.mtimes);
        let result = GetGraphResult { tasks: to_wire_tasks(&graph), cache_hit: false };
        WireMessage::with_payload(MessageType::GetGraphResult, request.correlation_id, &result).map_err(Into::into)
    }

    fn handle_get_environment(&self, request: &WireMessage) -> Result<WireMessage> {
        let req: GetEnvironmentRequest = request
            .payload_as()
            .map_err(|source| Error::MalformedRequest(source.to_string()))?;
        let key = env_id::compute(&req.tools);
        debug_assert_eq!(key, req.env_id, "client-computed envID must match the daemon's");

        if let Some(environment) = self.server_cache.get_environment(&req.env_id) {
            let result = GetEnvironmentResult { environment, cache_hit: true };
            return WireMessage::with_payload(MessageType::GetEnvironmentResult, request.correlation_id, &result)
                .map_err(Into::into);
        }

        let environment = self.tool_env.resolve(&req.tools)?;
        self.server_cache.put_environment(req.env_id.clone(), environment.clone());
        let result = GetEnvironmentResult { environment, cache_hit: false };
        WireMessage::with_payload(MessageType::GetEnvironmentResult, request.correlation_id, &result).map_err(Into::into)
    }

    fn handle_get_input_hash(&self, request: &WireMessage) -> Result<WireMessage> {
        let req: GetInputHashRequest = request
            .payload_as()
            .map_err(|source| Error::MalformedRequest(source.to_string()))?;
        let key = hash_cache::HashCacheKey::new(req.root.clone(), req.task_name.clone(), &req.environment);

        let result = match self.hash_cache.get(&key) {
            hash_cache::HashState::Ready(hash) => GetInputHashResult { state: WireHashState::Ready, hash: Some(hash) },
            hash_cache::HashState::Pending => GetInputHashResult { state: WireHashState::Pending, hash: None },
            hash_cache::HashState::Unknown => {
                match self.compute_hash_now(&req) {
                    Ok(hash) => GetInputHashResult { state: WireHashState::Ready, hash: Some(hash) },
                    Err(source) => {
                        warn!(task = %req.task_name, %source, "failed to compute input hash inline");
                        GetInputHashResult { state: WireHashState::Unknown, hash: None }
                    }
                }
            }
        };
        WireMessage::with_payload(MessageType::GetInputHashResult, request.correlation_id, &result).map_err(Into::into)
    }

    fn compute_hash_now(&self, req: &GetInputHashRequest) -> Result<String> {
        let graph = self
            .server_cache
            .graph_for(&req.root)
            .ok_or_else(|| Error::TaskNotFound(req.task_name.clone()))?;
        let task = graph.get_task(&req.task_name).ok_or_else(|| Error::TaskNotFound(req.task_name.clone()))?;

        let resolved_inputs = self.input_resolver.resolve(&req.root, &task.inputs)?;
        let environment: BTreeMap<String, String> = req.environment.iter().cloned().collect();
        let input = FingerprintInput {
            command: task.command.clone(),
            tools: task.tools.clone(),
            environment,
            resolved_inputs: resolved_inputs.clone(),
            working_dir: task.working_dir.clone(),
        };
        let digest = compute_input_hash(&input)?;
        let hash = exposed_hex(&digest);
        let key = hash_cache::HashCacheKey::new(req.root.clone(), req.task_name.clone(), &req.environment);
        self.hash_cache.put(key, hash.clone(), req.environment.clone(), resolved_inputs);
        Ok(hash)
    }

    async fn handle_execute_task(&self, request: &WireMessage, writer: &mut (impl tokio::io::AsyncWrite + Unpin)) -> Result<()> {
        let correlation_id = request.correlation_id;
        let req: ExecuteTaskRequest = match request.payload_as() {
            Ok(req) => req,
            Err(source) => {
                WireMessage::error(correlation_id, source.to_string()).write_to(writer).await?;
                return Ok(());
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let sink: Arc<Mutex<dyn std::io::Write + Send>> = Arc::new(Mutex::new(ChannelWriter { tx }));
        let executor = Arc::clone(&self.executor);
        let dims = PtyDimensions { rows: req.pty_rows, cols: req.pty_cols };

        let task_name = req.task_name.clone();
        let join = tokio::task::spawn_blocking(move || {
            executor.start_prepared(req.command, req.environment, req.working_dir, dims, sink)
        });

        while let Some(chunk) = rx.recv().await {
            WireMessage::with_payload(MessageType::ExecuteTaskLog, correlation_id, &ExecuteTaskLog { chunk })?
                .write_to(writer)
                .await?;
        }

        let exit_code = match join.await.expect("execute task panicked") {
            Ok(handle) => match handle.wait() {
                Ok(()) => 0,
                Err(same_executor::Error::TaskExecutionFailed { exit_code }) => exit_code,
                Err(source) => {
                    warn!(task = %task_name, %source, "task wait failed");
                    -1
                }
            },
            Err(source) => {
                warn!(task = %task_name, %source, "task failed to start");
                -1
            }
        };

        WireMessage::with_payload(MessageType::ExecuteTaskComplete, correlation_id, &ExecuteTaskComplete { exit_code })?
            .write_to(writer)
            .await?;
        Ok(())
    }
}

/// Adapts the executor's blocking `Write` sink into an unbounded async
/// channel so output streams to the client as it is produced, not only
/// after the task finishes.
struct ChannelWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl std::io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _ = self.tx.send(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn to_wire_tasks(graph: &ValidatedGraph) -> Vec<WireTask> {
    graph
        .walk()
        .map(|task| WireTask {
            name: task.name.clone(),
            command: task.command.clone(),
            inputs: task.inputs.clone(),
            outputs: task.outputs.clone(),
            tools: task.tools.clone(),
            dependencies: task.dependencies.clone(),
            environment: task.environment.clone(),
            working_dir: task.working_dir.clone(),
            rebuild: match task.rebuild {
                same_core::RebuildStrategy::OnChange => "on-change".to_string(),
                same_core::RebuildStrategy::Always => "always".to_string(),
            },
        })
        .collect()
}

/// Runs the recursive watch + debounce loop for `root`, invalidating
/// `hash_cache` entries as changes settle.
async fn run_watch_loop(root: PathBuf, hash_cache: Arc<HashCache>, shutdown: CancellationToken) {
    let mut watcher = match Watcher::start(&root) {
        Ok(watcher) => watcher,
        Err(source) => {
            warn!(%source, "filesystem watcher failed to start, hash cache will not auto-invalidate");
            return;
        }
    };
    let mut debouncer = Debouncer::new(DEFAULT_DEBOUNCE_WINDOW);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                for path in debouncer.drain() {
                    hash_cache.invalidate_path(&path);
                }
                return;
            }
            event = watcher.recv() => {
                match event {
                    Some(event) => debouncer.add(event.path),
                    None => return,
                }
            }
            batch = debouncer.flush() => {
                for path in batch {
                    hash_cache.invalidate_path(&path);
                }
            }
        }
    }
}

#[cfg(unix)]
fn set_restrictive_mode(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o750);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_restrictive_mode(_path: &std::path::Path) {}
