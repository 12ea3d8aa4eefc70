//! Per-method request/reply payload shapes carried inside a
//! [`crate::WireMessage`]'s `payload` field.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::MtimeMap;

/// Reply to `Status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResult {
    /// Always `true`; a daemon that could reply is running by definition.
    pub running: bool,
    /// The daemon process's PID.
    pub pid: u32,
    /// Seconds since the daemon started.
    pub uptime_secs: u64,
    /// Seconds since the last RPC reset the idle timer.
    pub last_activity_secs_ago: u64,
    /// Seconds remaining before the idle timeout fires.
    pub idle_remaining_secs: u64,
}

/// A task, flattened for wire transport. Carries the same fields as
/// `same-core::Task`; kept as an independent DTO so this crate has no
/// dependency on the domain model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTask {
    /// The task's name.
    pub name: String,
    /// Command vector.
    pub command: Vec<String>,
    /// Input path globs.
    pub inputs: Vec<String>,
    /// Output path globs.
    pub outputs: Vec<String>,
    /// Tool alias -> version spec.
    pub tools: BTreeMap<String, String>,
    /// Names of direct dependencies.
    pub dependencies: Vec<String>,
    /// Literal environment overlay.
    pub environment: BTreeMap<String, String>,
    /// Working directory, absolute.
    pub working_dir: PathBuf,
    /// `"on-change"` or `"always"`.
    pub rebuild: String,
}

/// `GetGraph(cwd, mtimes)` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetGraphRequest {
    /// The workspace root the client wants parsed.
    pub cwd: PathBuf,
    /// The client's last-observed mtimes for every config file it read;
    /// an exact match against the server's cached entry is a cache hit.
    pub mtimes: MtimeMap,
}

/// `GetGraph` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetGraphResult {
    /// The graph's tasks, in the server's deterministic topological
    /// order.
    pub tasks: Vec<WireTask>,
    /// Whether the server's `ServerCache` entry satisfied the request
    /// without re-parsing.
    pub cache_hit: bool,
}

/// `GetEnvironment(envID, tools)` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetEnvironmentRequest {
    /// Stable identifier for this tool combination, computed by the
    /// client the same way the daemon would.
    pub env_id: String,
    /// Tool alias -> version spec to resolve.
    pub tools: BTreeMap<String, String>,
}

/// `GetEnvironment` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetEnvironmentResult {
    /// Resolved `KEY=VALUE` environment assignments.
    pub environment: Vec<(String, String)>,
    /// Whether the server's resolved-environment cache satisfied the
    /// request.
    pub cache_hit: bool,
}

/// `GetInputHash(taskName, root, env)` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetInputHashRequest {
    /// The task whose input hash is being asked for.
    pub task_name: String,
    /// The workspace root.
    pub root: PathBuf,
    /// The resolved environment the hash should be computed under.
    pub environment: Vec<(String, String)>,
}

/// The three states a `HashCache` entry can be in (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashState {
    /// A fresh hash is cached and returned.
    Ready,
    /// The entry exists but was invalidated; a background rehash is
    /// queued. Callers should retry with backoff.
    Pending,
    /// No entry has ever existed for this key.
    Unknown,
}

/// `GetInputHash` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetInputHashResult {
    /// Which of the three states the entry was in.
    pub state: HashState,
    /// The hash, present only when `state` is [`HashState::Ready`].
    pub hash: Option<String>,
}

/// `ExecuteTask(req)` request: the initial message of a streaming RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteTaskRequest {
    /// The task's name, for logging and correlation on the server side.
    pub task_name: String,
    /// Resolved argv, `command[0]` already resolved against `PATH`.
    pub command: Vec<String>,
    /// The task's working directory.
    pub working_dir: PathBuf,
    /// The fully composed (allow-list + tool + task overlay) environment.
    pub environment: Vec<(String, String)>,
    /// Initial PTY row count.
    pub pty_rows: u16,
    /// Initial PTY column count.
    pub pty_cols: u16,
}

/// One chunk of a streaming `ExecuteTask` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteTaskLog {
    /// Raw merged stdout/stderr bytes (PTYs have a single output stream
    /// by design; the pipe fallback preserves that behavior for parity).
    pub chunk: Vec<u8>,
}

/// The trailer closing out an `ExecuteTask` reply — the spec's
/// `x-exit-code` trailer, read by the client even when the RPC itself
/// reports failure on a non-zero exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteTaskComplete {
    /// The process's exit code.
    pub exit_code: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_task_roundtrips_through_json() {
        let task = WireTask {
            name: "build".to_string(),
            command: vec!["cargo".to_string(), "build".to_string()],
            inputs: vec!["src/**/*.rs".to_string()],
            outputs: vec!["target".to_string()],
            tools: BTreeMap::new(),
            dependencies: Vec::new(),
            environment: BTreeMap::new(),
            working_dir: PathBuf::from("/workspace"),
            rebuild: "on-change".to_string(),
        };
        let json = serde_json::to_string(&task).unwrap();
        let back: WireTask = serde_json::from_str(&json).unwrap();
        assert_eq!(task, back);
    }

    #[test]
    fn hash_state_serializes_as_plain_variant() {
        let json = serde_json::to_string(&HashState::Pending).unwrap();
        assert_eq!(json, "\"Pending\"");
    }
}
