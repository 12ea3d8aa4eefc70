//! The `Task` data model: an immutable, hermetic unit of work.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Whether a task's outputs are considered stale purely based on input
/// content, or whether it must run on every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebuildStrategy {
    /// Run only when the computed input hash differs from the last
    /// recorded [`crate::build_info::BuildInfo`].
    #[default]
    OnChange,
    /// Always run, regardless of the cache.
    Always,
}

impl RebuildStrategy {
    /// Parses the `rebuild` field of a workspace config entry.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "on-change" => Ok(Self::OnChange),
            "always" => Ok(Self::Always),
            other => Err(Error::InvalidRebuildStrategy(other.to_string())),
        }
    }
}

/// A named, hermetic unit of work with declared inputs, outputs, command,
/// tools, and dependencies.
///
/// Tasks are immutable once loaded into a [`crate::graph::Graph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Unique name within the owning graph.
    pub name: String,
    /// Ordered argument vector; `command[0]` is resolved against `PATH` or
    /// treated as absolute by the executor.
    pub command: Vec<String>,
    /// Input path globs, relative to the workspace root, in declaration
    /// order.
    pub inputs: Vec<String>,
    /// Output path globs, relative to the workspace root, in declaration
    /// order.
    pub outputs: Vec<String>,
    /// Tool alias to version-spec string.
    pub tools: BTreeMap<String, String>,
    /// Names of tasks that must complete before this one is dispatched.
    pub dependencies: Vec<String>,
    /// Literal environment overlay applied last, after the tool
    /// environment.
    pub environment: BTreeMap<String, String>,
    /// Working directory for the command; defaults to the workspace root.
    pub working_dir: PathBuf,
    /// Cache policy for this task.
    pub rebuild: RebuildStrategy,
}

/// Reserved task names that collide with runner internals.
const RESERVED_NAMES: &[&str] = &["daemon", "version", "run"];

impl Task {
    /// Validates the task's own fields (name syntax, reserved names).
    /// Cross-task checks (missing dependencies, cycles) happen in
    /// [`crate::graph::Graph::validate`].
    pub fn validate_self(&self) -> Result<()> {
        if self.name.is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(Error::InvalidTaskName(self.name.clone()));
        }
        if RESERVED_NAMES.contains(&self.name.as_str()) {
            return Err(Error::ReservedTaskName(self.name.clone()));
        }
        Ok(())
    }
}
