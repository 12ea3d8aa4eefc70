//! Loading a workspace YAML file into a validated [`crate::graph::Graph`].
//!
//! This is the concrete, deliberately thin `ConfigLoader` implementation:
//! one `serde_yaml::from_str` call plus a direct field-by-field lowering
//! into [`crate::task::Task`]. No include files, no environment
//! interpolation, no schema validation layer beyond what `serde_yaml`
//! gives for free.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::{Graph, ValidatedGraph};
use crate::task::{RebuildStrategy, Task};

/// The on-disk shape of a workspace configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceFile {
    /// Schema version; currently always `"1"`.
    pub version: String,
    /// Optional human-readable project name.
    #[serde(default)]
    pub project: Option<String>,
    /// Workspace-level tool defaults, inherited by tasks that name the
    /// same alias without their own version.
    #[serde(default)]
    pub tools: BTreeMap<String, String>,
    /// Task name -> task definition.
    pub tasks: BTreeMap<String, TaskFile>,
}

/// The on-disk shape of one task entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFile {
    /// Input path globs.
    #[serde(default)]
    pub input: Vec<String>,
    /// Command vector.
    pub cmd: Vec<String>,
    /// Output path globs.
    #[serde(default)]
    pub target: Vec<String>,
    /// Per-task tool versions, overriding workspace-level defaults.
    #[serde(default)]
    pub tools: BTreeMap<String, String>,
    /// Names of tasks this one depends on.
    #[serde(default, rename = "dependsOn")]
    pub depends_on: Vec<String>,
    /// Literal environment overlay.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Working directory, relative to the workspace root.
    #[serde(default, rename = "workingDir")]
    pub working_dir: Option<String>,
    /// `"on-change"` (default) or `"always"`.
    #[serde(default)]
    pub rebuild: Option<String>,
}

/// Loads a workspace and returns a validated [`Graph`].
pub trait ConfigLoader: Send + Sync {
    /// Loads the workspace rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigNotFound`], [`Error::ConfigReadFailed`], or
    /// [`Error::ConfigParseFailed`] on failure, or any [`crate::graph::Graph::validate`]
    /// error if the resulting graph is malformed.
    fn load(&self, root: &Path) -> Result<ValidatedGraph>;
}

/// The conventional file name searched for at the workspace root.
pub const CONFIG_FILE_NAME: &str = "same.yaml";

/// Loads `same.yaml` at a workspace root via `serde_yaml`.
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlConfigLoader;

impl YamlConfigLoader {
    /// Reads and parses the workspace file without lowering it into a
    /// graph, for callers (e.g. the daemon's config-mtime cache check)
    /// that need the raw mtimes of config paths before deciding whether to
    /// reparse.
    ///
    /// # Errors
    ///
    /// See [`ConfigLoader::load`].
    pub fn config_path(root: &Path) -> Result<PathBuf> {
        let candidate = root.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            Ok(candidate)
        } else {
            Err(Error::ConfigNotFound(root.to_path_buf()))
        }
    }

    fn parse(path: &Path) -> Result<WorkspaceFile> {
        let raw = fs::read_to_string(path).map_err(|source| Error::ConfigReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| Error::ConfigParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl ConfigLoader for YamlConfigLoader {
    fn load(&self, root: &Path) -> Result<ValidatedGraph> {
        let path = Self::config_path(root)?;
        let file = Self::parse(&path)?;
        lower(root, file)
    }
}

fn lower(root: &Path, file: WorkspaceFile) -> Result<ValidatedGraph> {
    let mut graph = Graph::new(root);
    for (name, task_file) in file.tasks {
        let mut tools = file.tools.clone();
        tools.extend(task_file.tools);

        let working_dir = task_file
            .working_dir
            .map(|dir| root.join(dir))
            .unwrap_or_else(|| root.to_path_buf());

        let rebuild = match task_file.rebuild {
            Some(raw) => RebuildStrategy::parse(&raw)?,
            None => RebuildStrategy::default(),
        };

        let task = Task {
            name,
            command: task_file.cmd,
            inputs: task_file.input,
            outputs: task_file.target,
            tools,
            dependencies: task_file.depends_on,
            environment: task_file.environment,
            working_dir,
            rebuild,
        };
        graph.add_task(task)?;
    }
    graph.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
version: "1"
tasks:
  build:
    cmd: ["echo", "hi"]
    input: ["src/**/*.rs"]
    target: ["out"]
"#,
        )
        .unwrap();

        let loader = YamlConfigLoader;
        let graph = loader.load(dir.path()).unwrap();
        assert_eq!(graph.len(), 1);
        assert!(graph.get_task("build").is_some());
    }

    #[test]
    fn missing_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let loader = YamlConfigLoader;
        let err = loader.load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(_)));
    }

    #[test]
    fn task_level_tools_override_workspace_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
version: "1"
tools:
  node: "20.11.0"
tasks:
  build:
    cmd: ["node", "build.js"]
    tools:
      node: "18.0.0"
"#,
        )
        .unwrap();
        let loader = YamlConfigLoader;
        let graph = loader.load(dir.path()).unwrap();
        let task = graph.get_task("build").unwrap();
        assert_eq!(task.tools.get("node").unwrap(), "18.0.0");
    }
}
