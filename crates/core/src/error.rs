//! Domain error type shared by the graph, fingerprint, and config modules.

use std::path::PathBuf;

/// Result alias for `same-core` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, validating, or fingerprinting a
/// task graph.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A task with this name has already been added to the graph.
    #[error("task '{0}' already exists in the graph")]
    TaskAlreadyExists(String),

    /// A task depends on a name that resolves to no vertex.
    #[error("task '{task}' depends on missing task '{dependency}'")]
    MissingDependency {
        /// The task whose dependency is missing.
        task: String,
        /// The name that could not be resolved.
        dependency: String,
    },

    /// A dependency cycle was detected during validation.
    #[error("cycle detected in task graph: {0}")]
    CycleDetected(String),

    /// Topological sort failed for a reason other than a known cycle.
    #[error("failed to sort tasks topologically: {0}")]
    TopologicalSortFailed(String),

    /// A task name failed the identifier syntax check.
    #[error("invalid task name '{0}': task names must be non-empty and contain no whitespace")]
    InvalidTaskName(String),

    /// A task used a name reserved by the runner itself.
    #[error("task name '{0}' is reserved")]
    ReservedTaskName(String),

    /// `rebuild` carried a value other than `on-change` or `always`.
    #[error("invalid rebuild strategy '{0}', expected 'on-change' or 'always'")]
    InvalidRebuildStrategy(String),

    /// An input file could not be opened to compute its content hash.
    #[error("failed to open input file {path}: {source}")]
    FileOpenFailed {
        /// The file that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An input file's content could not be hashed.
    #[error("failed to hash input file {path}: {source}")]
    FileHashFailed {
        /// The file that failed to hash.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `stat`-like metadata could not be read for a path.
    #[error("failed to stat path {path}: {source}")]
    PathStatFailed {
        /// The path that could not be stat'd.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A declared input glob matched no files and resolution was strict.
    #[error("input not found: {0}")]
    InputNotFound(String),

    /// Glob expansion of a task's inputs or outputs failed.
    #[error("failed to resolve input pattern '{pattern}': {source}")]
    InputResolutionFailed {
        /// The glob pattern that failed to resolve.
        pattern: String,
        /// Underlying glob error.
        #[source]
        source: glob::PatternError,
    },

    /// An output path escaped the workspace root.
    #[error("output path '{0}' resolves outside the workspace root")]
    OutputPathOutsideRoot(String),

    /// The workspace configuration file could not be read.
    #[error("failed to read workspace config {path}: {source}")]
    ConfigReadFailed {
        /// The config file that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The workspace configuration file failed to parse as YAML.
    #[error("failed to parse workspace config {path}: {source}")]
    ConfigParseFailed {
        /// The config file that failed to parse.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },

    /// No workspace configuration file was found at or above a directory.
    #[error("no workspace config found starting from {0}")]
    ConfigNotFound(PathBuf),
}
