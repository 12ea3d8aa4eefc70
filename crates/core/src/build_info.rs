//! The persisted record of a task's last successful execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A prior successful execution of a task, as persisted by
/// `same-store`'s `BuildInfoStore`.
///
/// Serialized as JSON, one file per task. Fields other than `task_name` are
/// omitted from the serialized form when at their zero value, so an
/// never-completed task and an absent record both read back as "no useful
/// history" without ambiguity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// The task this record describes.
    pub task_name: String,
    /// The input hash from the run that produced this record.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub input_hash: String,
    /// The output hash from the run that produced this record, empty if
    /// the task declares no outputs.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub output_hash: String,
    /// When this run completed.
    pub completed_at: DateTime<Utc>,
}

impl BuildInfo {
    /// Builds a fresh record for a just-completed task run.
    #[must_use]
    pub fn new(task_name: impl Into<String>, input_hash: impl Into<String>, output_hash: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            input_hash: input_hash.into(),
            output_hash: output_hash.into(),
            completed_at: Utc::now(),
        }
    }

    /// True when `candidate_input_hash` matches the hash recorded by this
    /// run, meaning the task can be skipped.
    #[must_use]
    pub fn matches(&self, candidate_input_hash: &str) -> bool {
        self.input_hash == candidate_input_hash
    }
}
