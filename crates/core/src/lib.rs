//! Core data model for `same`: the task graph, the content-fingerprint
//! algorithm, build-info records, and the narrow collaborator traits
//! (config loading, input resolution, tool environments) the rest of the
//! workspace builds on.
//!
//! ```rust,no_run
//! use same_core::config::{ConfigLoader, YamlConfigLoader};
//! use std::path::Path;
//!
//! let graph = YamlConfigLoader.load(Path::new(".")).unwrap();
//! for task in graph.walk() {
//!     println!("{}", task.name);
//! }
//! ```

pub mod build_info;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod task;

pub use build_info::BuildInfo;
pub use error::{Error, Result};
pub use fingerprint::{compute_input_hash, compute_output_hash, exposed_hex, FingerprintInput};
pub use graph::{Graph, ValidatedGraph};
pub use task::{RebuildStrategy, Task};
