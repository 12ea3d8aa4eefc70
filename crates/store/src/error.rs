//! Errors for the `BuildInfoStore`.

use std::path::PathBuf;

/// Result alias for `same-store` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors the build-info store can raise.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The store directory could not be created.
    #[error("failed to create store directory {path}: {source}")]
    StoreCreateFailed {
        /// The directory that failed to create.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An existing record could not be read from disk.
    #[error("failed to read build-info record {path}: {source}")]
    StoreReadFailed {
        /// The record file that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An on-disk record failed to parse as JSON.
    #[error("failed to parse build-info record {path}: {source}")]
    StoreUnmarshalFailed {
        /// The record file that failed to parse.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be serialized to JSON.
    #[error("failed to serialize build-info record for task '{task}': {source}")]
    StoreMarshalFailed {
        /// The task whose record failed to serialize.
        task: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be written to disk.
    #[error("failed to write build-info record {path}: {source}")]
    StoreWriteFailed {
        /// The record file that failed to write.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
