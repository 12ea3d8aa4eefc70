//! The canonical per-task input-hash algorithm.
//!
//! The hash is a fixed-position digest over the task's command, tool set,
//! environment, resolved input file contents, and working directory.
//! Metadata (mtime, mode) never enters the digest: touching a file without
//! changing its bytes must not invalidate the cache.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Number of hex characters exposed to callers (64 bits of the SHA-256
/// digest).
pub const EXPOSED_HASH_LEN: usize = 16;

/// Everything the fingerprint algorithm needs about one task invocation.
///
/// Built by the caller (typically the scheduler, via an [`crate::collaborators::InputResolver`])
/// before calling [`compute_input_hash`].
#[derive(Debug, Clone)]
pub struct FingerprintInput {
    /// The task's command vector.
    pub command: Vec<String>,
    /// Tool alias -> version spec, any order (sorted internally).
    pub tools: BTreeMap<String, String>,
    /// Environment variable map, any order (sorted internally).
    pub environment: BTreeMap<String, String>,
    /// Resolved absolute input paths, in caller-supplied order, already
    /// deduplicated by identity. The hasher does not resort or dedup.
    pub resolved_inputs: Vec<PathBuf>,
    /// The task's working directory.
    pub working_dir: PathBuf,
}

/// Computes the full-width SHA-256 input hash for a task invocation.
///
/// Returns the raw 32-byte digest; callers typically take
/// [`EXPOSED_HASH_LEN`] hex characters of [`hex::encode`] on the result as
/// the task's externally visible hash.
///
/// # Errors
///
/// Returns [`Error::FileOpenFailed`] or [`Error::FileHashFailed`] if any
/// resolved input cannot be read.
pub fn compute_input_hash(input: &FingerprintInput) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();

    for arg in &input.command {
        hasher.update(arg.as_bytes());
        hasher.update([0u8]);
    }

    for (alias, spec) in &input.tools {
        hasher.update(alias.as_bytes());
        hasher.update(b"=");
        hasher.update(spec.as_bytes());
        hasher.update([0u8]);
    }

    for (key, value) in &input.environment {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }

    for path in &input.resolved_inputs {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        let digest = hash_file(path)?;
        hasher.update(digest);
    }

    hasher.update(input.working_dir.to_string_lossy().as_bytes());

    Ok(hasher.finalize().into())
}

/// Computes the same digest over a set of resolved output paths, used to
/// record the output hash of a completed task.
///
/// # Errors
///
/// Returns [`Error::FileOpenFailed`] or [`Error::FileHashFailed`] if any
/// output cannot be read.
pub fn compute_output_hash(resolved_outputs: &[PathBuf]) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    for path in resolved_outputs {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        let digest = hash_file(path)?;
        hasher.update(digest);
    }
    Ok(hasher.finalize().into())
}

/// Hex-encodes a full digest and truncates to [`EXPOSED_HASH_LEN`]
/// characters, the externally visible form of an input or output hash.
#[must_use]
pub fn exposed_hex(digest: &[u8; 32]) -> String {
    hex::encode(digest)[..EXPOSED_HASH_LEN].to_string()
}

fn hash_file(path: &Path) -> Result<[u8; 32]> {
    let mut file = File::open(path).map_err(|source| Error::FileOpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|source| Error::FileHashFailed {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample_input(path: PathBuf) -> FingerprintInput {
        FingerprintInput {
            command: vec!["echo".to_string(), "hi".to_string()],
            tools: BTreeMap::new(),
            environment: BTreeMap::new(),
            resolved_inputs: vec![path],
            working_dir: PathBuf::from("/workspace"),
        }
    }

    #[test]
    fn touching_mtime_without_changing_bytes_keeps_hash_stable() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        let path = file.path().to_path_buf();

        let first = compute_input_hash(&sample_input(path.clone())).unwrap();
        // Simulate a touch: re-open and rewrite identical bytes.
        std::fs::write(&path, b"hello").unwrap();
        let second = compute_input_hash(&sample_input(path)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn changing_file_bytes_changes_hash() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        let path = file.path().to_path_buf();

        let first = compute_input_hash(&sample_input(path.clone())).unwrap();
        std::fs::write(&path, b"goodbye").unwrap();
        let second = compute_input_hash(&sample_input(path)).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn exposed_hex_is_truncated() {
        let digest = [1u8; 32];
        assert_eq!(exposed_hex(&digest).len(), EXPOSED_HASH_LEN);
    }

    #[test]
    fn environment_key_order_does_not_affect_hash() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"x").unwrap();
        let path = file.path().to_path_buf();

        let mut a = sample_input(path.clone());
        a.environment.insert("B".to_string(), "2".to_string());
        a.environment.insert("A".to_string(), "1".to_string());

        let mut b = sample_input(path);
        b.environment.insert("A".to_string(), "1".to_string());
        b.environment.insert("B".to_string(), "2".to_string());

        assert_eq!(
            compute_input_hash(&a).unwrap(),
            compute_input_hash(&b).unwrap()
        );
    }
}
