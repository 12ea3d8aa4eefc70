//! Persistent per-task build-info store (spec §4.3).
//!
//! One JSON file per task, named `<sha256(task name) hex>.json`, under
//! `<root>/.same/store/`. A missing file is not an error — [`BuildInfoStore::get`]
//! returns `Ok(None)`, the "absent" sentinel — only I/O and parse failures
//! surface as [`Error`].
//!
//! ```rust,no_run
//! use same_core::BuildInfo;
//! use same_store::BuildInfoStore;
//! use std::path::Path;
//!
//! let store = BuildInfoStore::new(Path::new("/workspace"));
//! if let Some(info) = store.get("build").unwrap() {
//!     println!("last input hash: {}", info.input_hash);
//! }
//! store.put(&BuildInfo::new("build", "abc123", "")).unwrap();
//! ```

pub mod error;

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

pub use crate::error::{Error, Result};
use same_core::BuildInfo;

/// Directory mode for `<root>/.same/store/`: owner rwx, group rx, no
/// access for others.
#[cfg(unix)]
const STORE_DIR_MODE: u32 = 0o750;
/// File mode for individual build-info records: owner rw, others read.
#[cfg(unix)]
const STORE_FILE_MODE: u32 = 0o644;

/// A file-backed store of [`BuildInfo`] records, one per task, keyed by
/// `SHA-256(task name)`.
#[derive(Debug, Clone)]
pub struct BuildInfoStore {
    store_dir: PathBuf,
}

impl BuildInfoStore {
    /// Creates a store rooted at `<root>/.same/store/`. Does not touch the
    /// filesystem until [`BuildInfoStore::put`] is called.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            store_dir: root.join(".same").join("store"),
        }
    }

    fn record_path(&self, task_name: &str) -> PathBuf {
        let digest = Sha256::digest(task_name.as_bytes());
        self.store_dir.join(format!("{}.json", hex::encode(digest)))
    }

    /// Reads the record for `task_name`, or `None` if no run has ever been
    /// recorded for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreReadFailed`] or [`Error::StoreUnmarshalFailed`]
    /// if the file exists but cannot be read or parsed.
    pub fn get(&self, task_name: &str) -> Result<Option<BuildInfo>> {
        let path = self.record_path(task_name);
        match fs::read(&path) {
            Ok(bytes) => {
                let info = serde_json::from_slice(&bytes).map_err(|source| Error::StoreUnmarshalFailed {
                    path: path.clone(),
                    source,
                })?;
                Ok(Some(info))
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(Error::StoreReadFailed { path, source }),
        }
    }

    /// Persists `info`, creating the store directory on first use.
    ///
    /// Callers are responsible for ensuring at most one concurrent `put`
    /// per task name (the scheduler's unit of parallelism guarantees
    /// this).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreCreateFailed`], [`Error::StoreMarshalFailed`],
    /// or [`Error::StoreWriteFailed`].
    pub fn put(&self, info: &BuildInfo) -> Result<()> {
        self.ensure_dir()?;
        let path = self.record_path(&info.task_name);
        let bytes = serde_json::to_vec_pretty(info).map_err(|source| Error::StoreMarshalFailed {
            task: info.task_name.clone(),
            source,
        })?;
        fs::write(&path, &bytes).map_err(|source| Error::StoreWriteFailed {
            path: path.clone(),
            source,
        })?;
        self.set_file_mode(&path)?;
        Ok(())
    }

    fn ensure_dir(&self) -> Result<()> {
        if self.store_dir.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&self.store_dir).map_err(|source| Error::StoreCreateFailed {
            path: self.store_dir.clone(),
            source,
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.store_dir)
                .map_err(|source| Error::StoreCreateFailed {
                    path: self.store_dir.clone(),
                    source,
                })?
                .permissions();
            perms.set_mode(STORE_DIR_MODE);
            fs::set_permissions(&self.store_dir, perms).map_err(|source| Error::StoreCreateFailed {
                path: self.store_dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn set_file_mode(&self, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)
            .map_err(|source| Error::StoreWriteFailed {
                path: path.to_path_buf(),
                source,
            })?
            .permissions();
        perms.set_mode(STORE_FILE_MODE);
        fs::set_permissions(path, perms).map_err(|source| Error::StoreWriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    #[cfg(not(unix))]
    fn set_file_mode(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_task_returns_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = BuildInfoStore::new(dir.path());
        assert!(store.get("never-run").unwrap().is_none());
    }

    #[test]
    fn round_trips_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = BuildInfoStore::new(dir.path());
        let info = BuildInfo::new("build", "abc123", "def456");
        store.put(&info).unwrap();
        let fetched = store.get("build").unwrap().unwrap();
        assert_eq!(fetched, info);
    }

    #[test]
    fn put_overwrites_prior_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = BuildInfoStore::new(dir.path());
        store.put(&BuildInfo::new("build", "one", "")).unwrap();
        store.put(&BuildInfo::new("build", "two", "")).unwrap();
        let fetched = store.get("build").unwrap().unwrap();
        assert_eq!(fetched.input_hash, "two");
    }

    #[cfg(unix)]
    #[test]
    fn store_directory_has_restrictive_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = BuildInfoStore::new(dir.path());
        store.put(&BuildInfo::new("build", "one", "")).unwrap();
        let meta = fs::metadata(dir.path().join(".same").join("store")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, STORE_DIR_MODE);
    }

    #[test]
    fn different_task_names_hash_to_different_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = BuildInfoStore::new(dir.path());
        store.put(&BuildInfo::new("a", "1", "")).unwrap();
        store.put(&BuildInfo::new("b", "2", "")).unwrap();
        assert_eq!(store.get("a").unwrap().unwrap().input_hash, "1");
        assert_eq!(store.get("b").unwrap().unwrap().input_hash, "2");
    }
}
