//! Narrow interfaces to the subsystems this crate treats as external
//! collaborators: input resolution and hermetic tool environments.
//!
//! Each trait ships with exactly one concrete implementation, sufficient to
//! run end to end; richer implementations (a real toolchain provider, a
//! `.gitignore`-aware resolver) are out of scope.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Turns a task's input globs into concrete, resolved, absolute paths.
pub trait InputResolver: Send + Sync {
    /// Resolves `patterns` (relative to `root`) into absolute paths, in a
    /// stable order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InputResolutionFailed`] if a pattern fails to
    /// parse.
    fn resolve(&self, root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>>;
}

/// Resolves input globs with the `glob` crate, matching files relative to
/// the workspace root and returning absolute, deduplicated paths sorted
/// lexicographically for a stable hash input order.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobInputResolver;

impl InputResolver for GlobInputResolver {
    fn resolve(&self, root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
        let mut resolved = std::collections::BTreeSet::new();
        for pattern in patterns {
            let full_pattern = root.join(pattern);
            let full_pattern = full_pattern.to_string_lossy().into_owned();
            let entries = glob::glob(&full_pattern).map_err(|source| Error::InputResolutionFailed {
                pattern: pattern.clone(),
                source,
            })?;
            for entry in entries.flatten() {
                if entry.is_file() {
                    resolved.insert(entry);
                }
            }
        }
        Ok(resolved.into_iter().collect())
    }
}

/// Resolves a task's `tools` map into a list of `KEY=VALUE` strings to
/// overlay onto the task's environment, the "hermetic toolchain provider"
/// collaborator.
pub trait ToolEnvironment: Send + Sync {
    /// Resolves `tools` into an ordered list of environment assignments.
    /// A `PATH` entry, if present, is treated specially by the executor's
    /// environment composition step (prepended, not overwritten).
    ///
    /// # Errors
    ///
    /// Implementations may fail to resolve a tool version; the trait
    /// leaves the error type to [`crate::error::Error`] for composability.
    fn resolve(&self, tools: &BTreeMap<String, String>) -> Result<Vec<(String, String)>>;
}

/// Records each `alias=spec` pair as `SAME_TOOL_<ALIAS>=<SPEC>` and
/// contributes no `PATH` entries.
///
/// Real toolchain materialization (fetching and pinning actual tool
/// versions onto `PATH`) is out of this crate's scope; this stands in as
/// the documented seam a production deployment would replace.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticToolEnvironment;

impl ToolEnvironment for StaticToolEnvironment {
    fn resolve(&self, tools: &BTreeMap<String, String>) -> Result<Vec<(String, String)>> {
        Ok(tools
            .iter()
            .map(|(alias, spec)| {
                let key = format!("SAME_TOOL_{}", alias.to_uppercase());
                (key, spec.clone())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_tool_environment_prefixes_alias() {
        let mut tools = BTreeMap::new();
        tools.insert("rust".to_string(), "1.82.0".to_string());
        let resolved = StaticToolEnvironment.resolve(&tools).unwrap();
        assert_eq!(resolved, vec![("SAME_TOOL_RUST".to_string(), "1.82.0".to_string())]);
    }

    #[test]
    fn glob_input_resolver_matches_and_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        let resolver = GlobInputResolver;
        let resolved = resolver
            .resolve(dir.path(), &["*.txt".to_string(), "*.txt".to_string()])
            .unwrap();
        assert_eq!(resolved.len(), 2);
    }
}
