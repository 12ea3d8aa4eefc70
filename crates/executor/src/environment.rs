//! Environment composition (spec §4.4): allow-list, tool overlay, task
//! overlay.

use std::collections::BTreeMap;
use std::env;

/// System environment variables forwarded into every task, regardless of
/// tool or task overrides. Widening this list is a semantic change to the
/// runner's hermeticity guarantee.
pub const ALLOWED_SYSTEM_VARS: &[&str] = &["HOME", "TERM", "USER", "PATH"];

/// Builds the final environment for a task invocation:
///
/// 1. filter the real process environment through [`ALLOWED_SYSTEM_VARS`];
/// 2. apply `tool_env`, special-casing `PATH` to prepend rather than
///    overwrite;
/// 3. apply `task_env` as the final, unconditional overlay (including
///    `PATH`).
///
/// Returns an ordered list of `KEY=VALUE` pairs suitable for a child
/// process environment.
#[must_use]
pub fn compose(tool_env: &[(String, String)], task_env: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut env: BTreeMap<String, String> = ALLOWED_SYSTEM_VARS
        .iter()
        .filter_map(|&key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
        .collect();

    for (key, value) in tool_env {
        if key == "PATH" {
            let existing = env.get("PATH").cloned().unwrap_or_default();
            let joined = if existing.is_empty() {
                value.clone()
            } else {
                format!("{value}{}{existing}", path_list_separator())
            };
            env.insert("PATH".to_string(), joined);
        } else {
            env.insert(key.clone(), value.clone());
        }
    }

    for (key, value) in task_env {
        env.insert(key.clone(), value.clone());
    }

    env.into_iter().collect()
}

#[cfg(unix)]
fn path_list_separator() -> char {
    ':'
}

#[cfg(not(unix))]
fn path_list_separator() -> char {
    ';'
}

/// Resolves `argv0` against an already-composed `PATH`, honoring the
/// empty-path-segment-means-"." rule. Returns the absolute path of the
/// first executable file found.
///
/// If `argv0` is itself absolute, it is returned unchanged without a
/// filesystem check (the executor surfaces a spawn failure if it turns out
/// not to exist).
#[must_use]
pub fn resolve_executable(argv0: &str, path: Option<&str>) -> Option<std::path::PathBuf> {
    let candidate = std::path::Path::new(argv0);
    if candidate.is_absolute() {
        return Some(candidate.to_path_buf());
    }

    let path = path.map(str::to_string).or_else(|| env::var("PATH").ok())?;
    for segment in path.split(path_list_separator()) {
        let dir = if segment.is_empty() { "." } else { segment };
        let full = std::path::Path::new(dir).join(argv0);
        if is_executable_file(&full) {
            return Some(full);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable_file(path: &std::path::Path) -> bool {
    fs_metadata_is_file(path) && fs_mode(path).is_some_and(|mode| mode & 0o111 != 0)
}

#[cfg(unix)]
fn fs_mode(path: &std::path::Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).ok().map(|m| m.permissions().mode())
}

#[cfg(not(unix))]
fn is_executable_file(path: &std::path::Path) -> bool {
    fs_metadata_is_file(path)
}

fn fs_metadata_is_file(path: &std::path::Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_env_overrides_tool_path() {
        let mut task_env = BTreeMap::new();
        task_env.insert("PATH".to_string(), "/task/bin".to_string());
        let composed = compose(&[("PATH".to_string(), "/tool/bin".to_string())], &task_env);
        let path = composed.iter().find(|(k, _)| k == "PATH").unwrap();
        assert_eq!(path.1, "/task/bin");
    }

    #[test]
    fn tool_path_is_prepended_not_overwritten() {
        // SAFETY: test-only, single-threaded within this test body.
        unsafe {
            std::env::set_var("PATH", "/usr/bin");
        }
        let composed = compose(&[("PATH".to_string(), "/tool/bin".to_string())], &BTreeMap::new());
        let path = composed.iter().find(|(k, _)| k == "PATH").unwrap();
        assert_eq!(path.1, "/tool/bin:/usr/bin");
    }

    #[test]
    fn disallowed_system_vars_are_dropped() {
        // SAFETY: test-only, single-threaded within this test body.
        unsafe {
            std::env::set_var("SAME_TEST_SECRET", "leaked");
        }
        let composed = compose(&[], &BTreeMap::new());
        assert!(composed.iter().all(|(k, _)| k != "SAME_TEST_SECRET"));
    }

    #[test]
    fn resolve_executable_returns_absolute_argv0_unchanged() {
        let resolved = resolve_executable("/bin/sh", None);
        assert_eq!(resolved, Some(std::path::PathBuf::from("/bin/sh")));
    }

    #[test]
    fn resolve_executable_treats_empty_segment_as_dot() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("mytool");
        std::fs::write(&bin, b"#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let resolved = resolve_executable("mytool", Some(""));
        std::env::set_current_dir(cwd).unwrap();
        #[cfg(unix)]
        assert!(resolved.is_some());
        let _ = resolved;
    }
}
