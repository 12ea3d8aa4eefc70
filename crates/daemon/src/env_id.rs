//! Stable identifier for a tool set (spec §3's `envID`), used as the
//! `ServerCache` environment-cache key and echoed by clients in
//! `GetEnvironment` requests so they compute the same key the daemon would.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Digests the sorted `alias=spec` pairs of `tools` into a stable hex
/// identifier.
#[must_use]
pub fn compute(tools: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (alias, spec) in tools {
        hasher.update(alias.as_bytes());
        hasher.update(b"=");
        hasher.update(spec.as_bytes());
        hasher.update([b';']);
    }
    hex::encode(hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_tool_sets_produce_the_same_id() {
        let mut a = BTreeMap::new();
        a.insert("node".to_string(), "20.11.0".to_string());
        let mut b = BTreeMap::new();
        b.insert("node".to_string(), "20.11.0".to_string());
        assert_eq!(compute(&a), compute(&b));
    }

    #[test]
    fn different_versions_produce_different_ids() {
        let mut a = BTreeMap::new();
        a.insert("node".to_string(), "20.11.0".to_string());
        let mut b = BTreeMap::new();
        b.insert("node".to_string(), "18.0.0".to_string());
        assert_ne!(compute(&a), compute(&b));
    }
}
