//! Cache key derivation
//!
//! A key is the truncated SHA256 of the canonical JSON form of the
//! dependency set plus the runtime segment. Maps are `BTreeMap`s, so the
//! order in which dependencies were requested never reaches the digest.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Dependencies that will be installed into one cache entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DependencySet {
    pub dependencies: BTreeMap<String, String>,
    pub dev_dependencies: BTreeMap<String, String>,
}

impl DependencySet {
    /// True when there is nothing to install
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.dev_dependencies.is_empty()
    }

    /// `name@range` list for messages
    pub fn describe(&self) -> String {
        self.dependencies
            .iter()
            .chain(self.dev_dependencies.iter())
            .map(|(name, range)| format!("{}@{}", name, range))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyMaterial<'a> {
    dependencies: &'a BTreeMap<String, String>,
    dev_dependencies: &'a BTreeMap<String, String>,
    runtime: &'a str,
}

/// Address of a cache entry: `<runtime>/<hash>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    runtime: String,
    hash: String,
}

impl CacheKey {
    /// Derive the key for a dependency set installed for `runtime`
    pub fn derive(set: &DependencySet, runtime: &str) -> Self {
        let material = KeyMaterial {
            dependencies: &set.dependencies,
            dev_dependencies: &set.dev_dependencies,
            runtime,
        };
        // Serializing string maps cannot fail
        let canonical = serde_json::to_vec(&material).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        let result = hasher.finalize();

        Self {
            runtime: runtime.to_string(),
            hash: hex::encode(&result[..6]),
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    /// Entry path relative to the cache root
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.runtime).join(&self.hash)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.runtime, self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(deps: &[(&str, &str)]) -> DependencySet {
        DependencySet {
            dependencies: deps
                .iter()
                .map(|(n, r)| (n.to_string(), r.to_string()))
                .collect(),
            dev_dependencies: BTreeMap::new(),
        }
    }

    #[test]
    fn key_is_deterministic() {
        let a = CacheKey::derive(&set(&[("semver", "^7.5.4")]), "node-20.11");
        let b = CacheKey::derive(&set(&[("semver", "^7.5.4")]), "node-20.11");
        assert_eq!(a, b);
        assert_eq!(a.hash().len(), 12);
    }

    #[test]
    fn key_ignores_insertion_order() {
        let mut first = DependencySet::default();
        first.dependencies.insert("b".to_string(), "2".to_string());
        first.dependencies.insert("a".to_string(), "1".to_string());

        let mut second = DependencySet::default();
        second.dependencies.insert("a".to_string(), "1".to_string());
        second.dependencies.insert("b".to_string(), "2".to_string());

        assert_eq!(
            CacheKey::derive(&first, "node-20"),
            CacheKey::derive(&second, "node-20")
        );
    }

    #[test]
    fn different_sets_differ() {
        let keys = [
            CacheKey::derive(&set(&[("semver", "^7.5.4")]), "node-20"),
            CacheKey::derive(&set(&[("semver", "^7.5.3")]), "node-20"),
            CacheKey::derive(&set(&[("semver", "^7.5.4"), ("chalk", "5")]), "node-20"),
            CacheKey::derive(&set(&[]), "node-20"),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a.hash(), b.hash());
            }
        }
    }

    #[test]
    fn dev_dependencies_are_distinct_from_dependencies() {
        let runtime = set(&[("x", "1")]);
        let mut dev = DependencySet::default();
        dev.dev_dependencies.insert("x".to_string(), "1".to_string());
        assert_ne!(
            CacheKey::derive(&runtime, "node-20").hash(),
            CacheKey::derive(&dev, "node-20").hash()
        );
    }

    #[test]
    fn runtime_changes_key_and_path() {
        let deps = set(&[("semver", "^7")]);
        let a = CacheKey::derive(&deps, "node-18");
        let b = CacheKey::derive(&deps, "node-20");
        assert_ne!(a.hash(), b.hash());
        assert_ne!(a.relative_path(), b.relative_path());
        assert!(a.relative_path().starts_with("node-18"));
    }

    #[test]
    fn describe_lists_all() {
        let mut deps = set(&[("a", "1")]);
        deps.dev_dependencies.insert("b".to_string(), "2".to_string());
        assert_eq!(deps.describe(), "a@1, b@2");
        assert!(!deps.is_empty());
        assert!(DependencySet::default().is_empty());
    }
}
