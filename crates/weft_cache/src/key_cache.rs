//! In-memory map from module keys to compiled artifacts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use weft_common::ContentHash;

use crate::module_key::ModuleKey;

/// A stored key together with the artifact compiled for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The key the artifact was compiled under.
    pub key: ModuleKey,
    /// Path of the compiled artifact.
    pub artifact: PathBuf,
}

/// Cache of compiled extension modules.
///
/// Slots are addressed by [`ModuleKey::identity`]: storing a key whose body
/// and dependency files match an existing entry replaces that entry. A lookup
/// only succeeds when every dependency stamp matches as well and the artifact
/// is still on disk.
#[derive(Debug, Default)]
pub struct ModuleKeyCache {
    entries: HashMap<ContentHash, CacheEntry>,
}

impl ModuleKeyCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a cache from persisted entries.
    pub fn from_entries(entries: impl IntoIterator<Item = CacheEntry>) -> Self {
        let mut cache = Self::new();
        for entry in entries {
            cache.put(entry.key, entry.artifact);
        }
        cache
    }

    /// Looks up the artifact for `key`, validating all dependency stamps.
    pub fn get(&self, key: &ModuleKey) -> Option<&Path> {
        let entry = self.entries.get(&key.identity())?;
        if entry.key.same_stamps(key) && entry.artifact.exists() {
            Some(&entry.artifact)
        } else {
            None
        }
    }

    /// Stores `artifact` for `key`, returning the artifact it displaced, if any.
    pub fn put(&mut self, key: ModuleKey, artifact: PathBuf) -> Option<PathBuf> {
        let identity = key.identity();
        if let Some(existing) = self.entries.get(&identity) {
            debug_assert!(existing.key.same_identity(&key));
        }
        self.entries
            .insert(identity, CacheEntry { key, artifact })
            .map(|old| old.artifact)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Stamp;
    use std::collections::BTreeMap;

    fn key(body: &str, deps: &[(&str, &str)]) -> ModuleKey {
        ModuleKey {
            body: body.to_string(),
            deps: deps
                .iter()
                .map(|(p, s)| (p.to_string(), Stamp::Content(ContentHash::from_bytes(s.as_bytes()))))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn artifact(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name).unwrap();
        path
    }

    #[test]
    fn identical_key_hits() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ModuleKeyCache::new();
        let a = artifact(dir.path(), "a.tbl");
        cache.put(key("module M", &[("Foo.grm", "1")]), a.clone());

        assert_eq!(cache.get(&key("module M", &[("Foo.grm", "1")])), Some(a.as_path()));
    }

    #[test]
    fn changed_stamp_misses() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ModuleKeyCache::new();
        cache.put(key("module M", &[("Foo.grm", "1")]), artifact(dir.path(), "a.tbl"));

        assert!(cache.get(&key("module M", &[("Foo.grm", "2")])).is_none());
    }

    #[test]
    fn put_with_same_identity_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ModuleKeyCache::new();
        let a = artifact(dir.path(), "a.tbl");
        let b = artifact(dir.path(), "b.tbl");
        cache.put(key("module M", &[("Foo.grm", "1")]), a.clone());
        let displaced = cache.put(key("module M", &[("Foo.grm", "2")]), b.clone());

        assert_eq!(displaced, Some(a));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("module M", &[("Foo.grm", "2")])), Some(b.as_path()));
        assert!(cache.get(&key("module M", &[("Foo.grm", "1")])).is_none());
    }

    #[test]
    fn different_dependency_files_use_separate_slots() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ModuleKeyCache::new();
        cache.put(key("m", &[("A.grm", "1")]), artifact(dir.path(), "a.tbl"));
        cache.put(key("m", &[("B.grm", "1")]), artifact(dir.path(), "b.tbl"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn deleted_artifact_misses() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ModuleKeyCache::new();
        let a = artifact(dir.path(), "a.tbl");
        cache.put(key("m", &[]), a.clone());
        std::fs::remove_file(&a).unwrap();
        assert!(cache.get(&key("m", &[])).is_none());
    }

    #[test]
    fn from_entries_restores() {
        let dir = tempfile::tempdir().unwrap();
        let a = artifact(dir.path(), "a.tbl");
        let cache = ModuleKeyCache::from_entries(vec![CacheEntry {
            key: key("m", &[("A.grm", "1")]),
            artifact: a.clone(),
        }]);
        assert_eq!(cache.get(&key("m", &[("A.grm", "1")])), Some(a.as_path()));
    }
}
