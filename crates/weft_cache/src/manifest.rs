//! Persisted form of the module-key caches.
//!
//! The manifest is stored as `cache-manifest.json` in the cache directory and
//! lists every cached grammar and transformation artifact with its key.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::key_cache::CacheEntry;

/// Name of the manifest file within the cache directory.
pub const MANIFEST_FILE: &str = "cache-manifest.json";

/// Top-level cache manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheManifest {
    /// Toolchain version that produced this cache.
    pub toolchain_version: String,

    /// Compiled grammar modules.
    pub grammar: Vec<CacheEntry>,

    /// Compiled transformation modules.
    pub transformation: Vec<CacheEntry>,
}

impl CacheManifest {
    /// Creates an empty manifest for the given toolchain version.
    pub fn new(toolchain_version: &str) -> Self {
        Self {
            toolchain_version: toolchain_version.to_string(),
            grammar: Vec::new(),
            transformation: Vec::new(),
        }
    }

    /// Loads the manifest from the cache directory, returning `None` if
    /// the file doesn't exist or can't be parsed.
    pub fn load(cache_dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(cache_dir.join(MANIFEST_FILE)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Saves the manifest to the cache directory, creating it if needed.
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        std::fs::create_dir_all(cache_dir).map_err(|e| CacheError::io(cache_dir, e))?;
        let path = cache_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        std::fs::write(&path, json).map_err(|e| CacheError::io(path, e))
    }

    /// Returns `true` if this manifest was produced by a compatible toolchain.
    pub fn is_compatible(&self, current_version: &str) -> bool {
        self.toolchain_version == current_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_key::ModuleKey;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = CacheManifest::new("base-1");
        m.grammar.push(CacheEntry {
            key: ModuleKey {
                body: "module M-grammar".to_string(),
                deps: BTreeMap::new(),
            },
            artifact: PathBuf::from("/c/grammar/abc.tbl"),
        });
        m.save(dir.path()).unwrap();

        let loaded = CacheManifest::load(dir.path()).unwrap();
        assert_eq!(loaded.toolchain_version, "base-1");
        assert_eq!(loaded.grammar.len(), 1);
        assert!(loaded.transformation.is_empty());
        assert_eq!(loaded.grammar[0].key.body, "module M-grammar");
    }

    #[test]
    fn load_nonexistent_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CacheManifest::load(dir.path()).is_none());
    }

    #[test]
    fn load_corrupt_json_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "not valid json {{{").unwrap();
        assert!(CacheManifest::load(dir.path()).is_none());
    }

    #[test]
    fn compatibility() {
        let m = CacheManifest::new("base-1");
        assert!(m.is_compatible("base-1"));
        assert!(!m.is_compatible("base-2"));
    }

    #[test]
    fn save_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deeply").join("nested");
        CacheManifest::new("v").save(&nested).unwrap();
        assert!(nested.join(MANIFEST_FILE).exists());
    }
}
