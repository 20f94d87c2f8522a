//! High-level cache of compiled extension modules.
//!
//! The `Cache` ties together the version marker, the grammar and
//! transformation module-key caches, their JSON manifest, and the artifact
//! directory layout. A `version` file in the cache directory records the
//! toolchain that populated it; when it disagrees with the running toolchain
//! the whole directory is discarded before use.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::artifact::ArtifactStore;
use crate::error::CacheError;
use crate::key_cache::ModuleKeyCache;
use crate::manifest::CacheManifest;
use crate::module_key::ModuleKey;

/// Name of the version marker file within the cache directory.
pub const VERSION_FILE: &str = "version";

/// The two kinds of extension module the driver compiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    /// Grammar modules, compiled to parse tables.
    Grammar,
    /// Transformation modules, compiled to executable programs.
    Transformation,
}

impl ExtensionKind {
    /// Subdirectory of the cache holding this kind's artifacts.
    pub fn subdir(self) -> &'static str {
        match self {
            ExtensionKind::Grammar => "grammar",
            ExtensionKind::Transformation => "transformation",
        }
    }
}

impl std::fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.subdir())
    }
}

/// Cache of compiled grammar and transformation modules.
pub struct Cache {
    cache_dir: PathBuf,
    toolchain_version: String,
    grammar: ModuleKeyCache,
    transformation: ModuleKeyCache,
    store: ArtifactStore,
    reset: bool,
}

impl Cache {
    /// Opens the cache in `cache_dir`, wiping it first if its version marker
    /// names a different toolchain.
    ///
    /// An unreadable manifest starts the caches empty.
    pub fn load_or_create(cache_dir: &Path, toolchain_version: &str) -> Result<Self, CacheError> {
        let reset = Self::check_version_marker(cache_dir, toolchain_version)?;

        let manifest = CacheManifest::load(cache_dir)
            .filter(|m| m.is_compatible(toolchain_version))
            .unwrap_or_else(|| CacheManifest::new(toolchain_version));
        debug!(
            grammar = manifest.grammar.len(),
            transformation = manifest.transformation.len(),
            "loaded module cache"
        );

        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            toolchain_version: toolchain_version.to_string(),
            grammar: ModuleKeyCache::from_entries(manifest.grammar),
            transformation: ModuleKeyCache::from_entries(manifest.transformation),
            store: ArtifactStore::new(cache_dir, toolchain_version),
            reset,
        })
    }

    /// Ensures the marker matches, wiping the directory on a mismatch.
    /// Returns `true` if the directory was wiped.
    fn check_version_marker(cache_dir: &Path, toolchain_version: &str) -> Result<bool, CacheError> {
        let marker = cache_dir.join(VERSION_FILE);
        let reset = match std::fs::read_to_string(&marker) {
            Ok(found) if found.trim() == toolchain_version => return Ok(false),
            Ok(found) => {
                info!(
                    found = found.trim(),
                    expected = toolchain_version,
                    "cache version changed, clearing {}",
                    cache_dir.display()
                );
                std::fs::remove_dir_all(cache_dir).map_err(|e| CacheError::io(cache_dir, e))?;
                true
            }
            Err(_) => false,
        };

        std::fs::create_dir_all(cache_dir).map_err(|e| CacheError::io(cache_dir, e))?;
        std::fs::write(&marker, toolchain_version).map_err(|e| CacheError::io(&marker, e))?;
        Ok(reset)
    }

    /// Returns `true` if opening the cache discarded a stale directory.
    pub fn was_reset(&self) -> bool {
        self.reset
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    fn keys(&self, kind: ExtensionKind) -> &ModuleKeyCache {
        match kind {
            ExtensionKind::Grammar => &self.grammar,
            ExtensionKind::Transformation => &self.transformation,
        }
    }

    /// Looks up a compiled artifact.
    pub fn get(&self, kind: ExtensionKind, key: &ModuleKey) -> Option<PathBuf> {
        self.keys(kind).get(key).map(Path::to_path_buf)
    }

    /// Records a compiled artifact.
    pub fn put(&mut self, kind: ExtensionKind, key: ModuleKey, artifact: PathBuf) {
        let keys = match kind {
            ExtensionKind::Grammar => &mut self.grammar,
            ExtensionKind::Transformation => &mut self.transformation,
        };
        keys.put(key, artifact);
    }

    /// Number of cached modules of a kind.
    pub fn len(&self, kind: ExtensionKind) -> usize {
        self.keys(kind).len()
    }

    /// Path at which the artifact (or module source, by extension) for `key` lives.
    pub fn artifact_path(&self, kind: ExtensionKind, key: &ModuleKey, ext: &str) -> PathBuf {
        self.store
            .artifact_path(kind.subdir(), &key.identity().to_string(), ext)
    }

    /// Ensures the artifact directory of a kind exists.
    pub fn ensure_dirs(&self, kind: ExtensionKind) -> Result<(), CacheError> {
        self.store.ensure_dirs(kind.subdir())
    }

    /// Persists both caches to the manifest.
    pub fn save(&self) -> Result<(), CacheError> {
        let manifest = CacheManifest {
            toolchain_version: self.toolchain_version.clone(),
            grammar: self.grammar.entries().cloned().collect(),
            transformation: self.transformation.entries().cloned().collect(),
        };
        manifest.save(&self.cache_dir)
    }

    /// Removes artifact files that no cache entry references.
    ///
    /// Returns the number of files removed.
    pub fn gc(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for kind in [ExtensionKind::Grammar, ExtensionKind::Transformation] {
            let live: Vec<String> = self
                .keys(kind)
                .entries()
                .filter_map(|e| e.artifact.file_stem())
                .map(|s| s.to_string_lossy().into_owned())
                .collect();
            let live: Vec<&str> = live.iter().map(String::as_str).collect();
            removed += self.store.gc(kind.subdir(), &live)?;
        }
        Ok(removed)
    }
}
