//! Cache keys for synthesized extension modules.
//!
//! A [`ModuleKey`] pairs the textual body of a module with the stamps of the
//! files it transitively depends on. Keys have two notions of sameness:
//! [`same_identity`](ModuleKey::same_identity) compares the body and the *set*
//! of dependency files and decides which cache slot a key occupies, while
//! [`same_stamps`](ModuleKey::same_stamps) also compares every stamp and
//! decides whether a stored artifact may be reused.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use weft_common::ContentHash;

use crate::hasher::Stamp;

/// Selects the dependency files that belong to the module system, by extension.
#[derive(Debug, Clone, Default)]
pub struct FilePattern {
    extensions: BTreeSet<String>,
}

impl FilePattern {
    /// Creates a pattern accepting files with any of the given extensions.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` if the file's extension is accepted.
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(e))
    }
}

/// Key of a compiled extension module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleKey {
    /// The module source text.
    pub body: String,
    /// Stamps of the relevant dependency files, keyed by project-relative path.
    pub deps: BTreeMap<String, Stamp>,
}

impl ModuleKey {
    /// Builds a key from a module body and the transitively affected files.
    ///
    /// Only files accepted by `pattern` take part. Paths under `base` are
    /// stored relative to it, so keys survive moving the project directory.
    pub fn new(
        body: impl Into<String>,
        affected: &BTreeMap<PathBuf, Stamp>,
        base: &Path,
        pattern: &FilePattern,
    ) -> Self {
        let deps = affected
            .iter()
            .filter(|(path, stamp)| pattern.matches(path) && !stamp.is_missing())
            .map(|(path, stamp)| {
                let rel = path.strip_prefix(base).unwrap_or(path);
                (rel.to_string_lossy().replace('\\', "/"), *stamp)
            })
            .collect();
        Self {
            body: body.into(),
            deps,
        }
    }

    /// Hash of the body and the dependency file names, ignoring stamps.
    pub fn identity(&self) -> ContentHash {
        let parts = std::iter::once(self.body.as_bytes())
            .chain(self.deps.keys().map(|k| k.as_bytes()));
        ContentHash::from_parts(parts)
    }

    /// Same body and same dependency files. Used when storing.
    pub fn same_identity(&self, other: &ModuleKey) -> bool {
        self.body == other.body && self.deps.keys().eq(other.deps.keys())
    }

    /// Same body, same dependency files, and equal stamps. Used when looking up.
    pub fn same_stamps(&self, other: &ModuleKey) -> bool {
        self.body == other.body && self.deps == other.deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(s: &str) -> Stamp {
        Stamp::Content(ContentHash::from_bytes(s.as_bytes()))
    }

    fn affected(entries: &[(&str, Stamp)]) -> BTreeMap<PathBuf, Stamp> {
        entries
            .iter()
            .map(|(p, s)| (PathBuf::from(p), *s))
            .collect()
    }

    #[test]
    fn pattern_filters_unrelated_files() {
        let pattern = FilePattern::new(["grm", "tbl"]);
        let files = affected(&[
            ("/p/bin/Foo.grm", stamp("g")),
            ("/p/bin/Foo.txt", stamp("code")),
            ("/p/bin/Foo.bin", stamp("bin")),
        ]);
        let key = ModuleKey::new("module X", &files, Path::new("/p"), &pattern);
        assert_eq!(key.deps.len(), 1);
        assert!(key.deps.contains_key("bin/Foo.grm"));
    }

    #[test]
    fn missing_probes_are_ignored() {
        let pattern = FilePattern::new(["grm"]);
        let files = affected(&[("/p/lib/Nope.grm", Stamp::Missing)]);
        let key = ModuleKey::new("m", &files, Path::new("/p"), &pattern);
        assert!(key.deps.is_empty());
    }

    #[test]
    fn identity_ignores_stamps() {
        let pattern = FilePattern::new(["grm"]);
        let a = ModuleKey::new("m", &affected(&[("/p/A.grm", stamp("1"))]), Path::new("/p"), &pattern);
        let b = ModuleKey::new("m", &affected(&[("/p/A.grm", stamp("2"))]), Path::new("/p"), &pattern);
        assert!(a.same_identity(&b));
        assert_eq!(a.identity(), b.identity());
        assert!(!a.same_stamps(&b));
    }

    #[test]
    fn identity_depends_on_body_and_files() {
        let pattern = FilePattern::new(["grm"]);
        let files = affected(&[("/p/A.grm", stamp("1"))]);
        let a = ModuleKey::new("m", &files, Path::new("/p"), &pattern);
        let other_body = ModuleKey::new("n", &files, Path::new("/p"), &pattern);
        let other_files = ModuleKey::new("m", &affected(&[("/p/B.grm", stamp("1"))]), Path::new("/p"), &pattern);
        assert!(!a.same_identity(&other_body));
        assert!(!a.same_identity(&other_files));
        assert_ne!(a.identity(), other_files.identity());
    }
}
