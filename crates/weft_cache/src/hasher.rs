//! File stamping and change detection.
//!
//! A [`Stamp`] fingerprints a file by content. Files that were looked for and
//! not found are stamped [`Stamp::Missing`], so that a later appearance of the
//! file is detected as a change just like an edit or a deletion.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use weft_common::ContentHash;

use crate::error::CacheError;

/// A comparable fingerprint of a file's state.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Stamp {
    /// The file existed with this content hash.
    Content(ContentHash),
    /// The file did not exist.
    Missing,
}

impl Stamp {
    /// Returns `true` for [`Stamp::Missing`].
    pub fn is_missing(&self) -> bool {
        matches!(self, Stamp::Missing)
    }
}

/// Result of comparing recorded stamps against the file system.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Files recorded as missing that exist now.
    pub new_files: Vec<PathBuf>,

    /// Files whose content hash differs from the recorded one.
    pub modified_files: Vec<PathBuf>,

    /// Files recorded with content that no longer exist.
    pub deleted_files: Vec<PathBuf>,

    /// Files whose stamp matches.
    pub unchanged_files: Vec<PathBuf>,
}

impl ChangeSet {
    /// Returns `true` if there are no changes (no new, modified, or deleted files).
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.modified_files.is_empty() && self.deleted_files.is_empty()
    }

    /// Returns the changed files in a stable order, for log lines.
    pub fn changed(&self) -> impl Iterator<Item = &PathBuf> {
        self.new_files
            .iter()
            .chain(&self.modified_files)
            .chain(&self.deleted_files)
    }
}

/// Utility for computing content hashes and stamps of files.
pub struct SourceHasher;

impl SourceHasher {
    /// Computes the content hash of a single file.
    pub fn hash_file(path: &Path) -> Result<ContentHash, CacheError> {
        let content = std::fs::read(path).map_err(|e| CacheError::io(path, e))?;
        Ok(ContentHash::from_bytes(&content))
    }

    /// Stamps a file. Unreadable files are stamped as missing.
    pub fn stamp(path: &Path) -> Stamp {
        match Self::hash_file(path) {
            Ok(hash) => Stamp::Content(hash),
            Err(_) => Stamp::Missing,
        }
    }

    /// Stamps in-memory text, as if it were the content of a file.
    pub fn stamp_text(text: &str) -> Stamp {
        Stamp::Content(ContentHash::from_bytes(text.as_bytes()))
    }

    /// Re-stamps every recorded file and categorizes the differences.
    ///
    /// `overrides` supplies stamps for files whose current content is held in
    /// memory (edited sources) instead of on disk.
    pub fn detect_changes(
        recorded: &BTreeMap<PathBuf, Stamp>,
        overrides: &BTreeMap<PathBuf, Stamp>,
    ) -> ChangeSet {
        let mut changes = ChangeSet::default();

        for (path, old) in recorded {
            let current = overrides
                .get(path)
                .copied()
                .unwrap_or_else(|| Self::stamp(path));
            match (old, current) {
                (old, current) if *old == current => changes.unchanged_files.push(path.clone()),
                (Stamp::Missing, Stamp::Content(_)) => changes.new_files.push(path.clone()),
                (Stamp::Content(_), Stamp::Missing) => changes.deleted_files.push(path.clone()),
                _ => changes.modified_files.push(path.clone()),
            }
        }

        changes
    }
}
