//! Header-validated binary records and artifact file layout.
//!
//! Records (persisted compilation units) are written as a 4-byte little-endian
//! header length, a bincode header with magic bytes, format version, producing
//! toolchain version and payload checksum, then the bincode payload. Reading
//! is fail-safe: anything unexpected yields `None`.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use weft_common::ContentHash;

use crate::error::CacheError;

/// Magic bytes identifying a weft record.
const RECORD_MAGIC: [u8; 4] = *b"WEFT";

/// Current record format version. Increment on breaking changes to
/// the header or payload format.
const RECORD_FORMAT_VERSION: u32 = 1;

/// Header prepended to every record for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Magic bytes: must be `b"WEFT"`.
    pub magic: [u8; 4],

    /// Record format version.
    pub format_version: u32,

    /// Toolchain version that produced this record. Informational only.
    pub toolchain_version: String,

    /// Content hash of the payload data.
    pub checksum: ContentHash,
}

/// Reads and writes records and lays out artifact files under a root directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    toolchain_version: String,
}

impl ArtifactStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: &Path, toolchain_version: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            toolchain_version: toolchain_version.to_string(),
        }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensures that the given subdirectory exists.
    pub fn ensure_dirs(&self, subdir: &str) -> Result<(), CacheError> {
        let dir = self.root.join(subdir);
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(dir, e))
    }

    /// Returns the file path for an artifact with the given key.
    pub fn artifact_path(&self, subdir: &str, key: &str, ext: &str) -> PathBuf {
        self.root.join(subdir).join(format!("{key}.{ext}"))
    }

    /// Serializes `value` and writes it as a record at `path`.
    pub fn write_record<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), CacheError> {
        let payload = bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        let header = RecordHeader {
            magic: RECORD_MAGIC,
            format_version: RECORD_FORMAT_VERSION,
            toolchain_version: self.toolchain_version.clone(),
            checksum: ContentHash::from_bytes(&payload),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(&payload);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        std::fs::write(path, &output).map_err(|e| CacheError::io(path, e))
    }

    /// Reads a record from `path`, validating its header and checksum.
    pub fn read_record<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        let raw = std::fs::read(path).ok()?;
        if raw.len() < 4 {
            return None;
        }

        let header_len = u32::from_le_bytes(raw[..4].try_into().ok()?) as usize;
        if raw.len() < 4 + header_len {
            return None;
        }

        let header: RecordHeader =
            bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
                .ok()?
                .0;
        if header.magic != RECORD_MAGIC || header.format_version != RECORD_FORMAT_VERSION {
            return None;
        }

        let payload = &raw[4 + header_len..];
        if ContentHash::from_bytes(payload) != header.checksum {
            return None;
        }

        bincode::serde::decode_from_slice(payload, bincode::config::standard())
            .ok()
            .map(|(value, _)| value)
    }

    /// Removes files in `subdir` whose stem (file name without extension)
    /// is not in `live_keys`.
    ///
    /// Returns the number of files removed.
    pub fn gc(&self, subdir: &str, live_keys: &[&str]) -> Result<usize, CacheError> {
        let dir = self.root.join(subdir);
        if !dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        let entries = std::fs::read_dir(&dir).map_err(|e| CacheError::io(&dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| CacheError::io(&dir, e))?.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.is_file() && !live_keys.contains(&stem) {
                std::fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        stamps: BTreeMap<String, u64>,
    }

    fn sample() -> Sample {
        Sample {
            name: "M".to_string(),
            stamps: [("M.wft".to_string(), 7)].into_iter().collect(),
        }
    }

    fn make_store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "base-1");
        (dir, store)
    }

    fn write_raw(path: &Path, header: &RecordHeader, payload: &[u8]) {
        let header_bytes =
            bincode::serde::encode_to_vec(header, bincode::config::standard()).unwrap();
        let mut output = Vec::new();
        output.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(payload);
        std::fs::write(path, output).unwrap();
    }

    #[test]
    fn record_roundtrip_creates_parent_dirs() {
        let (dir, store) = make_store();
        let path = dir.path().join("bin").join("pkg").join("M.dep");
        store.write_record(&path, &sample()).unwrap();
        assert_eq!(store.read_record::<Sample>(&path), Some(sample()));
    }

    #[test]
    fn read_missing_returns_none() {
        let (dir, store) = make_store();
        assert!(store.read_record::<Sample>(&dir.path().join("nope.dep")).is_none());
    }

    #[test]
    fn read_garbage_returns_none() {
        let (dir, store) = make_store();
        let path = dir.path().join("garbage.dep");
        std::fs::write(&path, b"garbage data").unwrap();
        assert!(store.read_record::<Sample>(&path).is_none());
    }

    #[test]
    fn read_truncated_returns_none() {
        let (dir, store) = make_store();
        let path = dir.path().join("short.dep");
        std::fs::write(&path, b"AB").unwrap();
        assert!(store.read_record::<Sample>(&path).is_none());
    }

    #[test]
    fn wrong_magic_returns_none() {
        let (dir, store) = make_store();
        let payload = bincode::serde::encode_to_vec(sample(), bincode::config::standard()).unwrap();
        let header = RecordHeader {
            magic: *b"BAAD",
            format_version: RECORD_FORMAT_VERSION,
            toolchain_version: "base-1".to_string(),
            checksum: ContentHash::from_bytes(&payload),
        };
        let path = dir.path().join("magic.dep");
        write_raw(&path, &header, &payload);
        assert!(store.read_record::<Sample>(&path).is_none());
    }

    #[test]
    fn wrong_format_version_returns_none() {
        let (dir, store) = make_store();
        let payload = bincode::serde::encode_to_vec(sample(), bincode::config::standard()).unwrap();
        let header = RecordHeader {
            magic: RECORD_MAGIC,
            format_version: 999,
            toolchain_version: "base-1".to_string(),
            checksum: ContentHash::from_bytes(&payload),
        };
        let path = dir.path().join("old.dep");
        write_raw(&path, &header, &payload);
        assert!(store.read_record::<Sample>(&path).is_none());
    }

    #[test]
    fn tampered_payload_returns_none() {
        let (dir, store) = make_store();
        let path = dir.path().join("M.dep");
        store.write_record(&path, &sample()).unwrap();
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        std::fs::write(&path, raw).unwrap();
        assert!(store.read_record::<Sample>(&path).is_none());
    }

    #[test]
    fn other_toolchain_version_still_reads() {
        let (dir, store) = make_store();
        let path = dir.path().join("M.dep");
        store.write_record(&path, &sample()).unwrap();
        let newer = ArtifactStore::new(dir.path(), "base-2");
        assert_eq!(newer.read_record::<Sample>(&path), Some(sample()));
    }

    #[test]
    fn artifact_path_format() {
        let (_dir, store) = make_store();
        let path = store.artifact_path("grammar", "abc123", "tbl");
        assert!(path.ends_with("grammar/abc123.tbl"));
    }

    #[test]
    fn gc_removes_unreferenced() {
        let (_dir, store) = make_store();
        store.ensure_dirs("grammar").unwrap();
        let keep = store.artifact_path("grammar", "keep", "tbl");
        let keep_source = store.artifact_path("grammar", "keep", "grm");
        let drop = store.artifact_path("grammar", "drop", "tbl");
        for p in [&keep, &keep_source, &drop] {
            std::fs::write(p, b"x").unwrap();
        }

        let removed = store.gc("grammar", &["keep"]).unwrap();
        assert_eq!(removed, 1);
        assert!(keep.exists());
        assert!(keep_source.exists());
        assert!(!drop.exists());
    }

    #[test]
    fn gc_nonexistent_dir_returns_zero() {
        let (_dir, store) = make_store();
        assert_eq!(store.gc("nonexistent", &[]).unwrap(), 0);
    }
}
