//! Stamps, persisted records, and the extension-module cache.
//!
//! This crate fingerprints files for staleness checks ([`SourceHasher`],
//! [`Stamp`]), stores header-validated binary records such as compilation-unit
//! sidecars ([`ArtifactStore`]), and maps synthesized grammar and
//! transformation modules to previously compiled artifacts ([`Cache`],
//! [`ModuleKey`]). The cache is wiped wholesale when the version marker in its
//! directory disagrees with the running toolchain.

#![warn(missing_docs)]

pub mod artifact;
pub mod cache;
pub mod error;
pub mod hasher;
pub mod key_cache;
pub mod manifest;
pub mod module_key;

pub use artifact::ArtifactStore;
pub use cache::{Cache, ExtensionKind};
pub use error::CacheError;
pub use hasher::{ChangeSet, SourceHasher, Stamp};
pub use key_cache::{CacheEntry, ModuleKeyCache};
pub use manifest::CacheManifest;
pub use module_key::{FilePattern, ModuleKey};
