//! Synthesized grammar and transformation modules and their cached compilation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use weft_cache::{ExtensionKind, FilePattern, ModuleKey, Stamp};

use crate::context::BuildContext;
use crate::error::DriverError;
use crate::toolchain::ModuleSource;

/// Extension of compiled grammar artifacts (parse tables).
pub const GRAMMAR_ARTIFACT_EXTENSION: &str = "tbl";

/// Extension of compiled transformation artifacts.
pub const TRANSFORMATION_ARTIFACT_EXTENSION: &str = "prog";

/// The growing set of modules one kind of extension is assembled from, and
/// the artifact compiled from it.
#[derive(Debug, Clone)]
pub struct ExtensionState {
    kind: ExtensionKind,
    compound_name: String,
    available: Vec<String>,
    artifact: Option<PathBuf>,
    dirty: bool,
}

impl ExtensionState {
    /// Starts from the language's initial module.
    pub fn new(kind: ExtensionKind, compound_name: impl Into<String>, init_module: &str) -> Self {
        Self {
            kind,
            compound_name: compound_name.into(),
            available: vec![init_module.to_string()],
            artifact: None,
            dirty: true,
        }
    }

    /// The kind of module.
    pub fn kind(&self) -> ExtensionKind {
        self.kind
    }

    /// Makes `module` part of the compound. Returns `false` if it already was.
    pub fn add_import(&mut self, module: &str) -> bool {
        if self.available.iter().any(|m| m == module) {
            return false;
        }
        self.available.push(module.to_string());
        self.dirty = true;
        true
    }

    /// Modules available so far, in import order.
    pub fn available(&self) -> &[String] {
        &self.available
    }

    /// The module importing everything available.
    pub fn compound(&self) -> ModuleSource {
        ModuleSource::compound(self.compound_name.clone(), self.available.clone())
    }

    /// The artifact compiled from the current compound, if up to date.
    pub fn current(&self) -> Option<&Path> {
        if self.dirty {
            None
        } else {
            self.artifact.as_deref()
        }
    }

    /// The last compiled artifact, up to date or not.
    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// Records the artifact compiled for the current compound.
    pub fn set_compiled(&mut self, artifact: Option<PathBuf>) {
        if artifact.is_some() {
            self.artifact = artifact;
        }
        self.dirty = false;
    }
}

/// Compiles extension modules through the module-key cache.
pub struct ExtensionCompiler<'a> {
    ctx: &'a BuildContext,
}

impl<'a> ExtensionCompiler<'a> {
    /// Creates a compiler bound to a build context.
    pub fn new(ctx: &'a BuildContext) -> Self {
        Self { ctx }
    }

    fn pattern(&self, kind: ExtensionKind) -> FilePattern {
        let language = self.ctx.language();
        match kind {
            ExtensionKind::Grammar => FilePattern::new([language.grammar_extension()]),
            ExtensionKind::Transformation => FilePattern::new([language.transformation_extension()]),
        }
    }

    fn extensions(&self, kind: ExtensionKind) -> (&str, &'static str) {
        let language = self.ctx.language();
        match kind {
            ExtensionKind::Grammar => (language.grammar_extension(), GRAMMAR_ARTIFACT_EXTENSION),
            ExtensionKind::Transformation => (
                language.transformation_extension(),
                TRANSFORMATION_ARTIFACT_EXTENSION,
            ),
        }
    }

    /// Returns the artifact for module text `body`, compiling it unless an
    /// artifact for the same body and the same stamps of the relevant
    /// `affected` files is cached.
    ///
    /// The cache stays locked from lookup to store, so concurrent builds never
    /// compile the same key twice.
    pub fn compile(
        &self,
        kind: ExtensionKind,
        body: &str,
        affected: &BTreeMap<PathBuf, Stamp>,
    ) -> Result<PathBuf, DriverError> {
        let env = self.ctx.env();
        let key = ModuleKey::new(body, affected, &env.root, &self.pattern(kind));

        let mut cache = self.ctx.cache.lock();
        if let Some(artifact) = cache.get(kind, &key) {
            debug!(%kind, artifact = %artifact.display(), "extension cache hit");
            return Ok(artifact);
        }

        let (source_ext, artifact_ext) = self.extensions(kind);
        cache.ensure_dirs(kind)?;
        let source = cache.artifact_path(kind, &key, source_ext);
        let artifact = cache.artifact_path(kind, &key, artifact_ext);
        std::fs::write(&source, body).map_err(|e| DriverError::io(&source, e))?;

        let search_path: Vec<PathBuf> = env.search_roots().map(Path::to_path_buf).collect();
        debug!(%kind, module = %source.display(), deps = key.deps.len(), "compiling extension module");
        self.ctx
            .toolchain()
            .compile_module(kind, &source, &artifact, &search_path)?;

        cache.put(kind, key, artifact.clone());
        Ok(artifact)
    }
}
