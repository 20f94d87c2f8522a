//! The resolved build environment: directories and flags shared by every build.

use std::path::{Path, PathBuf};
use std::time::Duration;

use weft_config::ProjectConfig;

use crate::request::SourceSet;

/// Extension of persisted unit records.
pub const DEP_EXTENSION: &str = "dep";

/// Extension of model files.
pub const MODEL_EXTENSION: &str = "model";

/// Directories and flags of a project, with every path resolved against the
/// project root.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The project root.
    pub root: PathBuf,
    /// Roots searched for source files.
    pub source_path: Vec<PathBuf>,
    /// Roots searched for compiled units after `out_dir`.
    pub include_path: Vec<PathBuf>,
    /// Where generated files and unit records go.
    pub out_dir: PathBuf,
    /// Where compiled extension modules are cached.
    pub cache_dir: PathBuf,
    /// Resolve runs of consecutive imports as one block.
    pub atomic_import_parsing: bool,
    /// Skip the final grammar check.
    pub no_checking: bool,
    /// How long a duplicate request waits for an in-flight build.
    pub pending_timeout: Duration,
}

impl Environment {
    /// Resolves a project configuration against `root`.
    pub fn from_config(root: &Path, config: &ProjectConfig) -> Self {
        let resolve = |p: &String| root.join(p);
        Self {
            root: root.to_path_buf(),
            source_path: config.project.source_path.iter().map(resolve).collect(),
            include_path: config.project.include_path.iter().map(resolve).collect(),
            out_dir: root.join(&config.project.out_dir),
            cache_dir: root.join(&config.project.cache_dir),
            atomic_import_parsing: config.build.atomic_import_parsing,
            no_checking: config.build.no_checking,
            pending_timeout: Duration::from_millis(config.build.pending_timeout_ms),
        }
    }

    /// Output directory first, then the include path.
    pub fn search_roots(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.out_dir.as_path()).chain(self.include_path.iter().map(PathBuf::as_path))
    }

    /// `<root>/<module>.<ext>`.
    pub fn module_file(root: &Path, module: &str, ext: &str) -> PathBuf {
        root.join(format!("{module}.{ext}"))
    }

    /// `<out_dir>/<module>.<ext>`.
    pub fn out_file(&self, module: &str, ext: &str) -> PathBuf {
        Self::module_file(&self.out_dir, module, ext)
    }

    /// Module path of a file: its location below a source root, the output
    /// directory or an include root, without extension and with `/` separators.
    ///
    /// Files outside every root fall back to their file stem.
    pub fn module_of(&self, file: &Path) -> String {
        let roots = self
            .source_path
            .iter()
            .chain(std::iter::once(&self.out_dir))
            .chain(&self.include_path);
        let relative = roots
            .filter_map(|root| file.strip_prefix(root).ok())
            .next()
            .unwrap_or_else(|| Path::new(file.file_name().unwrap_or_default()));
        let stem = relative.with_extension("");
        stem.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Where the record of the unit compiling `sources` lives.
    ///
    /// Units built from model files get a `.model.dep` record, so that a
    /// model exported by a unit never shares a record with the unit itself.
    pub fn dep_path_for(&self, sources: &SourceSet) -> PathBuf {
        let Some(primary) = sources.primary() else {
            return self.out_file("_", DEP_EXTENSION);
        };
        let module = self.module_of(primary);
        if is_model_file(primary) {
            self.out_file(&module, &format!("{MODEL_EXTENSION}.{DEP_EXTENSION}"))
        } else {
            self.out_file(&module, DEP_EXTENSION)
        }
    }
}

/// Returns `true` for files with the model extension.
pub fn is_model_file(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == MODEL_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        let mut config = ProjectConfig::new("test");
        config.project.include_path = vec!["lib".to_string()];
        Environment::from_config(Path::new("/p"), &config)
    }

    #[test]
    fn paths_resolve_against_root() {
        let env = env();
        assert_eq!(env.source_path, vec![PathBuf::from("/p/src")]);
        assert_eq!(env.out_dir, PathBuf::from("/p/bin"));
        assert_eq!(env.cache_dir, PathBuf::from("/p/.weft-cache"));
        assert_eq!(env.pending_timeout, Duration::from_secs(30));
        let roots: Vec<_> = env.search_roots().collect();
        assert_eq!(roots, vec![Path::new("/p/bin"), Path::new("/p/lib")]);
    }

    #[test]
    fn module_of_strips_roots_and_extension() {
        let env = env();
        assert_eq!(env.module_of(Path::new("/p/src/app/M.wft")), "app/M");
        assert_eq!(env.module_of(Path::new("/p/bin/Data__T.model")), "Data__T");
        assert_eq!(env.module_of(Path::new("/p/lib/std/lib.wft")), "std/lib");
        assert_eq!(env.module_of(Path::new("/elsewhere/X.wft")), "X");
    }

    #[test]
    fn dep_paths() {
        let env = env();
        assert_eq!(
            env.dep_path_for(&SourceSet::single("/p/src/app/M.wft")),
            PathBuf::from("/p/bin/app/M.dep")
        );
        assert_eq!(
            env.dep_path_for(&SourceSet::single("/p/bin/app/M.model")),
            PathBuf::from("/p/bin/app/M.model.dep")
        );
    }
}
