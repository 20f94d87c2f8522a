//! The persisted record of one build: a compilation unit.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use weft_cache::{SourceHasher, Stamp};
use weft_common::Term;
use weft_diagnostics::Severity;

use crate::error::DriverError;
use crate::request::SourceSet;

/// Lifecycle of a compilation unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitState {
    /// Created but not processed.
    NotStarted,
    /// The pipeline is running.
    InProgress,
    /// Processed without errors.
    Success,
    /// Processed with errors.
    Failure,
}

/// A reference to another unit's record.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleDependency {
    /// Location of the referenced record.
    pub dep_path: PathBuf,
    /// Sources of the referenced unit.
    pub sources: SourceSet,
}

/// A syntax error reported while fetching a declaration.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParseError {
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
    /// The parser's message.
    pub message: String,
}

/// A message produced by an extension's analysis step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisMessage {
    /// How severe the finding is.
    pub severity: Severity,
    /// The finding.
    pub message: String,
}

/// Marks a unit as the output of applying a transformation to a model.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Generation {
    /// Record of the model unit.
    pub model: PathBuf,
    /// Record of the transformation unit.
    pub transformation: PathBuf,
}

/// Everything the driver knows about one build of a source set.
///
/// Stamps are kept for the unit's own sources, the files it generated, the
/// external files it looked at (including ones found missing), and, folded
/// in from its module dependencies, every file those transitively touch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompilationUnit {
    /// The compiled sources.
    pub sources: SourceSet,
    /// Where this record lives.
    pub dep_path: PathBuf,
    /// Lifecycle state.
    pub state: UnitState,
    /// Stamps of the sources as compiled.
    pub source_stamps: BTreeMap<PathBuf, Stamp>,
    /// Files written by this build.
    pub generated_files: BTreeMap<PathBuf, Stamp>,
    /// Files outside the unit that the build read or probed for.
    pub external_files: BTreeMap<PathBuf, Stamp>,
    /// Affected files folded in from module dependencies.
    pub dependency_stamps: BTreeMap<PathBuf, Stamp>,
    /// Units imported without a cycle.
    pub module_deps: BTreeSet<ModuleDependency>,
    /// Units imported through a cycle.
    pub circular_deps: BTreeSet<ModuleDependency>,
    /// Editor-service descriptors contributed by this unit and its imports.
    pub editor_services: Vec<Term>,
    /// Final grammar artifact, when checking was enabled.
    pub parse_artifact: Option<PathBuf>,
    /// Final transformation artifact.
    pub transform_artifact: Option<PathBuf>,
    /// Error messages.
    pub errors: Vec<String>,
    /// Syntax errors.
    pub parse_errors: BTreeSet<ParseError>,
    /// Messages from analysis steps.
    pub analysis: Vec<AnalysisMessage>,
    /// The source as parsed.
    pub sugared_tree: Option<Term>,
    /// The source after desugaring.
    pub desugared_tree: Option<Term>,
    /// Sources whose compilation other units handed to this one.
    pub delegations: BTreeMap<SourceSet, BTreeSet<PathBuf>>,
    /// Present when the unit is the output of a transformation.
    pub generation: Option<Generation>,
}

impl CompilationUnit {
    /// A fresh unit for `sources`, recorded at `dep_path`.
    pub fn new(sources: SourceSet, dep_path: PathBuf) -> Self {
        Self {
            sources,
            dep_path,
            state: UnitState::NotStarted,
            source_stamps: BTreeMap::new(),
            generated_files: BTreeMap::new(),
            external_files: BTreeMap::new(),
            dependency_stamps: BTreeMap::new(),
            module_deps: BTreeSet::new(),
            circular_deps: BTreeSet::new(),
            editor_services: Vec::new(),
            parse_artifact: None,
            transform_artifact: None,
            errors: Vec::new(),
            parse_errors: BTreeSet::new(),
            analysis: Vec::new(),
            sugared_tree: None,
            desugared_tree: None,
            delegations: BTreeMap::new(),
            generation: None,
        }
    }

    /// This unit as a dependency of another.
    pub fn dependency(&self) -> ModuleDependency {
        ModuleDependency {
            dep_path: self.dep_path.clone(),
            sources: self.sources.clone(),
        }
    }

    /// Returns `true` in state [`UnitState::Success`].
    pub fn is_success(&self) -> bool {
        self.state == UnitState::Success
    }

    /// Returns `true` if any error or syntax error was recorded.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || !self.parse_errors.is_empty()
    }

    /// Records an error message.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Settles the final state from the recorded errors.
    pub fn finish(&mut self) {
        self.state = if self.has_errors() {
            UnitState::Failure
        } else {
            UnitState::Success
        };
    }

    /// Records the stamp of one of the unit's own sources.
    pub fn record_source(&mut self, path: &Path, stamp: Stamp) {
        self.source_stamps.insert(path.to_path_buf(), stamp);
    }

    /// Writes a generated file and records its stamp.
    pub fn generate_file(&mut self, path: &Path, content: &str) -> Result<(), DriverError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DriverError::io(parent, e))?;
        }
        std::fs::write(path, content).map_err(|e| DriverError::io(path, e))?;
        self.generated_files
            .insert(path.to_path_buf(), SourceHasher::stamp_text(content));
        Ok(())
    }

    /// Records a file produced on this unit's behalf by an external tool.
    pub fn add_generated(&mut self, path: &Path) {
        self.generated_files
            .insert(path.to_path_buf(), SourceHasher::stamp(path));
    }

    /// Records an external file the build looked at, whether or not it exists.
    pub fn require_file(&mut self, path: &Path) -> Stamp {
        let stamp = SourceHasher::stamp(path);
        self.external_files.insert(path.to_path_buf(), stamp);
        stamp
    }

    /// Adds an acyclic dependency and folds in everything it affects.
    pub fn add_module_dependency(&mut self, dep: &CompilationUnit) {
        if dep.dep_path == self.dep_path {
            return;
        }
        self.module_deps.insert(dep.dependency());
        for (path, stamp) in dep.affected_files() {
            self.dependency_stamps.insert(path, stamp);
        }
        self.add_editor_services(dep.editor_services.iter().cloned());
    }

    /// Adds a dependency reached through an import cycle. Its stamps are not
    /// folded in: the partner may still be mid-build.
    pub fn add_circular_dependency(&mut self, dep: ModuleDependency) {
        if dep.dep_path != self.dep_path {
            self.circular_deps.insert(dep);
        }
    }

    /// Adds editor services, skipping ones already present.
    pub fn add_editor_services(&mut self, services: impl IntoIterator<Item = Term>) {
        for service in services {
            if !self.editor_services.contains(&service) {
                self.editor_services.push(service);
            }
        }
    }

    /// Merges the dependency bookkeeping of another unit into this one.
    pub fn merge_bookkeeping(&mut self, other: &CompilationUnit) {
        self.add_module_dependency(other);
        for dep in &other.module_deps {
            if dep.dep_path != self.dep_path {
                self.module_deps.insert(dep.clone());
            }
        }
        for dep in &other.circular_deps {
            self.add_circular_dependency(dep.clone());
        }
    }

    /// Generated and external files plus everything folded in from dependencies.
    pub fn affected_files(&self) -> BTreeMap<PathBuf, Stamp> {
        let mut files = self.dependency_stamps.clone();
        files.extend(self.external_files.iter().map(|(p, s)| (p.clone(), *s)));
        files.extend(self.generated_files.iter().map(|(p, s)| (p.clone(), *s)));
        files
    }

    /// The most severe analysis message, if any.
    pub fn max_analysis_severity(&self) -> Option<Severity> {
        self.analysis.iter().map(|m| m.severity).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str) -> CompilationUnit {
        CompilationUnit::new(
            SourceSet::single(format!("src/{name}.wft")),
            PathBuf::from(format!("bin/{name}.dep")),
        )
    }

    #[test]
    fn finish_derives_state_from_errors() {
        let mut ok = unit("A");
        ok.finish();
        assert_eq!(ok.state, UnitState::Success);

        let mut bad = unit("B");
        bad.parse_errors.insert(ParseError {
            line: 1,
            column: 4,
            message: "unexpected token".to_string(),
        });
        bad.finish();
        assert_eq!(bad.state, UnitState::Failure);
    }

    #[test]
    fn module_dependency_folds_affected_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut lib = unit("Lib");
        lib.generate_file(&dir.path().join("Lib.grm"), "module Lib").unwrap();
        lib.require_file(&dir.path().join("absent.grm"));
        lib.add_editor_services([Term::string("colorer")]);

        let mut app = unit("App");
        app.add_module_dependency(&lib);
        assert_eq!(app.module_deps.len(), 1);
        assert_eq!(app.dependency_stamps.len(), 2);
        assert_eq!(app.editor_services, vec![Term::string("colorer")]);

        let affected = app.affected_files();
        assert!(affected.contains_key(&dir.path().join("Lib.grm")));
        assert!(affected[&dir.path().join("absent.grm")].is_missing());
    }

    #[test]
    fn circular_dependency_is_identity_only() {
        let mut a = unit("A");
        let b = unit("B");
        a.add_circular_dependency(b.dependency());
        a.add_circular_dependency(a.dependency());
        assert_eq!(a.circular_deps.len(), 1);
        assert!(a.dependency_stamps.is_empty());
    }

    #[test]
    fn editor_services_deduplicate() {
        let mut u = unit("A");
        u.add_editor_services([Term::string("x"), Term::string("y")]);
        u.add_editor_services([Term::string("x")]);
        assert_eq!(u.editor_services.len(), 2);
    }

    #[test]
    fn max_severity() {
        let mut u = unit("A");
        assert_eq!(u.max_analysis_severity(), None);
        u.analysis.push(AnalysisMessage {
            severity: Severity::Note,
            message: "n".to_string(),
        });
        u.analysis.push(AnalysisMessage {
            severity: Severity::Warning,
            message: "w".to_string(),
        });
        assert_eq!(u.max_analysis_severity(), Some(Severity::Warning));
    }
}
