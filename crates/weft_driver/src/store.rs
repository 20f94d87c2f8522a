//! Reading, writing and validating persisted compilation units.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use weft_cache::{ArtifactStore, CacheError, SourceHasher, Stamp};

use crate::unit::CompilationUnit;

/// Persistent store of compilation units, memoized in memory.
///
/// Units are shared as `Arc`s: a record read once is handed to every build
/// that depends on it without copying.
pub struct UnitStore {
    records: ArtifactStore,
    memo: Mutex<HashMap<PathBuf, Arc<CompilationUnit>>>,
}

impl UnitStore {
    /// Creates a store whose records are tagged with `toolchain_version`.
    pub fn new(out_dir: &Path, toolchain_version: &str) -> Self {
        Self {
            records: ArtifactStore::new(out_dir, toolchain_version),
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Reads the unit recorded at `dep_path`. Missing or corrupt records read as `None`.
    pub fn read(&self, dep_path: &Path) -> Option<Arc<CompilationUnit>> {
        if let Some(unit) = self.memo.lock().get(dep_path) {
            return Some(Arc::clone(unit));
        }
        let unit: CompilationUnit = self.records.read_record(dep_path)?;
        let unit = Arc::new(unit);
        self.memo
            .lock()
            .insert(dep_path.to_path_buf(), Arc::clone(&unit));
        Some(unit)
    }

    /// Persists a unit at its `dep_path`.
    pub fn write(&self, unit: CompilationUnit) -> Result<Arc<CompilationUnit>, CacheError> {
        self.records.write_record(&unit.dep_path, &unit)?;
        let unit = Arc::new(unit);
        self.memo
            .lock()
            .insert(unit.dep_path.clone(), Arc::clone(&unit));
        Ok(unit)
    }

    /// Drops every memoized record.
    pub fn forget(&self) {
        self.memo.lock().clear();
    }

    /// Returns `true` if `unit` and everything it depends on may be reused.
    ///
    /// `edited` supplies stamps of sources whose current content lives in memory.
    pub fn is_consistent(&self, unit: &CompilationUnit, edited: &BTreeMap<PathBuf, Stamp>) -> bool {
        let mut visited = HashSet::new();
        self.check(unit, edited, &mut visited)
    }

    fn check(
        &self,
        unit: &CompilationUnit,
        edited: &BTreeMap<PathBuf, Stamp>,
        visited: &mut HashSet<PathBuf>,
    ) -> bool {
        if !visited.insert(unit.dep_path.clone()) {
            return true;
        }
        let dep = unit.dep_path.display();

        if !unit.is_success() {
            debug!(unit = %dep, state = ?unit.state, "unit is not reusable");
            return false;
        }

        for (what, recorded) in [
            ("source", &unit.source_stamps),
            ("generated", &unit.generated_files),
            ("external", &unit.external_files),
            ("dependency", &unit.dependency_stamps),
        ] {
            let changes = SourceHasher::detect_changes(recorded, edited);
            let first = changes.changed().next();
            if let Some(changed) = first {
                debug!(unit = %dep, file = %changed.display(), "{what} file changed");
                return false;
            }
        }

        for artifact in unit.parse_artifact.iter().chain(&unit.transform_artifact) {
            if !artifact.exists() {
                debug!(unit = %dep, artifact = %artifact.display(), "artifact vanished");
                return false;
            }
        }

        for required in unit.module_deps.iter().chain(&unit.circular_deps) {
            let Some(other) = self.read(&required.dep_path) else {
                debug!(unit = %dep, missing = %required.dep_path.display(), "dependency record missing");
                return false;
            };
            if other.sources != required.sources || !self.check(&other, edited, visited) {
                debug!(unit = %dep, dependency = %required.dep_path.display(), "dependency is stale");
                return false;
            }
        }

        true
    }
}
