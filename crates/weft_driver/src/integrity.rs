//! Checks that a generated model only depends on what its generators could see.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use crate::store::UnitStore;
use crate::unit::CompilationUnit;

/// Dependency graph over unit records, loaded lazily from the store.
struct UnitGraph<'a> {
    store: &'a UnitStore,
    graph: DiGraph<PathBuf, ()>,
    nodes: HashMap<PathBuf, NodeIndex>,
}

impl<'a> UnitGraph<'a> {
    fn new(store: &'a UnitStore) -> Self {
        Self {
            store,
            graph: DiGraph::new(),
            nodes: HashMap::new(),
        }
    }

    fn node(&mut self, dep_path: &Path) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(dep_path) {
            return idx;
        }
        let idx = self.graph.add_node(dep_path.to_path_buf());
        self.nodes.insert(dep_path.to_path_buf(), idx);
        idx
    }

    /// Adds `root` and everything reachable from it, returning its node.
    fn load(&mut self, root: &Path) -> NodeIndex {
        let start = self.node(root);
        let mut pending = vec![root.to_path_buf()];
        let mut seen = HashSet::new();
        while let Some(path) = pending.pop() {
            if !seen.insert(path.clone()) {
                continue;
            }
            let Some(unit) = self.store.read(&path) else {
                continue;
            };
            let from = self.node(&path);
            for dep in unit.module_deps.iter().chain(&unit.circular_deps) {
                let to = self.node(&dep.dep_path);
                self.graph.update_edge(from, to, ());
                pending.push(dep.dep_path.clone());
            }
        }
        start
    }

    fn reachable(&self, start: NodeIndex) -> HashSet<NodeIndex> {
        let mut dfs = Dfs::new(&self.graph, start);
        let mut out = HashSet::new();
        while let Some(n) = dfs.next(&self.graph) {
            out.insert(n);
        }
        out
    }
}

/// Verifies the dependencies of generated models.
pub struct IntegrityChecker<'a> {
    store: &'a UnitStore,
}

impl<'a> IntegrityChecker<'a> {
    /// Creates a checker reading records from `store`.
    pub fn new(store: &'a UnitStore) -> Self {
        Self { store }
    }

    /// Returns the dependencies of `generated` that neither its model nor its
    /// transformation transitively depends on. Dependencies that are
    /// themselves valid outputs of another generation are accepted.
    pub fn violations(&self, generated: &CompilationUnit) -> BTreeSet<PathBuf> {
        let mut verified = HashMap::new();
        self.check(generated, &mut verified)
    }

    fn check(
        &self,
        generated: &CompilationUnit,
        verified: &mut HashMap<PathBuf, bool>,
    ) -> BTreeSet<PathBuf> {
        let Some(generation) = &generated.generation else {
            return BTreeSet::new();
        };
        // Assume success while checking, so that cycles of generated models terminate.
        verified.insert(generated.dep_path.clone(), true);

        let mut graph = UnitGraph::new(self.store);
        let model = graph.load(&generation.model);
        let transformation = graph.load(&generation.transformation);
        let mut allowed = graph.reachable(model);
        allowed.extend(graph.reachable(transformation));

        let root = graph.node(&generated.dep_path);
        let mut pending: Vec<PathBuf> = generated
            .module_deps
            .iter()
            .chain(&generated.circular_deps)
            .map(|d| d.dep_path.clone())
            .collect();
        let mut seen = HashSet::new();
        let mut violations = BTreeSet::new();

        while let Some(path) = pending.pop() {
            if !seen.insert(path.clone()) {
                continue;
            }
            let idx = graph.load(&path);
            if idx == root || allowed.contains(&idx) {
                continue;
            }
            let Some(unit) = self.store.read(&path) else {
                violations.insert(path);
                continue;
            };
            if unit.generation.is_some() && self.is_valid_generation(&unit, verified) {
                continue;
            }
            violations.insert(path);
            pending.extend(
                unit.module_deps
                    .iter()
                    .chain(&unit.circular_deps)
                    .map(|d| d.dep_path.clone()),
            );
        }
        violations
    }

    fn is_valid_generation(&self, unit: &CompilationUnit, verified: &mut HashMap<PathBuf, bool>) -> bool {
        if let Some(&known) = verified.get(&unit.dep_path) {
            return known;
        }
        let ok = self.check(unit, verified).is_empty();
        verified.insert(unit.dep_path.clone(), ok);
        ok
    }
}
