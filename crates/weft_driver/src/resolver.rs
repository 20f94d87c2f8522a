//! Import resolution.
//!
//! Resolving an import first brings the imported unit up to date, building it
//! on demand with the current build pushed onto the processing stack, and
//! then makes its compiled artifacts available: base-language binaries to the
//! base session, grammar and transformation modules to the unit's compound
//! modules, and editor services to the unit. An import whose sources are
//! already on the stack closes a cycle and is recorded as circular.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use weft_cache::{ExtensionKind, Stamp};
use weft_common::Term;
use weft_diagnostics::Severity;

use crate::declaration::ImportTarget;
use crate::env::{Environment, DEP_EXTENSION, MODEL_EXTENSION};
use crate::error::DriverError;
use crate::extension::ExtensionCompiler;
use crate::integrity::IntegrityChecker;
use crate::pipeline::{Pipeline, UnitBuildState};
use crate::renaming::{transformation_rule, transformed_model_module, Renaming};
use crate::request::{ActiveBuild, BuildRequest, SourceSet};
use crate::toolchain::APPLY_RENAMINGS_RULE;
use crate::unit::{AnalysisMessage, CompilationUnit, Generation, ModuleDependency};

/// Outcome of building a dependency.
pub(crate) enum SubBuild {
    /// The dependency's unit, successful or not.
    Built(Arc<CompilationUnit>),
    /// The build failed before producing a unit; the problem is recorded.
    Failed,
    /// The dependency is held by a concurrent build that waits on this
    /// build's chain.
    Cycle(Arc<ActiveBuild>),
}

/// A module an import target resolved to.
pub(crate) struct Resolved {
    pub(crate) module: String,
    pub(crate) circular: bool,
}

fn last_segment(module: &str) -> &str {
    module.rsplit('/').next().unwrap_or(module)
}

impl Pipeline<'_> {
    /// The processing stack including the current build.
    fn stack(&self) -> impl Iterator<Item = &Arc<ActiveBuild>> {
        self.request
            .processing
            .iter()
            .chain(std::iter::once(&self.active))
    }

    /// Looks for `<module>.<ext>` in the search roots, recording every probe.
    pub(crate) fn search_file(&self, state: &mut UnitBuildState, module: &str, ext: &str) -> Option<PathBuf> {
        let env = self.ctx.env();
        for root in env.search_roots() {
            let path = Environment::module_file(root, module, ext);
            if state.unit.require_file(&path) != Stamp::Missing {
                return Some(path);
            }
        }
        None
    }

    /// Finds the recorded unit of `module` in the search roots.
    pub(crate) fn locate_unit(&self, module: &str) -> Option<Arc<CompilationUnit>> {
        let env = self.ctx.env();
        let model_dep = format!("{MODEL_EXTENSION}.{DEP_EXTENSION}");
        env.search_roots().find_map(|root| {
            [DEP_EXTENSION, model_dep.as_str()]
                .into_iter()
                .find_map(|ext| self.ctx.store().read(&Environment::module_file(root, module, ext)))
        })
    }

    /// Finds the source of `module`: a source file in the source path, or a
    /// model in the output directory.
    pub(crate) fn locate_source(&self, module: &str) -> Option<PathBuf> {
        let env = self.ctx.env();
        let exists = |p: &Path| p.exists() || self.request.edited.contains_key(p);
        env.source_path
            .iter()
            .map(|root| Environment::module_file(root, module, self.ctx.language().source_extension()))
            .find(|p| exists(p))
            .or_else(|| Some(env.out_file(module, MODEL_EXTENSION)).filter(|p| exists(p)))
    }

    /// Builds `source` as a dependency of the current unit.
    ///
    /// Fatal errors other than the sub-build's own interruption propagate;
    /// everything else is recorded and yields [`SubBuild::Failed`].
    pub(crate) fn subcompile(
        &self,
        state: &mut UnitBuildState,
        source: &Path,
        generation: Option<Generation>,
    ) -> Result<SubBuild, DriverError> {
        let mut processing = self.request.processing.clone();
        processing.push(Arc::clone(&self.active));
        let request = BuildRequest {
            sources: SourceSet::single(source),
            edited: self.request.edited.clone(),
            renamings: state.renamings.clone(),
            generation,
            processing,
            monitor: self.request.monitor.clone(),
        };
        debug!(unit = %state.module, source = %source.display(), "building dependency");
        match self.ctx.build(request) {
            Ok(unit) => Ok(SubBuild::Built(unit)),
            Err(DriverError::ConcurrentCycle { partner }) => Ok(SubBuild::Cycle(partner)),
            Err(e @ DriverError::Interrupted) => {
                state.error(format!("Problems while compiling {}: {e}", source.display()));
                Ok(SubBuild::Failed)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                state.error(format!("Problems while compiling {}: {e}", source.display()));
                Ok(SubBuild::Failed)
            }
        }
    }

    /// Records `partner` as the other end of an import cycle through `module`.
    fn link_partner(&self, state: &mut UnitBuildState, module: &str, partner: &Arc<ActiveBuild>) {
        state
            .circular_links
            .insert(partner.sources.clone(), Arc::clone(partner));
        state.unit.add_circular_dependency(ModuleDependency {
            dep_path: partner.dep_path.clone(),
            sources: partner.sources.clone(),
        });
        state.session.process_module_import(module);
    }

    /// Brings the unit of `module` up to date and records the dependency.
    ///
    /// Returns `true` if the import is circular, in which case it must not be
    /// processed any further.
    pub(crate) fn prepare_import(
        &self,
        state: &mut UnitBuildState,
        module: &str,
        generation: Option<Generation>,
    ) -> Result<bool, DriverError> {
        if self.ctx.language().is_stdlib(module) {
            return Ok(false);
        }
        let located = self.locate_unit(module);
        let source = self.locate_source(module);
        let import_sources = match (&located, &source) {
            (Some(unit), _) => unit.sources.clone(),
            (None, Some(source)) => SourceSet::single(source),
            (None, None) => return Ok(false),
        };

        if self.active.sources.intersects(&import_sources) {
            debug!(unit = %state.module, module, "unit imports itself");
            return Ok(true);
        }
        if let Some(partner) = self
            .request
            .processing
            .iter()
            .find(|a| a.sources.intersects(&import_sources))
        {
            info!(unit = %state.module, module, partner = %partner.sources, "circular import");
            self.link_partner(state, module, partner);
            return Ok(true);
        }

        let reusable = located
            .as_ref()
            .filter(|u| self.ctx.store().is_consistent(u, &self.edited_stamps))
            .cloned();
        let mut built_here = false;
        let unit = match (reusable, &source) {
            (Some(unit), _) => unit,
            (None, Some(source)) => match self.subcompile(state, source, generation)? {
                SubBuild::Built(unit) => {
                    built_here = true;
                    unit
                }
                SubBuild::Failed => return Ok(false),
                SubBuild::Cycle(partner) => {
                    info!(unit = %state.module, module, partner = %partner.sources, "circular import across builds");
                    self.link_partner(state, module, &partner);
                    return Ok(true);
                }
            },
            (None, None) => match located {
                Some(unit) => {
                    warn!(unit = %state.module, module, "using outdated unit without sources");
                    unit
                }
                None => return Ok(false),
            },
        };

        if !unit.is_success() {
            state.error(format!("Problems while compiling {module}"));
        }

        // A unit built in this chain may have delegated to a concurrent
        // build blocked on the chain; that build compiles it.
        let delegate = self
            .stack()
            .find(|a| a.is_delegate_of(&unit.sources))
            .cloned()
            .or_else(|| {
                built_here
                    .then(|| self.ctx.in_flight.delegate_of(&unit.sources))
                    .flatten()
            });
        if let Some(delegate) = delegate {
            debug!(unit = %state.module, module, delegate = %delegate.sources, "import compiled by delegate");
            if delegate.sources != self.active.sources {
                state
                    .circular_links
                    .insert(delegate.sources.clone(), Arc::clone(&delegate));
            }
            state.unit.add_circular_dependency(unit.dependency());
            state.session.process_module_import(module);
            return Ok(true);
        }

        state.unit.add_module_dependency(&unit);
        Ok(false)
    }

    /// Makes the compiled artifacts of `module` available to the unit.
    /// Returns `true` if base-language code or an extension was found.
    pub(crate) fn process_import(&self, state: &mut UnitBuildState, module: &str) -> Result<bool, DriverError> {
        let language = self.ctx.language();
        let mut found = false;

        if language.is_stdlib(module) || self.search_file(state, module, language.binary_extension()).is_some() {
            state.session.process_module_import(module);
            found = true;
        }
        for (kind, ext) in [
            (ExtensionKind::Grammar, language.grammar_extension()),
            (ExtensionKind::Transformation, language.transformation_extension()),
        ] {
            if self.search_file(state, module, ext).is_some() {
                state.extension_mut(kind).add_import(module);
                found = true;
            }
        }
        if let Some(path) = self.search_file(state, module, language.editor_extension()) {
            let text = std::fs::read_to_string(&path).map_err(|e| DriverError::io(&path, e))?;
            match serde_json::from_str::<Vec<Term>>(&text) {
                Ok(services) => state.unit.add_editor_services(services),
                Err(e) => state.error(format!("invalid editor services in {}: {e}", path.display())),
            }
        }
        Ok(found)
    }

    /// Returns `true` if `module` has a model.
    pub(crate) fn process_model_import(&self, state: &mut UnitBuildState, module: &str) -> bool {
        self.search_file(state, module, MODEL_EXTENSION).is_some()
    }

    /// Resolves an import target, building transformed models as needed, and
    /// registers the import's renaming.
    pub(crate) fn resolve_import(
        &self,
        state: &mut UnitBuildState,
        target: &ImportTarget,
        alias: Option<&str>,
    ) -> Result<Option<Resolved>, DriverError> {
        match target {
            ImportTarget::Module(path) => {
                let circular = self.prepare_import(state, path, None)?;
                if let Some(alias) = alias {
                    state.renamings.insert(0, Renaming::new(alias, last_segment(path)));
                }
                Ok(Some(Resolved {
                    module: path.clone(),
                    circular,
                }))
            }
            ImportTarget::Apply { .. } => {
                let Some(resolved) = self.resolve_module(state, target, true)? else {
                    return Ok(None);
                };
                let renaming = match alias {
                    Some(alias) => Renaming::new(alias, last_segment(&resolved.module)),
                    None => Renaming::from_paths(target.innermost_model(), &resolved.module),
                };
                state.renamings.insert(0, renaming);
                Ok(Some(resolved))
            }
        }
    }

    /// Resolves a model (`as_model`) or transformation operand.
    pub(crate) fn resolve_module(
        &self,
        state: &mut UnitBuildState,
        target: &ImportTarget,
        as_model: bool,
    ) -> Result<Option<Resolved>, DriverError> {
        match target {
            ImportTarget::Module(path) => {
                let circular = self.prepare_import(state, path, None)?;
                let ext = if as_model {
                    MODEL_EXTENSION
                } else {
                    self.ctx.language().transformation_extension()
                };
                if circular || self.search_file(state, path, ext).is_some() {
                    Ok(Some(Resolved {
                        module: path.clone(),
                        circular,
                    }))
                } else {
                    Ok(None)
                }
            }
            ImportTarget::Apply { transformation, model } => self.transform_model(state, model, transformation),
        }
    }

    /// Applies a transformation to a model and builds the result as a unit of
    /// its own, reusing an up-to-date earlier result.
    fn transform_model(
        &self,
        state: &mut UnitBuildState,
        model_target: &ImportTarget,
        trans_target: &ImportTarget,
    ) -> Result<Option<Resolved>, DriverError> {
        let Some(model) = self.resolve_module(state, model_target, true)? else {
            state.error(format!("model not found: {model_target}"));
            return Ok(None);
        };
        let Some(trans) = self.resolve_module(state, trans_target, false)? else {
            state.error(format!("transformation not found: {trans_target}"));
            return Ok(None);
        };
        if model.circular || trans.circular {
            state.error(format!(
                "Failed to apply transformation {} to model {}: the operands are part of an import cycle",
                trans.module, model.module
            ));
            return Ok(None);
        }

        let out_module = transformed_model_module(&model.module, &trans.module);
        let out_file = self.ctx.env().out_file(&out_module, MODEL_EXTENSION);
        let trans_unit = self.locate_unit(&trans.module);
        let generation = match (self.locate_unit(&model.module), &trans_unit) {
            (Some(m), Some(t)) => Some(Generation {
                model: m.dep_path.clone(),
                transformation: t.dep_path.clone(),
            }),
            (m, _) => {
                let missing = if m.is_none() { &model.module } else { &trans.module };
                let message = format!(
                    "dependencies of generated model {out_module} are not checked: {missing} has no unit record"
                );
                warn!(unit = %state.module, "{message}");
                state.unit.analysis.push(AnalysisMessage {
                    severity: Severity::Warning,
                    message,
                });
                None
            }
        };

        let fresh = out_file.exists()
            && self
                .locate_unit(&out_module)
                .is_some_and(|u| self.ctx.store().is_consistent(&u, &self.edited_stamps));
        if fresh {
            debug!(unit = %state.module, model = %out_module, "transformed model is up to date");
        } else {
            match self.apply_transformation(state, &model.module, &trans.module, trans_unit.as_deref(), &out_module) {
                Ok(term) => state.unit.generate_file(&out_file, &Self::model_json(&term)?)?,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    state.error(format!(
                        "Failed to apply transformation {} to model {}: {e}",
                        trans.module, model.module
                    ));
                    return Ok(None);
                }
            }
        }

        let circular = self.prepare_import(state, &out_module, generation)?;
        if let Some(unit) = self.locate_unit(&out_module) {
            let violations = IntegrityChecker::new(self.ctx.store()).violations(&unit);
            if !violations.is_empty() {
                let names: Vec<String> = violations.iter().map(|p| p.display().to_string()).collect();
                state.error(format!(
                    "generated model has dependencies not visible to its generators: {}",
                    names.join(", ")
                ));
            }
        }
        Ok(Some(Resolved {
            module: out_module,
            circular,
        }))
    }

    fn apply_transformation(
        &self,
        state: &mut UnitBuildState,
        model_module: &str,
        trans_module: &str,
        trans_unit: Option<&CompilationUnit>,
        out_module: &str,
    ) -> Result<Term, DriverError> {
        let language = self.ctx.language();
        let model_file = self
            .search_file(state, model_module, MODEL_EXTENSION)
            .ok_or_else(|| weft_common::InternalError::new(format!("model of {model_module} disappeared")))?;
        let trans_file = self
            .search_file(state, trans_module, language.transformation_extension())
            .ok_or_else(|| weft_common::InternalError::new(format!("transformation {trans_module} disappeared")))?;

        let model = self.read_model(&model_file)?;
        let body = std::fs::read_to_string(&trans_file).map_err(|e| DriverError::io(&trans_file, e))?;
        let affected = trans_unit.map(CompilationUnit::affected_files).unwrap_or_default();
        let program = ExtensionCompiler::new(self.ctx).compile(ExtensionKind::Transformation, &body, &affected)?;

        info!(unit = %state.module, model = model_module, transformation = trans_module, "applying transformation");
        let toolchain = self.ctx.toolchain();
        let transformed = toolchain.execute(&program, &transformation_rule(trans_module), &model, &[])?;
        let table = Renaming::table_term(&[Renaming::from_paths(model_module, out_module)]);
        Ok(toolchain.execute(&program, APPLY_RENAMINGS_RULE, &transformed, &[table])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_segment_of_module_paths() {
        assert_eq!(last_segment("a/b/C"), "C");
        assert_eq!(last_segment("C"), "C");
    }
}
