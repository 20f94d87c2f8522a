//! The declaration pipeline of a single unit.
//!
//! Declarations are fetched one at a time, analyzed, desugared, renamed and
//! dispatched by kind. Extension declarations grow the unit's grammar and
//! transformation, so every fetch parses with the grammar in effect after the
//! previous declaration. With atomic import parsing, the imports directly
//! following an import are parsed ahead with the same grammar and resolved
//! as written. After the last declaration the final compound
//! modules are checked and the generated base-language source is compiled,
//! or handed to a partner when the unit is part of an import cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use weft_cache::{ExtensionKind, SourceHasher, Stamp};
use weft_common::Term;

use crate::context::BuildContext;
use crate::declaration::{
    BaseDecl, Declaration, ExportDecl, ExtensionDecl, ImportDecl, ModelDecl, PlainDecl, TransformationDecl,
};
use crate::env::{is_model_file, MODEL_EXTENSION};
use crate::error::{DriverError, ToolchainError};
use crate::extension::{ExtensionCompiler, ExtensionState};
use crate::language::BaseSession;
use crate::provider::{DeclParser, DeclarationProvider, SourceDeclarationProvider, TermDeclarationProvider};
use crate::renaming::{rename_rule, transformation_rule, Renaming};
use crate::resolver::SubBuild;
use crate::request::{ActiveBuild, BuildRequest, CancelToken, SourceSet};
use crate::toolchain::{CompileJob, ModuleSource, ParsedDeclaration, APPLY_RENAMINGS_RULE, DESUGAR_RULE};
use crate::unit::{CompilationUnit, UnitState};

/// Constructor of the whole-file trees.
const UNIT_TREE_CONSTRUCTOR: &str = "CompilationUnit";

/// Boundaries at which a build may be interrupted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Fetching the next declaration.
    Fetching,
    /// Running the analysis step.
    Analyzing,
    /// Running the desugaring rule.
    Desugaring,
    /// Applying renamings.
    Renaming,
    /// Processing the declaration by kind.
    Dispatching,
    /// Compiling the final compound modules.
    Checking,
    /// Compiling or delegating the generated base-language source.
    Compiling,
    /// Assembling the unit.
    Done,
}

/// Mutable state of one unit while its pipeline runs.
pub(crate) struct UnitBuildState {
    pub(crate) unit: CompilationUnit,
    pub(crate) module: String,
    pub(crate) grammar: ExtensionState,
    pub(crate) transformation: ExtensionState,
    pub(crate) session: Box<dyn BaseSession>,
    pub(crate) sugared: Vec<Term>,
    pub(crate) desugared: Vec<Term>,
    pub(crate) renamings: Vec<Renaming>,
    pub(crate) circular_links: BTreeMap<SourceSet, Arc<ActiveBuild>>,
    pub(crate) depends_on_model: bool,
    pub(crate) exported: bool,
    pub(crate) foreign_extensions: Vec<(ExtensionKind, String)>,
    pub(crate) phase: Phase,
}

impl UnitBuildState {
    pub(crate) fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(unit = %self.module, "{message}");
        self.unit.add_error(message);
    }

    pub(crate) fn extension(&self, kind: ExtensionKind) -> &ExtensionState {
        match kind {
            ExtensionKind::Grammar => &self.grammar,
            ExtensionKind::Transformation => &self.transformation,
        }
    }

    pub(crate) fn extension_mut(&mut self, kind: ExtensionKind) -> &mut ExtensionState {
        match kind {
            ExtensionKind::Grammar => &mut self.grammar,
            ExtensionKind::Transformation => &mut self.transformation,
        }
    }

    fn primary(&self) -> PathBuf {
        self.unit
            .sources
            .primary()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// Runs the pipeline of one build.
pub(crate) struct Pipeline<'a> {
    pub(crate) ctx: &'a BuildContext,
    pub(crate) request: &'a BuildRequest,
    pub(crate) active: Arc<ActiveBuild>,
    pub(crate) cancel: &'a CancelToken,
    pub(crate) edited_stamps: BTreeMap<PathBuf, Stamp>,
}

/// Parses with the unit's current grammar, compiling it first if it changed.
struct GrammarParser<'p, 'a> {
    pipeline: &'p Pipeline<'a>,
    state: &'p mut UnitBuildState,
}

impl DeclParser for GrammarParser<'_, '_> {
    fn parse_next(&mut self, input: &str, recovery: bool) -> Result<ParsedDeclaration, DriverError> {
        let grammar = self
            .pipeline
            .current_artifact(self.state, ExtensionKind::Grammar)?
            .ok_or_else(|| ToolchainError::Unavailable {
                step: "compiled grammar".to_string(),
            })?;
        Ok(self.pipeline.ctx.toolchain().parse(&grammar, input, recovery)?)
    }
}

impl<'a> Pipeline<'a> {
    pub(crate) fn new(
        ctx: &'a BuildContext,
        request: &'a BuildRequest,
        active: Arc<ActiveBuild>,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            ctx,
            request,
            active,
            cancel,
            edited_stamps: request.edited_stamps(),
        }
    }

    /// Processes `unit` and hands it back together with the outcome.
    ///
    /// The unit is returned even on error so that the caller can persist
    /// whatever was collected.
    pub(crate) fn run(&self, unit: CompilationUnit) -> (CompilationUnit, Result<(), DriverError>) {
        let mut state = self.init_state(unit);
        let result = self.process(&mut state);
        (state.unit, result)
    }

    fn init_state(&self, mut unit: CompilationUnit) -> UnitBuildState {
        let env = self.ctx.env();
        let language = self.ctx.language();
        let primary = unit.sources.primary().map(Path::to_path_buf).unwrap_or_default();
        let module = env.module_of(&primary);
        unit.generation = self.request.generation.clone();

        UnitBuildState {
            grammar: ExtensionState::new(
                ExtensionKind::Grammar,
                format!("{module}-grammar"),
                language.init_grammar(),
            ),
            transformation: ExtensionState::new(
                ExtensionKind::Transformation,
                format!("{module}-transformation"),
                language.init_transformation(),
            ),
            session: language.new_session(&module, &env.out_dir),
            unit,
            module,
            sugared: Vec::new(),
            desugared: Vec::new(),
            renamings: self.request.renamings.clone(),
            circular_links: BTreeMap::new(),
            depends_on_model: false,
            exported: false,
            foreign_extensions: Vec::new(),
            phase: Phase::Fetching,
        }
    }

    /// Checks for cancellation at a phase boundary.
    pub(crate) fn stepped(&self, state: &mut UnitBuildState, phase: Phase) -> Result<(), DriverError> {
        state.phase = phase;
        if let Some(monitor) = &self.request.monitor {
            monitor.worked(&state.unit.sources, phase);
            if monitor.is_canceled() {
                self.cancel.cancel();
            }
        }
        if self.cancel.is_canceled() {
            debug!(unit = %state.module, phase = ?state.phase, "build interrupted");
            return Err(DriverError::Interrupted);
        }
        Ok(())
    }

    fn parser<'p>(&'p self, state: &'p mut UnitBuildState) -> GrammarParser<'p, 'a> {
        GrammarParser { pipeline: self, state }
    }

    fn process(&self, state: &mut UnitBuildState) -> Result<(), DriverError> {
        state.unit.state = UnitState::InProgress;
        if let Some(generation) = &self.request.generation {
            for generator in [&generation.model, &generation.transformation] {
                if let Some(unit) = self.ctx.store().read(generator) {
                    state.unit.add_module_dependency(&unit);
                }
            }
        }

        let mut provider = self.open_provider(state)?;
        debug!(unit = %state.module, start = provider.start_marker(), "processing declarations");
        while provider.has_next() {
            self.stepped(state, Phase::Fetching)?;
            let parsed = match provider.next(&mut self.parser(state), true, false) {
                Ok(parsed) => parsed,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    state.error(format!("failed to parse {}: {e}", state.primary().display()));
                    break;
                }
            };
            self.process_toplevel(state, provider.as_mut(), parsed)?;
        }

        self.stepped(state, Phase::Checking)?;
        self.check_extensions(state)?;
        self.stepped(state, Phase::Compiling)?;
        self.compile_or_delegate(state)?;
        self.stepped(state, Phase::Done)?;
        self.assemble(state)
    }

    /// Reads a file, preferring in-memory edits.
    pub(crate) fn read_text(&self, path: &Path) -> Result<String, DriverError> {
        match self.request.edited.get(path) {
            Some(text) => Ok(text.clone()),
            None => std::fs::read_to_string(path).map_err(|e| DriverError::io(path, e)),
        }
    }

    /// Reads a JSON-encoded model term.
    pub(crate) fn read_model(&self, path: &Path) -> Result<Term, DriverError> {
        let text = self.read_text(path)?;
        serde_json::from_str(&text).map_err(|e| DriverError::InvalidModel {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub(crate) fn model_json(term: &Term) -> Result<String, DriverError> {
        serde_json::to_string_pretty(term).map_err(|e| {
            weft_common::InternalError::new(format!("cannot encode model: {e}")).into()
        })
    }

    fn open_provider(&self, state: &mut UnitBuildState) -> Result<Box<dyn DeclarationProvider>, DriverError> {
        let primary = state.primary();
        if is_model_file(&primary) {
            let text = self.read_text(&primary)?;
            state.unit.record_source(&primary, SourceHasher::stamp_text(&text));
            let model = serde_json::from_str(&text).map_err(|e| DriverError::InvalidModel {
                path: primary.clone(),
                reason: e.to_string(),
            })?;
            return Ok(Box::new(TermDeclarationProvider::new(model)));
        }

        let mut input = String::new();
        let sources: Vec<PathBuf> = state.unit.sources.iter().map(Path::to_path_buf).collect();
        for source in sources {
            let text = self.read_text(&source)?;
            state.unit.record_source(&source, SourceHasher::stamp_text(&text));
            if !input.is_empty() && !input.ends_with('\n') {
                input.push('\n');
            }
            input.push_str(&text);
        }
        Ok(Box::new(SourceDeclarationProvider::new(input)))
    }

    /// Returns the artifact of the current compound module of `kind`,
    /// compiling it if extensions were added since the last compile.
    ///
    /// A failed compile is recorded and the previous artifact stays in use.
    pub(crate) fn current_artifact(
        &self,
        state: &mut UnitBuildState,
        kind: ExtensionKind,
    ) -> Result<Option<PathBuf>, DriverError> {
        if let Some(artifact) = state.extension(kind).current() {
            return Ok(Some(artifact.to_path_buf()));
        }
        let body = state.extension(kind).compound().render();
        let affected = state.unit.affected_files();
        match ExtensionCompiler::new(self.ctx).compile(kind, &body, &affected) {
            Ok(artifact) => {
                state.extension_mut(kind).set_compiled(Some(artifact.clone()));
                Ok(Some(artifact))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                state.error(format!("failed to compile {kind}: {e}"));
                state.extension_mut(kind).set_compiled(None);
                Ok(state.extension(kind).artifact().map(Path::to_path_buf))
            }
        }
    }

    fn process_toplevel(
        &self,
        state: &mut UnitBuildState,
        provider: &mut dyn DeclarationProvider,
        parsed: ParsedDeclaration,
    ) -> Result<(), DriverError> {
        state.unit.parse_errors.extend(parsed.errors);
        let first = parsed.term;
        let mut imports = Vec::new();

        if self.ctx.env().atomic_import_parsing && self.ctx.language().classify(&first).is_import() {
            while provider.has_next() {
                let next = match provider.next(&mut self.parser(state), true, true) {
                    Ok(next) => next,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(_) => break,
                };
                if !next.errors.is_empty() || !self.ctx.language().classify(&next.term).is_import() {
                    provider.retract(&next.term)?;
                    break;
                }
                imports.push(next.term);
            }
            debug!(unit = %state.module, imports = imports.len() + 1, "resolving import block");
        }

        self.process_declaration(state, first)?;
        for term in imports {
            self.stepped(state, Phase::Dispatching)?;
            let decl = self.ctx.language().classify(&term);
            state.sugared.push(term);
            self.dispatch(state, decl)?;
        }
        Ok(())
    }

    fn process_declaration(&self, state: &mut UnitBuildState, term: Term) -> Result<(), DriverError> {
        self.stepped(state, Phase::Analyzing)?;
        self.analyze(state, &term)?;

        self.stepped(state, Phase::Desugaring)?;
        let desugared = self.desugar(state, &term)?;

        self.stepped(state, Phase::Renaming)?;
        let renamed = self.apply_renamings(state, desugared)?;
        state.sugared.push(term);

        self.stepped(state, Phase::Dispatching)?;
        let decl = self.ctx.language().classify(&renamed);
        self.dispatch(state, decl)
    }

    fn analyze(&self, state: &mut UnitBuildState, term: &Term) -> Result<(), DriverError> {
        let Some(program) = self.current_artifact(state, ExtensionKind::Transformation)? else {
            return Ok(());
        };
        match self.ctx.toolchain().analyze(&program, term) {
            Ok(messages) => state.unit.analysis.extend(messages),
            Err(e) => state.error(format!("analysis failed: {e}")),
        }
        Ok(())
    }

    fn desugar(&self, state: &mut UnitBuildState, term: &Term) -> Result<Term, DriverError> {
        let Some(program) = self.current_artifact(state, ExtensionKind::Transformation)? else {
            return Ok(term.clone());
        };
        match self.ctx.toolchain().execute(&program, DESUGAR_RULE, term, &[]) {
            Ok(desugared) => Ok(desugared),
            Err(e) => {
                state.error(format!("desugaring failed: {e}"));
                Ok(term.clone())
            }
        }
    }

    fn apply_renamings(&self, state: &mut UnitBuildState, term: Term) -> Result<Term, DriverError> {
        if state.renamings.is_empty() {
            return Ok(term);
        }
        let Some(program) = state.transformation.artifact().map(Path::to_path_buf) else {
            return Ok(term);
        };
        let table = Renaming::table_term(&state.renamings);
        match self
            .ctx
            .toolchain()
            .execute(&program, APPLY_RENAMINGS_RULE, &term, &[table])
        {
            Ok(renamed) => Ok(renamed),
            Err(e) => {
                state.error(format!("renaming failed: {e}"));
                Ok(term)
            }
        }
    }

    /// Processes a declaration by kind. Errors other than fatal ones are
    /// recorded against the declaration.
    fn dispatch(&self, state: &mut UnitBuildState, decl: Declaration) -> Result<(), DriverError> {
        debug!(unit = %state.module, kind = decl.kind(), "dispatching");
        let result = match decl {
            Declaration::List(decls) => {
                for decl in decls {
                    self.dispatch(state, decl)?;
                }
                Ok(())
            }
            Declaration::Import(d) => self.process_import_decl(state, d),
            Declaration::Base(d) => self.process_base_decl(state, d),
            Declaration::Extension(d) => self.process_extension_decl(state, d),
            Declaration::Plain(d) => self.process_plain_decl(state, d),
            Declaration::Transformation(d) => self.process_transformation_decl(state, d),
            Declaration::Model(d) => self.process_model_decl(state, d),
            Declaration::Export(d) => self.process_export_decl(state, d),
            Declaration::Opaque(term) => {
                state.error(format!(
                    "unexpected toplevel declaration, desugaring probably failed: {term}"
                ));
                state.desugared.push(term);
                Ok(())
            }
        };
        match result {
            Err(e) if !e.is_fatal() => {
                warn!(unit = %state.module, "declaration failed: {e}");
                state.error(e.to_string());
                Ok(())
            }
            other => other,
        }
    }

    fn process_import_decl(&self, state: &mut UnitBuildState, decl: ImportDecl) -> Result<(), DriverError> {
        state.desugared.push(decl.term.clone());
        let Some(resolved) = self.resolve_import(state, &decl.target, decl.alias.as_deref())? else {
            return Ok(());
        };
        if resolved.circular {
            return Ok(());
        }
        self.import_module(state, &resolved.module)
    }

    /// Makes a resolved, non-circular module available to the unit.
    pub(crate) fn import_module(&self, state: &mut UnitBuildState, module: &str) -> Result<(), DriverError> {
        let code = self.process_import(state, module)?;
        let model = self.process_model_import(state, module);
        if model && !code {
            debug!(unit = %state.module, module, "import resolves to a model only");
            state.depends_on_model = true;
        } else if !code && !model {
            state.error(format!("module not found: {module}"));
        }
        Ok(())
    }

    fn process_base_decl(&self, state: &mut UnitBuildState, decl: BaseDecl) -> Result<(), DriverError> {
        state.desugared.push(decl.term.clone());
        if state.depends_on_model {
            return Ok(());
        }
        for module in state.session.process_base_decl(&decl) {
            if !self.prepare_import(state, &module, None)? {
                self.import_module(state, &module)?;
            }
        }
        Ok(())
    }

    fn process_extension_decl(&self, state: &mut UnitBuildState, decl: ExtensionDecl) -> Result<(), DriverError> {
        state.desugared.push(decl.term.clone());
        if state.depends_on_model {
            return Ok(());
        }
        let env = self.ctx.env();
        let language = self.ctx.language();
        let full = format!("{}{}", state.session.namespace(), decl.name);

        let fragments = [
            (ExtensionKind::Grammar, &decl.grammar, language.grammar_extension()),
            (
                ExtensionKind::Transformation,
                &decl.transformation,
                language.transformation_extension(),
            ),
        ];
        for (kind, fragment, ext) in fragments {
            let Some(body) = fragment else {
                continue;
            };
            let source = ModuleSource {
                name: full.clone(),
                imports: state.extension(kind).available().to_vec(),
                body: body.clone(),
            };
            state.unit.generate_file(&env.out_file(&full, ext), &source.render())?;
            state.extension_mut(kind).add_import(&full);
            if full != state.module {
                state.foreign_extensions.push((kind, full.clone()));
            }
        }

        if !decl.editor_services.is_empty() {
            let json = serde_json::to_string_pretty(&decl.editor_services)
                .map_err(|e| weft_common::InternalError::new(format!("cannot encode editor services: {e}")))?;
            state
                .unit
                .generate_file(&env.out_file(&full, language.editor_extension()), &json)?;
            state.unit.add_editor_services(decl.editor_services);
        }
        info!(unit = %state.module, extension = %full, "extension declared");
        Ok(())
    }

    /// Checks a declaration is named after the unit's file.
    fn check_name(&self, state: &mut UnitBuildState, name: &str) -> bool {
        let primary = state.primary();
        let stem = primary
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name == stem {
            true
        } else {
            state.error(format!("Declaration name {name} does not match file name {stem}"));
            false
        }
    }

    fn process_plain_decl(&self, state: &mut UnitBuildState, decl: PlainDecl) -> Result<(), DriverError> {
        state.desugared.push(decl.term.clone());
        if !self.check_name(state, &decl.name) || state.depends_on_model {
            return Ok(());
        }
        let file = match &decl.extension {
            Some(ext) => format!("{}{}.{ext}", state.session.namespace(), decl.name),
            None => format!("{}{}", state.session.namespace(), decl.name),
        };
        let path = self.ctx.env().out_dir.join(file);
        state.unit.generate_file(&path, &decl.body)
    }

    fn process_transformation_decl(
        &self,
        state: &mut UnitBuildState,
        decl: TransformationDecl,
    ) -> Result<(), DriverError> {
        state.desugared.push(decl.term.clone());
        if !self.check_name(state, &decl.name) || state.depends_on_model {
            return Ok(());
        }
        let full = format!("{}{}", state.session.namespace(), decl.name);
        let rule = transformation_rule(&full);
        let source = ModuleSource {
            name: full.clone(),
            imports: state.transformation.available().to_vec(),
            body: rename_rule(&decl.body, "main", &rule),
        };
        let path = self
            .ctx
            .env()
            .out_file(&full, self.ctx.language().transformation_extension());
        state.unit.generate_file(&path, &source.render())?;
        debug!(unit = %state.module, %rule, "transformation declared");
        Ok(())
    }

    fn process_model_decl(&self, state: &mut UnitBuildState, decl: ModelDecl) -> Result<(), DriverError> {
        state.desugared.push(decl.term.clone());
        self.check_name(state, &decl.name);
        Ok(())
    }

    fn process_export_decl(&self, state: &mut UnitBuildState, decl: ExportDecl) -> Result<(), DriverError> {
        state.desugared.push(decl.term.clone());
        if !self.check_name(state, &decl.name) {
            return Ok(());
        }
        let Some(resolved) = self.resolve_import(state, &decl.target, None)? else {
            state.error(format!("Could not resolve module for export: {}", decl.target));
            return Ok(());
        };
        if resolved.circular {
            state.error(format!("Export of {} is cyclic", resolved.module));
            return Ok(());
        }
        let Some(model_file) = self.search_file(state, &resolved.module, MODEL_EXTENSION) else {
            state.error(format!("Could not resolve model for export: {}", resolved.module));
            return Ok(());
        };

        let model = self.read_model(&model_file)?;
        let exported = match self.current_artifact(state, ExtensionKind::Transformation)? {
            Some(program) => {
                let table = Renaming::table_term(&[Renaming::from_paths(&resolved.module, &state.module)]);
                self.ctx
                    .toolchain()
                    .execute(&program, APPLY_RENAMINGS_RULE, &model, &[table])?
            }
            None => model,
        };

        let out = self.ctx.env().out_file(&state.module, MODEL_EXTENSION);
        state.unit.generate_file(&out, &Self::model_json(&exported)?)?;
        state.exported = true;

        match self.subcompile(state, &out, None)? {
            SubBuild::Built(sub) => {
                if !sub.is_success() {
                    state.error(format!("Problems while compiling {}", out.display()));
                }
                state.unit.merge_bookkeeping(&sub);
            }
            SubBuild::Failed => {}
            SubBuild::Cycle(_) => state.error(format!("Export of {} is cyclic", state.module)),
        }
        Ok(())
    }

    fn check_extensions(&self, state: &mut UnitBuildState) -> Result<(), DriverError> {
        state.unit.parse_artifact = if self.ctx.env().no_checking {
            state.grammar.artifact().map(Path::to_path_buf)
        } else {
            self.current_artifact(state, ExtensionKind::Grammar)?
        };
        state.unit.transform_artifact = self.current_artifact(state, ExtensionKind::Transformation)?;
        Ok(())
    }

    fn compile_or_delegate(&self, state: &mut UnitBuildState) -> Result<(), DriverError> {
        let own = if state.session.has_output() {
            let path = state.session.generated_source_file();
            let source = state.session.generated_source();
            state.unit.generate_file(&path, &source)?;
            Some(path)
        } else {
            None
        };

        let deferred = self.active.close();
        if !state.circular_links.is_empty() {
            let mut files: BTreeSet<PathBuf> = own.into_iter().collect();
            files.extend(deferred);
            let partners = self.cycle_partners(state);
            match hand_over(&partners, &state.unit.sources, &files, state.depends_on_model)? {
                Some(partner) => {
                    info!(unit = %state.module, partner = %partner.sources, "delegating base compilation");
                }
                None => debug!(unit = %state.module, "import cycle broken by model dependency"),
            }
            return Ok(());
        }

        let mut sources: Vec<PathBuf> = own.into_iter().collect();
        sources.extend(deferred);
        if sources.is_empty() {
            debug!(unit = %state.module, "no base-language output");
            return Ok(());
        }

        let env = self.ctx.env();
        let job = CompileJob {
            sources,
            out_dir: env.out_dir.clone(),
            include_path: env.search_roots().map(Path::to_path_buf).collect(),
        };
        info!(unit = %state.module, files = job.sources.len(), "compiling base-language sources");
        match self.ctx.language().compile(&job) {
            Ok(produced) => {
                for file in produced {
                    state.unit.add_generated(&file);
                }
            }
            Err(e) => state.error(format!("base compilation failed: {e}")),
        }
        Ok(())
    }

    /// Linked partners still on this thread's stack, innermost first, then
    /// partners building concurrently.
    fn cycle_partners(&self, state: &UnitBuildState) -> Vec<Arc<ActiveBuild>> {
        let mut partners: Vec<Arc<ActiveBuild>> = self
            .request
            .processing
            .iter()
            .rev()
            .filter(|a| state.circular_links.contains_key(&a.sources))
            .cloned()
            .collect();
        partners.extend(
            state
                .circular_links
                .values()
                .filter(|a| !self.request.is_processing(&a.sources))
                .cloned(),
        );
        partners
    }

    fn assemble(&self, state: &mut UnitBuildState) -> Result<(), DriverError> {
        let sugared = std::mem::take(&mut state.sugared);
        let desugared = std::mem::take(&mut state.desugared);
        let desugared_tree = Term::appl(UNIT_TREE_CONSTRUCTOR, vec![Term::List(desugared)]);
        state.unit.sugared_tree = Some(Term::appl(UNIT_TREE_CONSTRUCTOR, vec![Term::List(sugared)]));

        let env = self.ctx.env();
        let language = self.ctx.language();
        for (kind, ext) in [
            (ExtensionKind::Grammar, language.grammar_extension()),
            (ExtensionKind::Transformation, language.transformation_extension()),
        ] {
            let modules: Vec<String> = state
                .foreign_extensions
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, m)| m.clone())
                .collect();
            let path = env.out_file(&state.module, ext);
            if modules.is_empty() || state.unit.generated_files.contains_key(&path) {
                continue;
            }
            let source = ModuleSource::compound(state.module.clone(), modules);
            state.unit.generate_file(&path, &source.render())?;
        }

        if !is_model_file(&state.primary()) && !state.exported {
            let path = env.out_file(&state.module, MODEL_EXTENSION);
            state.unit.generate_file(&path, &Self::model_json(&desugared_tree)?)?;
        }
        state.unit.desugared_tree = Some(desugared_tree);
        Ok(())
    }
}

/// Hands the base sources of a unit in an import cycle to the first partner
/// still accepting delegations.
///
/// Without an open partner the cycle can only be broken by a model
/// dependency, in which case `None` is returned and nothing is compiled.
/// A partner is closed once it compiled or failed, which happens when a
/// concurrent partner gave up waiting for this unit.
pub(crate) fn hand_over<'p>(
    partners: &'p [Arc<ActiveBuild>],
    from: &SourceSet,
    files: &BTreeSet<PathBuf>,
    depends_on_model: bool,
) -> Result<Option<&'p Arc<ActiveBuild>>, DriverError> {
    match partners
        .iter()
        .find(|p| p.accept_delegation(from.clone(), files.clone()))
    {
        Some(partner) => Ok(Some(partner)),
        None if depends_on_model => Ok(None),
        None => Err(DriverError::CannotBreakCycle { sources: from.clone() }),
    }
}
