//! Shared fixtures for the driver integration tests.
//!
//! [`FakeToolchain`] stands in for both the extension toolchain and the base
//! compiler. Its "grammar" is line based: every line is one declaration, and
//! grammar modules contribute `keyword <word>` lines that make `<word> <rest>`
//! parse as a sugared declaration. Transformation modules contribute
//! `rewrite <word>` lines that desugar it into base code, and `main-*` rules
//! for model transformations.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tempfile::TempDir;
use weft_cache::ExtensionKind;
use weft_common::Term;
use weft_config::{LanguageConfig, ProjectConfig};
use weft_driver::{
    AnalysisMessage, BaseCompiler, BuildContext, BuildRequest, CompilationUnit, CompileJob, Environment,
    ExtensionToolchain, ParseError, ParsedDeclaration, ProcessingListener, Renaming, ShapeLanguage, SourceSet,
    ToolchainError,
};

// ---------------------------------------------------------------------------
// Gate: blocks base compiles until released
// ---------------------------------------------------------------------------

/// Holds base compiles until [`Gate::open`] is called.
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Default)]
struct GateState {
    closed: bool,
    waiting: usize,
}

impl Gate {
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    pub fn open(&self) {
        self.state.lock().closed = false;
        self.changed.notify_all();
    }

    /// Blocks until at least one compile is held at the gate.
    pub fn wait_for_arrival(&self) {
        self.wait_for_arrivals(1);
    }

    /// Blocks until `count` compiles are held at the gate.
    pub fn wait_for_arrivals(&self, count: usize) {
        let mut state = self.state.lock();
        while state.waiting < count {
            self.changed.wait_for(&mut state, Duration::from_millis(10));
        }
    }

    fn pass(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            return;
        }
        state.waiting += 1;
        self.changed.notify_all();
        while state.closed {
            self.changed.wait(&mut state);
        }
        state.waiting -= 1;
    }
}

// ---------------------------------------------------------------------------
// FakeToolchain
// ---------------------------------------------------------------------------

fn s(text: &str) -> Term {
    Term::string(text)
}

#[derive(Default)]
pub struct FakeToolchain {
    /// `(kind, module name)` of every extension module compiled.
    pub modules: Mutex<Vec<(ExtensionKind, String)>>,
    /// Sources of every base compile, one entry per invocation.
    pub base_jobs: Mutex<Vec<Vec<PathBuf>>>,
    pub parses: AtomicUsize,
    pub gate: Gate,
}

impl FakeToolchain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn base_compiles(&self) -> usize {
        self.base_jobs.lock().len()
    }

    pub fn module_compiles(&self, kind: ExtensionKind) -> usize {
        self.modules.lock().iter().filter(|(k, _)| *k == kind).count()
    }

    /// How often the compound module of `unit` was compiled.
    pub fn compound_compiles(&self, kind: ExtensionKind, unit: &str) -> usize {
        let suffix = match kind {
            ExtensionKind::Grammar => "grammar",
            ExtensionKind::Transformation => "transformation",
        };
        let name = format!("{unit}-{suffix}");
        self.modules
            .lock()
            .iter()
            .filter(|(k, m)| *k == kind && *m == name)
            .count()
    }

    fn collect(
        text: &str,
        ext: &str,
        search_path: &[PathBuf],
        seen: &mut BTreeSet<String>,
        out: &mut Vec<String>,
    ) -> Result<(), ToolchainError> {
        for line in text.lines() {
            if let Some(imports) = line.strip_prefix("imports ") {
                for import in imports.split_whitespace() {
                    if import.starts_with("std/") || !seen.insert(import.to_string()) {
                        continue;
                    }
                    let found = search_path
                        .iter()
                        .map(|root| root.join(format!("{import}.{ext}")))
                        .find(|p| p.exists())
                        .ok_or_else(|| ToolchainError::failed("compile", format!("module {import} not found")))?;
                    let text = std::fs::read_to_string(&found)
                        .map_err(|e| ToolchainError::failed("compile", e.to_string()))?;
                    Self::collect(&text, ext, search_path, seen, out)?;
                }
            } else if line.starts_with("keyword ") && line.ends_with('!') {
                return Err(ToolchainError::failed("compile", format!("invalid keyword in `{line}`")));
            } else if line.starts_with("keyword ") || line.starts_with("rewrite ") || line.starts_with("main-") {
                out.push(line.to_string());
            }
        }
        Ok(())
    }

    fn read_lines(path: &Path) -> Result<Vec<String>, ToolchainError> {
        let text = std::fs::read_to_string(path).map_err(|e| ToolchainError::failed("read", e.to_string()))?;
        Ok(text.lines().map(str::to_string).collect())
    }

    fn parse_line(line: &str, keywords: &BTreeSet<String>) -> Option<Term> {
        let opt = |alias: Option<&str>| alias.map(|a| Term::some(s(a))).unwrap_or_else(Term::none);
        let split_alias = |text: &str| match text.split_once(" as ") {
            Some((path, alias)) => (path.trim().to_string(), Some(alias.trim().to_string())),
            None => (text.trim().to_string(), None),
        };
        let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
        let term = match head {
            "import" => {
                let (path, alias) = split_alias(rest);
                Term::appl("Import", vec![s(&path), opt(alias.as_deref())])
            }
            "transimport" => {
                let (spec, alias) = split_alias(rest);
                let mut parts = spec.split_whitespace();
                let trans = parts.next()?;
                let model = parts.next()?;
                let app = Term::appl(
                    "TransApp",
                    vec![
                        Term::appl("Module", vec![s(trans)]),
                        Term::appl("Module", vec![s(model)]),
                    ],
                );
                Term::appl("TransImport", vec![app, opt(alias.as_deref())])
            }
            "extension" => {
                let mut parts = rest.split(" | ");
                let name = parts.next()?.trim();
                let mut fragments = Vec::new();
                for part in parts {
                    let (kind, text) = part.split_once(' ')?;
                    fragments.push(match kind {
                        "keyword" => Term::appl("Grammar", vec![s(part)]),
                        "rewrite" => Term::appl("Transformation", vec![s(part)]),
                        "editor" => Term::appl("Editor", vec![Term::List(vec![s(text)])]),
                        _ => return None,
                    });
                }
                Term::appl("ExtensionDec", vec![s(name), Term::List(fragments)])
            }
            "class" => {
                let (name, requires) = match rest.split_once(" requires ") {
                    Some((name, req)) => (name, req.split(',').map(|r| s(r.trim())).collect()),
                    None => (rest, Vec::new()),
                };
                Term::appl("BaseDec", vec![s(name), s(&format!("class {name}")), Term::List(requires)])
            }
            "package" => Term::appl("PackageDec", vec![s(rest)]),
            "plain" => {
                let mut parts = rest.splitn(3, ' ');
                let name = parts.next()?;
                let ext = parts.next()?;
                let body = parts.next().unwrap_or("");
                Term::appl("PlainDec", vec![s(name), Term::some(s(ext)), s(body)])
            }
            "transformation" => {
                let (name, body) = rest.split_once(' ')?;
                Term::appl("TransDec", vec![s(name), s(body)])
            }
            "model" => Term::appl("ModelDec", vec![s(rest)]),
            "export" => {
                let (name, from) = rest.split_once(" from ")?;
                Term::appl(
                    "ExportDec",
                    vec![s(name), Term::appl("Import", vec![s(from), Term::none()])],
                )
            }
            word if keywords.contains(word) => Term::appl("Sugar", vec![s(word), s(rest)]),
            _ => return None,
        };
        Some(term)
    }

    fn run_rule(action: &str, term: &Term) -> Result<Term, ToolchainError> {
        if action == "identity" {
            return Ok(term.clone());
        }
        if let Some(module) = action.strip_prefix("addimport ") {
            let mut decls = term
                .arg(0)
                .and_then(Term::as_list)
                .map(<[Term]>::to_vec)
                .unwrap_or_default();
            decls.push(Term::appl("Import", vec![Term::string(module), Term::none()]));
            return Ok(Term::appl("CompilationUnit", vec![Term::List(decls)]));
        }
        Err(ToolchainError::failed("execute", format!("unknown action {action}")))
    }
}

impl ExtensionToolchain for FakeToolchain {
    fn compile_module(
        &self,
        kind: ExtensionKind,
        source: &Path,
        artifact: &Path,
        search_path: &[PathBuf],
    ) -> Result<(), ToolchainError> {
        let text = std::fs::read_to_string(source).map_err(|e| ToolchainError::failed("compile", e.to_string()))?;
        let name = text
            .lines()
            .next()
            .and_then(|l| l.strip_prefix("module "))
            .unwrap_or_default()
            .to_string();
        self.modules.lock().push((kind, name));

        let ext = source.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let mut out = Vec::new();
        Self::collect(&text, ext, search_path, &mut BTreeSet::new(), &mut out)?;
        std::fs::write(artifact, out.join("\n")).map_err(|e| ToolchainError::failed("compile", e.to_string()))
    }

    fn parse(&self, grammar: &Path, input: &str, recovery: bool) -> Result<ParsedDeclaration, ToolchainError> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        let keywords: BTreeSet<String> = Self::read_lines(grammar)?
            .iter()
            .filter_map(|l| l.strip_prefix("keyword "))
            .map(str::to_string)
            .collect();

        let start = input.len() - input.trim_start().len();
        let rest = &input[start..];
        let (line, len) = match rest.find('\n') {
            Some(i) => (&rest[..i], i + 1),
            None => (rest, rest.len()),
        };
        let line = line.trim();
        let consumed = start + len;

        match Self::parse_line(line, &keywords) {
            Some(term) => Ok(ParsedDeclaration {
                term,
                consumed,
                errors: Vec::new(),
            }),
            None if recovery => Ok(ParsedDeclaration {
                term: Term::appl("Broken", vec![Term::string(line)]),
                consumed,
                errors: vec![ParseError {
                    line: 1,
                    column: 1,
                    message: format!("unexpected `{line}`"),
                }],
            }),
            None => Err(ToolchainError::failed("parse", format!("unexpected `{line}`"))),
        }
    }

    fn execute(&self, program: &Path, rule: &str, term: &Term, args: &[Term]) -> Result<Term, ToolchainError> {
        let lines = Self::read_lines(program)?;
        match rule {
            "internal-main" => match term {
                Term::Appl { cons, args } if cons == "Sugar" => {
                    let word = args.first().and_then(Term::as_str).unwrap_or_default();
                    let rest = args.get(1).and_then(Term::as_str).unwrap_or_default();
                    if !lines.iter().any(|l| l == &format!("rewrite {word}")) {
                        return Err(ToolchainError::failed("desugar", format!("no rewrite for {word}")));
                    }
                    Ok(Term::appl(
                        "BaseDec",
                        vec![
                            Term::string(rest),
                            Term::string(format!("{word} {rest}")),
                            Term::List(Vec::new()),
                        ],
                    ))
                }
                other => Ok(other.clone()),
            },
            "apply-renamings" => {
                let table = args
                    .first()
                    .and_then(Renaming::from_table_term)
                    .ok_or_else(|| ToolchainError::failed("rename", "malformed renaming table"))?;
                Ok(term.map_strings(&mut |name| Renaming::rename_all(&table, name)))
            }
            rule => {
                let prefix = format!("{rule} = ");
                let action = lines
                    .iter()
                    .find_map(|l| l.strip_prefix(&prefix))
                    .ok_or_else(|| ToolchainError::failed("execute", format!("no rule {rule}")))?;
                Self::run_rule(action, term)
            }
        }
    }

    fn analyze(&self, _program: &Path, _term: &Term) -> Result<Vec<AnalysisMessage>, ToolchainError> {
        Ok(Vec::new())
    }
}

impl BaseCompiler for FakeToolchain {
    fn compile(&self, job: &CompileJob) -> Result<BTreeSet<PathBuf>, ToolchainError> {
        self.gate.pass();
        self.base_jobs.lock().push(job.sources.clone());
        let mut produced = BTreeSet::new();
        for source in &job.sources {
            let text =
                std::fs::read_to_string(source).map_err(|e| ToolchainError::failed("base compile", e.to_string()))?;
            if text.contains("class Broken") {
                return Err(ToolchainError::failed("base compile", "Broken does not compile"));
            }
            let binary = source.with_extension("bin");
            std::fs::write(&binary, text).map_err(|e| ToolchainError::failed("base compile", e.to_string()))?;
            produced.insert(binary);
        }
        Ok(produced)
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingListener {
    pub started: Mutex<Vec<SourceSet>>,
    pub done: Mutex<Vec<SourceSet>>,
}

impl ProcessingListener for RecordingListener {
    fn processing_starts(&self, sources: &SourceSet) {
        self.started.lock().push(sources.clone());
    }

    fn processing_done(&self, unit: &CompilationUnit) {
        self.done.lock().push(unit.sources.clone());
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// A temporary project laid out as `src/`, `lib/`, `bin/` and a cache directory.
pub struct Project {
    pub dir: TempDir,
    pub toolchain: Arc<FakeToolchain>,
}

impl Project {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        Self {
            dir,
            toolchain: FakeToolchain::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn src(&self, name: &str) -> PathBuf {
        self.root().join("src").join(name)
    }

    pub fn out(&self, name: &str) -> PathBuf {
        self.root().join("bin").join(name)
    }

    /// Writes `src/<name>` and returns its path.
    pub fn write(&self, name: &str, text: &str) -> PathBuf {
        let path = self.src(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, text).unwrap();
        path
    }

    pub fn language() -> LanguageConfig {
        LanguageConfig {
            init_grammar: "std/lib-grammar".to_string(),
            init_transformation: "std/lib-transformation".to_string(),
            ..LanguageConfig::default()
        }
    }

    pub fn env(&self) -> Environment {
        let mut config = ProjectConfig::new("test");
        config.project.include_path = vec!["lib".to_string()];
        Environment::from_config(self.root(), &config)
    }

    /// A fresh context, as a new driver process would create.
    pub fn context(&self) -> BuildContext {
        self.context_with(|_| {})
    }

    pub fn context_with(&self, configure: impl FnOnce(&mut Environment)) -> BuildContext {
        let mut env = self.env();
        configure(&mut env);
        let language = ShapeLanguage::new(Self::language(), self.toolchain.clone());
        BuildContext::new(env, Arc::new(language), self.toolchain.clone()).unwrap()
    }

    pub fn build(&self, ctx: &BuildContext, name: &str) -> Arc<CompilationUnit> {
        ctx.build(BuildRequest::new(self.src(name))).unwrap()
    }
}
