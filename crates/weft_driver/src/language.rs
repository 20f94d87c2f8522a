//! The base language: declaration classification and code generation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use weft_common::Term;
use weft_config::{ConstructorNames, LanguageConfig};

use crate::declaration::{
    BaseDecl, Declaration, ExportDecl, ExtensionDecl, ImportDecl, ImportTarget, ModelDecl, PlainDecl,
    TransformationDecl,
};
use crate::error::ToolchainError;
use crate::toolchain::{BaseCompiler, CompileJob};

/// A base language the driver extends.
pub trait BaseLanguage: Send + Sync {
    /// Language name.
    fn name(&self) -> &str;
    /// Language version.
    fn version(&self) -> &str;
    /// Extension of extensible source files.
    fn source_extension(&self) -> &str;
    /// Extension of generated base-language sources.
    fn base_extension(&self) -> &str;
    /// Extension of compiled base-language output.
    fn binary_extension(&self) -> &str;
    /// Extension of grammar modules.
    fn grammar_extension(&self) -> &str;
    /// Extension of transformation modules.
    fn transformation_extension(&self) -> &str;
    /// Extension of editor-service files.
    fn editor_extension(&self) -> &str;
    /// Grammar module every unit starts from.
    fn init_grammar(&self) -> &str;
    /// Transformation module every unit starts from.
    fn init_transformation(&self) -> &str;

    /// Returns `true` for modules the base compiler resolves on its own.
    fn is_stdlib(&self, module: &str) -> bool;

    /// Classifies a desugared top-level term.
    fn classify(&self, term: &Term) -> Declaration;

    /// Starts code generation for `module`, writing into `out_dir`.
    fn new_session(&self, module: &str, out_dir: &Path) -> Box<dyn BaseSession>;

    /// Compiles generated sources.
    fn compile(&self, job: &CompileJob) -> Result<std::collections::BTreeSet<PathBuf>, ToolchainError>;

    /// Version string of the whole toolchain, recorded in caches and records.
    fn toolchain_version(&self) -> String {
        format!("{}-{}", self.name(), self.version())
    }
}

/// Base-language code generation for one unit.
pub trait BaseSession: Send {
    /// The current namespace, empty or ending in `/`.
    fn namespace(&self) -> &str;

    /// Adds a base declaration. Returns the modules it requires.
    fn process_base_decl(&mut self, decl: &BaseDecl) -> Vec<String>;

    /// Records an import of a compiled module.
    fn process_module_import(&mut self, module: &str);

    /// Returns `true` if any code was generated.
    fn has_output(&self) -> bool;

    /// Path of the generated source file.
    fn generated_source_file(&self) -> PathBuf;

    /// The generated source text.
    fn generated_source(&self) -> String;
}

/// A base language whose declarations are recognized by constructor name.
pub struct ShapeLanguage {
    config: LanguageConfig,
    compiler: Arc<dyn BaseCompiler>,
}

impl ShapeLanguage {
    /// Creates the language from its configuration and compiler.
    pub fn new(config: LanguageConfig, compiler: Arc<dyn BaseCompiler>) -> Self {
        Self { config, compiler }
    }

    fn names(&self) -> &ConstructorNames {
        &self.config.constructors
    }

    fn import_target(&self, term: &Term) -> Option<ImportTarget> {
        let names = self.names();
        match term {
            Term::Str(path) => Some(ImportTarget::Module(path.clone())),
            t if t.is_appl(&names.module, 1) => t.arg(0)?.as_str().map(|p| ImportTarget::Module(p.to_string())),
            t if t.is_appl(&names.trans_app, 2) => Some(ImportTarget::Apply {
                transformation: Box::new(self.import_target(t.arg(0)?)?),
                model: Box::new(self.import_target(t.arg(1)?)?),
            }),
            _ => None,
        }
    }

    fn import(&self, term: &Term) -> Option<ImportDecl> {
        let names = self.names();
        let cons = term.cons()?;
        if cons != names.import && cons != names.trans_import {
            return None;
        }
        let target = self.import_target(term.arg(0)?)?;
        if cons == names.import && !matches!(target, ImportTarget::Module(_)) {
            return None;
        }
        let alias = term
            .arg(1)
            .and_then(Term::as_option)
            .and_then(Term::as_str)
            .map(str::to_string);
        Some(ImportDecl {
            target,
            alias,
            term: term.clone(),
        })
    }

    fn extension(&self, term: &Term) -> Option<ExtensionDecl> {
        let names = self.names();
        let name = term.arg(0)?.as_str()?.to_string();
        let mut decl = ExtensionDecl {
            name,
            grammar: None,
            transformation: None,
            editor_services: Vec::new(),
            term: term.clone(),
        };
        for fragment in term.arg(1)?.as_list()? {
            let text = || fragment.arg(0).and_then(Term::as_str).map(str::to_string);
            match fragment.cons()? {
                c if c == names.grammar_fragment => append(&mut decl.grammar, text()?),
                c if c == names.transformation_fragment => append(&mut decl.transformation, text()?),
                c if c == names.editor_fragment => {
                    decl.editor_services.extend(fragment.arg(0)?.as_list()?.iter().cloned())
                }
                _ => return None,
            }
        }
        Some(decl)
    }

    fn base(&self, term: &Term) -> Option<BaseDecl> {
        let name = term.arg(0)?.as_str()?.to_string();
        let code = term.arg(1)?.as_str()?.to_string();
        let requires = term
            .arg(2)?
            .as_list()?
            .iter()
            .map(|t| t.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?;
        Some(BaseDecl {
            name: Some(name),
            namespace: None,
            code,
            requires,
            term: term.clone(),
        })
    }

    fn classify_appl(&self, term: &Term) -> Option<Declaration> {
        let names = self.names();
        let cons = term.cons()?;
        let str_arg = |i: usize| term.arg(i).and_then(Term::as_str).map(str::to_string);

        if cons == names.import || cons == names.trans_import {
            return self.import(term).map(Declaration::Import);
        }
        if term.is_appl(&names.extension, 2) {
            return self.extension(term).map(Declaration::Extension);
        }
        if term.is_appl(&names.plain, 3) {
            return Some(Declaration::Plain(PlainDecl {
                name: str_arg(0)?,
                extension: term
                    .arg(1)
                    .and_then(Term::as_option)
                    .and_then(Term::as_str)
                    .map(str::to_string),
                body: str_arg(2)?,
                term: term.clone(),
            }));
        }
        if term.is_appl(&names.transformation, 2) {
            return Some(Declaration::Transformation(TransformationDecl {
                name: str_arg(0)?,
                body: str_arg(1)?,
                term: term.clone(),
            }));
        }
        if cons == names.model && !term.args().is_empty() {
            return Some(Declaration::Model(ModelDecl {
                name: str_arg(0)?,
                term: term.clone(),
            }));
        }
        if term.is_appl(&names.export, 2) {
            let inner = self.import(term.arg(1)?)?;
            return Some(Declaration::Export(ExportDecl {
                name: str_arg(0)?,
                target: inner.target,
                term: term.clone(),
            }));
        }
        if term.is_appl(&names.package, 1) {
            return Some(Declaration::Base(BaseDecl {
                name: None,
                namespace: Some(str_arg(0)?),
                code: String::new(),
                requires: Vec::new(),
                term: term.clone(),
            }));
        }
        if names.base.iter().any(|b| b == cons) && term.args().len() == 3 {
            return self.base(term).map(Declaration::Base);
        }
        None
    }
}

fn append(slot: &mut Option<String>, text: String) {
    match slot {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(&text);
        }
        None => *slot = Some(text),
    }
}

impl BaseLanguage for ShapeLanguage {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn version(&self) -> &str {
        &self.config.version
    }

    fn source_extension(&self) -> &str {
        &self.config.source_extension
    }

    fn base_extension(&self) -> &str {
        &self.config.base_extension
    }

    fn binary_extension(&self) -> &str {
        &self.config.binary_extension
    }

    fn grammar_extension(&self) -> &str {
        &self.config.grammar_extension
    }

    fn transformation_extension(&self) -> &str {
        &self.config.transformation_extension
    }

    fn editor_extension(&self) -> &str {
        &self.config.editor_extension
    }

    fn init_grammar(&self) -> &str {
        &self.config.init_grammar
    }

    fn init_transformation(&self) -> &str {
        &self.config.init_transformation
    }

    fn is_stdlib(&self, module: &str) -> bool {
        !self.config.stdlib_prefix.is_empty() && module.starts_with(&self.config.stdlib_prefix)
    }

    fn classify(&self, term: &Term) -> Declaration {
        match term {
            Term::List(items) => Declaration::List(items.iter().map(|t| self.classify(t)).collect()),
            Term::Str(code) => Declaration::Base(BaseDecl {
                name: None,
                namespace: None,
                code: code.clone(),
                requires: Vec::new(),
                term: term.clone(),
            }),
            _ => self
                .classify_appl(term)
                .unwrap_or_else(|| Declaration::Opaque(term.clone())),
        }
    }

    fn new_session(&self, module: &str, out_dir: &Path) -> Box<dyn BaseSession> {
        Box::new(ShapeSession::new(module, out_dir, &self.config.base_extension))
    }

    fn compile(&self, job: &CompileJob) -> Result<std::collections::BTreeSet<PathBuf>, ToolchainError> {
        self.compiler.compile(job)
    }
}

/// Code generation for [`ShapeLanguage`]: collects imports and code blocks
/// into one source file per unit.
struct ShapeSession {
    stem: String,
    out_dir: PathBuf,
    extension: String,
    namespace: String,
    imports: Vec<String>,
    body: Vec<String>,
}

impl ShapeSession {
    fn new(module: &str, out_dir: &Path, extension: &str) -> Self {
        let (namespace, stem) = match module.rsplit_once('/') {
            Some((dir, stem)) => (format!("{dir}/"), stem),
            None => (String::new(), module),
        };
        Self {
            stem: stem.to_string(),
            out_dir: out_dir.to_path_buf(),
            extension: extension.to_string(),
            namespace,
            imports: Vec::new(),
            body: Vec::new(),
        }
    }
}

impl BaseSession for ShapeSession {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn process_base_decl(&mut self, decl: &BaseDecl) -> Vec<String> {
        if let Some(ns) = &decl.namespace {
            let ns = ns.trim_matches('/').replace('.', "/");
            self.namespace = if ns.is_empty() { ns } else { format!("{ns}/") };
        }
        if !decl.code.is_empty() {
            self.body.push(decl.code.clone());
        }
        decl.requires.clone()
    }

    fn process_module_import(&mut self, module: &str) {
        if !self.imports.iter().any(|m| m == module) {
            self.imports.push(module.to_string());
        }
    }

    fn has_output(&self) -> bool {
        !self.body.is_empty()
    }

    fn generated_source_file(&self) -> PathBuf {
        self.out_dir
            .join(format!("{}{}.{}", self.namespace, self.stem, self.extension))
    }

    fn generated_source(&self) -> String {
        let mut text = String::new();
        for import in &self.imports {
            text.push_str(&format!("import {import}\n"));
        }
        if !self.imports.is_empty() {
            text.push('\n');
        }
        for block in &self.body {
            text.push_str(block);
            text.push('\n');
        }
        text
    }
}
