//! Seams to the external tools the driver orchestrates.
//!
//! The driver never parses, rewrites or compiles anything itself. Grammar
//! and transformation modules are compiled, parsed with and executed through
//! an [`ExtensionToolchain`]; generated base-language sources are compiled by
//! a [`BaseCompiler`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use weft_cache::ExtensionKind;
use weft_common::Term;

use crate::error::ToolchainError;
use crate::unit::{AnalysisMessage, ParseError};

/// Rule that desugars one declaration.
pub const DESUGAR_RULE: &str = "internal-main";

/// Rule that applies a renaming table to a term.
pub const APPLY_RENAMINGS_RULE: &str = "apply-renamings";

/// Source text of a synthesized grammar or transformation module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleSource {
    /// Module name.
    pub name: String,
    /// Imported modules, in order.
    pub imports: Vec<String>,
    /// Module body.
    pub body: String,
}

impl ModuleSource {
    /// A module with only imports.
    pub fn compound(name: impl Into<String>, imports: Vec<String>) -> Self {
        Self {
            name: name.into(),
            imports,
            body: String::new(),
        }
    }

    /// The module's text: a `module` header, an optional `imports` line, then the body.
    pub fn render(&self) -> String {
        let mut text = format!("module {}\n", self.name);
        if !self.imports.is_empty() {
            text.push_str("imports ");
            text.push_str(&self.imports.join(" "));
            text.push('\n');
        }
        text.push('\n');
        text.push_str(&self.body);
        if !self.body.is_empty() && !self.body.ends_with('\n') {
            text.push('\n');
        }
        text
    }
}

/// One declaration parsed off the front of the remaining input.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedDeclaration {
    /// The declaration term.
    pub term: Term,
    /// Bytes of input consumed.
    pub consumed: usize,
    /// Errors recovered from while parsing.
    pub errors: Vec<ParseError>,
}

/// Grammar and transformation tooling.
pub trait ExtensionToolchain: Send + Sync {
    /// Compiles the module at `source` into `artifact`. Imported modules are
    /// looked up as `<root>/<name>.<ext>` in `search_path`.
    fn compile_module(
        &self,
        kind: ExtensionKind,
        source: &Path,
        artifact: &Path,
        search_path: &[PathBuf],
    ) -> Result<(), ToolchainError>;

    /// Parses the next declaration from `input` with a compiled grammar.
    ///
    /// With `recovery`, syntax errors are reported in the result instead of
    /// failing the call.
    fn parse(&self, grammar: &Path, input: &str, recovery: bool) -> Result<ParsedDeclaration, ToolchainError>;

    /// Runs `rule` of a compiled transformation on `term`.
    fn execute(&self, program: &Path, rule: &str, term: &Term, args: &[Term]) -> Result<Term, ToolchainError>;

    /// Runs the analysis of a compiled transformation on `term`.
    fn analyze(&self, program: &Path, term: &Term) -> Result<Vec<AnalysisMessage>, ToolchainError>;
}

/// Files handed to the base-language compiler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileJob {
    /// Generated base-language sources, compiled together.
    pub sources: Vec<PathBuf>,
    /// Where compiled output goes.
    pub out_dir: PathBuf,
    /// Where previously compiled modules are found.
    pub include_path: Vec<PathBuf>,
}

/// The base-language compiler.
pub trait BaseCompiler: Send + Sync {
    /// Compiles the job's sources and returns the files it produced.
    fn compile(&self, job: &CompileJob) -> Result<BTreeSet<PathBuf>, ToolchainError>;
}
