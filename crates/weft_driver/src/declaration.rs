//! Classified top-level declarations.

use std::fmt;

use weft_common::Term;

/// What an import refers to: a module, or the result of applying a
/// transformation to a model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportTarget {
    /// A module path such as `app/Lib`.
    Module(String),
    /// `transformation(model)`.
    Apply {
        /// The transformation to apply.
        transformation: Box<ImportTarget>,
        /// The model it is applied to.
        model: Box<ImportTarget>,
    },
}

impl ImportTarget {
    /// The rightmost model module of a chain of applications.
    pub fn innermost_model(&self) -> &str {
        match self {
            ImportTarget::Module(path) => path,
            ImportTarget::Apply { model, .. } => model.innermost_model(),
        }
    }
}

impl fmt::Display for ImportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportTarget::Module(path) => f.write_str(path),
            ImportTarget::Apply {
                transformation,
                model,
            } => write!(f, "{transformation}({model})"),
        }
    }
}

/// `import target [as alias]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportDecl {
    /// What is imported.
    pub target: ImportTarget,
    /// Local name of the import.
    pub alias: Option<String>,
    /// The declaration term.
    pub term: Term,
}

/// A language extension: grammar and transformation fragments plus editor services.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtensionDecl {
    /// Extension name.
    pub name: String,
    /// Grammar fragment.
    pub grammar: Option<String>,
    /// Transformation fragment.
    pub transformation: Option<String>,
    /// Editor-service descriptors.
    pub editor_services: Vec<Term>,
    /// The declaration term.
    pub term: Term,
}

/// A base-language declaration, or a namespace declaration when `namespace` is set.
#[derive(Clone, Debug, PartialEq)]
pub struct BaseDecl {
    /// Declared name, if any.
    pub name: Option<String>,
    /// Namespace set by this declaration.
    pub namespace: Option<String>,
    /// Base-language code contributed to the generated source.
    pub code: String,
    /// Modules the code needs at compile time.
    pub requires: Vec<String>,
    /// The declaration term.
    pub term: Term,
}

/// A file emitted verbatim.
#[derive(Clone, Debug, PartialEq)]
pub struct PlainDecl {
    /// File name without extension.
    pub name: String,
    /// File extension.
    pub extension: Option<String>,
    /// File content.
    pub body: String,
    /// The declaration term.
    pub term: Term,
}

/// A named transformation whose entry rule is `main`.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformationDecl {
    /// Transformation name.
    pub name: String,
    /// Transformation module body.
    pub body: String,
    /// The declaration term.
    pub term: Term,
}

/// Declares the unit to be a model.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelDecl {
    /// Model name.
    pub name: String,
    /// The declaration term.
    pub term: Term,
}

/// Re-exports another module's model under this unit's name.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportDecl {
    /// Exported name.
    pub name: String,
    /// The exported module.
    pub target: ImportTarget,
    /// The declaration term.
    pub term: Term,
}

/// A top-level declaration, classified by the base language.
#[derive(Clone, Debug, PartialEq)]
pub enum Declaration {
    /// An import.
    Import(ImportDecl),
    /// A language extension.
    Extension(ExtensionDecl),
    /// Base-language code or a namespace.
    Base(BaseDecl),
    /// A verbatim file.
    Plain(PlainDecl),
    /// A transformation.
    Transformation(TransformationDecl),
    /// A model marker.
    Model(ModelDecl),
    /// A model export.
    Export(ExportDecl),
    /// Several declarations produced by one source declaration.
    List(Vec<Declaration>),
    /// A term no kind claims.
    Opaque(Term),
}

impl Declaration {
    /// Short kind name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Declaration::Import(_) => "import",
            Declaration::Extension(_) => "extension",
            Declaration::Base(_) => "base",
            Declaration::Plain(_) => "plain",
            Declaration::Transformation(_) => "transformation",
            Declaration::Model(_) => "model",
            Declaration::Export(_) => "export",
            Declaration::List(_) => "list",
            Declaration::Opaque(_) => "opaque",
        }
    }

    /// Returns `true` for imports.
    pub fn is_import(&self) -> bool {
        matches!(self, Declaration::Import(_))
    }
}
