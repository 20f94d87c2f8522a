//! Incremental compilation driver for self-extensible languages.
//!
//! A source file may declare grammar and transformation extensions that take
//! effect for the rest of the file and for every unit that imports it. The
//! driver parses such files one declaration at a time, rebuilding the
//! unit's grammar and transformation as extensions arrive, resolves imports
//! by building the imported units on demand, and compiles the generated
//! base-language code. Every build is persisted as a [`CompilationUnit`]
//! record holding stamps of everything it touched, so that unchanged units
//! are reused and compiled extension modules come from a persistent
//! [`weft_cache::Cache`].
//!
//! Units that import each other in a cycle hand their base-language output to
//! a partner further up the processing stack, which compiles the whole cycle
//! in one invocation of the base compiler.

#![warn(missing_docs)]

pub mod context;
pub mod declaration;
pub mod env;
pub mod error;
pub mod extension;
pub mod integrity;
pub mod language;
pub mod listener;
pub mod orchestrator;
pub mod pipeline;
pub mod provider;
pub mod renaming;
pub mod request;
pub mod resolver;
pub mod store;
pub mod toolchain;
pub mod unit;

pub use context::BuildContext;
pub use declaration::{Declaration, ImportTarget};
pub use env::Environment;
pub use error::{DriverError, ToolchainError};
pub use extension::{ExtensionCompiler, ExtensionState};
pub use integrity::IntegrityChecker;
pub use language::{BaseLanguage, BaseSession, ShapeLanguage};
pub use listener::ProcessingListener;
pub use pipeline::Phase;
pub use renaming::Renaming;
pub use request::{ActiveBuild, BuildRequest, CancelToken, ProgressMonitor, SourceSet};
pub use store::UnitStore;
pub use toolchain::{BaseCompiler, CompileJob, ExtensionToolchain, ModuleSource, ParsedDeclaration};
pub use unit::{AnalysisMessage, CompilationUnit, Generation, ModuleDependency, ParseError, UnitState};
