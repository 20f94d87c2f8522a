//! Diagnostic creation, severity management, and terminal rendering.
//!
//! Compilation units carry their problems as plain messages. The CLI lifts
//! them into structured [`Diagnostic`]s with a severity and a code, collects
//! them from parallel builds in a thread-safe [`DiagnosticSink`], and prints
//! them with a [`DiagnosticRenderer`].

#![warn(missing_docs)]

pub mod code;
pub mod diagnostic;
pub mod renderer;
pub mod severity;
pub mod sink;

pub use code::{Category, DiagnosticCode};
pub use diagnostic::Diagnostic;
pub use renderer::{DiagnosticRenderer, TerminalRenderer};
pub use severity::Severity;
pub use sink::DiagnosticSink;
