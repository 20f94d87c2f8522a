//! Turning build results into diagnostics and a process exit code.

use weft_diagnostics::{Category, Diagnostic, DiagnosticCode, DiagnosticSink, Severity};
use weft_driver::{CompilationUnit, DriverError};

const UNIT_ERROR: DiagnosticCode = DiagnosticCode {
    category: Category::Error,
    number: 1,
};
const SYNTAX_ERROR: DiagnosticCode = DiagnosticCode {
    category: Category::Parse,
    number: 1,
};
const ANALYSIS: DiagnosticCode = DiagnosticCode {
    category: Category::Analysis,
    number: 1,
};
const DRIVER_FAILURE: DiagnosticCode = DiagnosticCode {
    category: Category::Failure,
    number: 1,
};

/// Outcome of a command, ordered from best to worst.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExitStatus {
    /// Everything built.
    Success,
    /// Analysis left notes.
    AnalysisNote,
    /// Analysis left warnings.
    AnalysisWarning,
    /// Analysis found errors.
    AnalysisError,
    /// A unit has errors or syntax errors.
    CompilationError,
    /// The driver itself failed.
    Failure,
}

impl ExitStatus {
    /// The process exit code.
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::CompilationError => 1,
            ExitStatus::AnalysisError => 2,
            ExitStatus::AnalysisWarning => 3,
            ExitStatus::AnalysisNote => 4,
            ExitStatus::Failure => 100,
        }
    }

    /// The status a single unit contributes.
    pub fn of_unit(unit: &CompilationUnit) -> Self {
        if !unit.errors.is_empty() || !unit.parse_errors.is_empty() {
            return ExitStatus::CompilationError;
        }
        match unit.max_analysis_severity() {
            Some(Severity::Error) => ExitStatus::AnalysisError,
            Some(Severity::Warning) => ExitStatus::AnalysisWarning,
            Some(Severity::Note) => ExitStatus::AnalysisNote,
            Some(Severity::Help) | None => ExitStatus::Success,
        }
    }
}

/// Emits a unit's problems to `sink`.
pub fn emit_unit(unit: &CompilationUnit, sink: &DiagnosticSink) {
    let file = unit.sources.primary().map(|p| p.to_path_buf());
    let locate = |diag: Diagnostic| match &file {
        Some(file) => diag.in_file(file.clone()),
        None => diag,
    };

    for error in &unit.parse_errors {
        sink.emit(locate(Diagnostic::error(SYNTAX_ERROR, error.message.clone())).at(error.line, error.column));
    }
    for error in &unit.errors {
        sink.emit(locate(Diagnostic::error(UNIT_ERROR, error.clone())));
    }
    for message in &unit.analysis {
        sink.emit(locate(Diagnostic::new(message.severity, ANALYSIS, message.message.clone())));
    }
}

/// Emits a build that ended without a unit.
pub fn emit_failure(error: &DriverError, sink: &DiagnosticSink) {
    let diag = Diagnostic::error(DRIVER_FAILURE, error.to_string());
    let diag = match error {
        DriverError::PendingTimeout { .. } => {
            diag.with_help("another build of the same sources did not finish; retry or raise `build.pending_timeout_ms`")
        }
        DriverError::CannotBreakCycle { .. } => {
            diag.with_note("every unit of an import cycle must be buildable from the same request")
        }
        _ => diag,
    };
    sink.emit(diag);
}
