//! Collecting diagnostics from builds running on several threads.

use std::cmp::Ordering;
use std::sync::atomic::{self, AtomicUsize};

use parking_lot::Mutex;

use crate::diagnostic::Diagnostic;

/// Diagnostics gathered from every unit of a build.
///
/// Units finish in whatever order the thread pool schedules them, so
/// [`take_all`](Self::take_all) hands diagnostics back ordered by file and
/// position instead of arrival.
#[derive(Default)]
pub struct DiagnosticSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
    errors: AtomicUsize,
}

impl DiagnosticSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a diagnostic.
    pub fn emit(&self, diag: Diagnostic) {
        if diag.severity.is_error() {
            self.errors.fetch_add(1, atomic::Ordering::Relaxed);
        }
        self.diagnostics.lock().push(diag);
    }

    /// Number of error diagnostics recorded so far.
    pub fn error_count(&self) -> usize {
        self.errors.load(atomic::Ordering::Relaxed)
    }

    /// Diagnostics in arrival order, leaving the sink untouched.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }

    /// Drains the sink, ordered by file then position.
    ///
    /// Diagnostics without a file come last. Ties keep arrival order.
    pub fn take_all(&self) -> Vec<Diagnostic> {
        let mut diagnostics = std::mem::take(&mut *self.diagnostics.lock());
        diagnostics.sort_by(by_location);
        diagnostics
    }
}

fn by_location(a: &Diagnostic, b: &Diagnostic) -> Ordering {
    match (&a.file, &b.file) {
        (Some(fa), Some(fb)) => fa.cmp(fb).then_with(|| a.position.cmp(&b.position)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
