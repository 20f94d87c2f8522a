//! Observers notified as units start and finish processing.

use crate::request::SourceSet;
use crate::unit::CompilationUnit;

/// Receives build lifecycle events.
///
/// Events fire for every build that runs its pipeline, nested ones included.
/// Requests answered from an up-to-date record fire nothing.
pub trait ProcessingListener: Send + Sync {
    /// A build of `sources` is about to run its pipeline.
    fn processing_starts(&self, _sources: &SourceSet) {}

    /// A build finished and its unit was persisted.
    fn processing_done(&self, _unit: &CompilationUnit) {}
}
