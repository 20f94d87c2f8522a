//! Error types of the build driver and its toolchain seams.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use weft_cache::CacheError;
use weft_common::InternalError;

use crate::request::{ActiveBuild, SourceSet};

/// Errors raised by an external toolchain (parser, grammar or transformation
/// compiler, rule execution, base-language compiler).
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    /// The tool ran and reported a failure.
    #[error("{step} failed: {message}")]
    Failed {
        /// The toolchain step, e.g. `compile grammar`.
        step: String,
        /// The tool's message.
        message: String,
    },

    /// No tool is configured for the step.
    #[error("{step} is not configured")]
    Unavailable {
        /// The toolchain step.
        step: String,
    },

    /// The tool could not be started.
    #[error("could not run {program}: {source}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The tool's output could not be understood.
    #[error("{step} produced malformed output: {message}")]
    Protocol {
        /// The toolchain step.
        step: String,
        /// What was wrong with the output.
        message: String,
    },
}

impl ToolchainError {
    /// Shorthand for [`ToolchainError::Failed`].
    pub fn failed(step: impl Into<String>, message: impl Into<String>) -> Self {
        ToolchainError::Failed {
            step: step.into(),
            message: message.into(),
        }
    }
}

/// Errors that end or escape a build.
///
/// Only [`is_fatal`](DriverError::is_fatal) errors unwind a build's pipeline.
/// The others are recorded on the compilation unit against the declaration
/// being processed, and the build carries on.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The build observed its cancellation signal.
    #[error("build was interrupted")]
    Interrupted,

    /// A duplicate request waited too long for an in-flight build.
    #[error("timed out after {waited:?} waiting for the in-flight build of {sources}")]
    PendingTimeout {
        /// The sources of the in-flight build.
        sources: SourceSet,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The requested unit is held by a concurrent build that is itself
    /// waiting on the requesting chain. The import is circular.
    #[error("{} is being built by a concurrent build that imports it back", partner.sources)]
    ConcurrentCycle {
        /// The concurrent build holding the requested unit.
        partner: Arc<ActiveBuild>,
    },

    /// A unit with circular imports found no partner to take over its compilation.
    #[error("cannot break the import cycle of {sources}: no active partner takes over its compilation")]
    CannotBreakCycle {
        /// The sources of the unit that could not delegate.
        sources: SourceSet,
    },

    /// Reading or writing a file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A model file could not be decoded.
    #[error("invalid model file {path}: {reason}")]
    InvalidModel {
        /// The model file.
        path: PathBuf,
        /// Why decoding failed.
        reason: String,
    },

    /// The cache or unit store failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// An external tool failed.
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    /// A driver invariant was broken.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl DriverError {
    /// Wraps an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DriverError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for errors that abort the current build instead of
    /// being recorded against a declaration.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::Interrupted
                | DriverError::PendingTimeout { .. }
                | DriverError::CannotBreakCycle { .. }
                | DriverError::Internal(_)
        )
    }
}
