//! Errors raised while reading `weft.toml`.

use std::path::PathBuf;

/// Why a project configuration could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// The configuration file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The TOML is malformed or has the wrong shape.
    #[error("malformed configuration: {0}")]
    Parse(String),

    /// A required value is absent or empty.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
