//! Diagnostic severity levels ordered from least to most severe.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The severity level of a diagnostic message.
///
/// Ordered from least severe (`Help`) to most severe (`Error`). Analysis
/// messages reported by an extension's analysis step use the same scale, and
/// the most severe one decides the CLI exit code.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A helpful suggestion that doesn't indicate a problem.
    Help,
    /// An informational note.
    Note,
    /// A potential issue that doesn't fail the build.
    Warning,
    /// A definite problem.
    Error,
}

impl Severity {
    /// Returns `true` if this severity is [`Error`](Severity::Error).
    pub fn is_error(self) -> bool {
        self == Severity::Error
    }

    /// Parses the lowercase name used by toolchains (`"error"`, `"warning"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "help" => Some(Severity::Help),
            "note" | "info" => Some(Severity::Note),
            "warning" | "warn" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Help => write!(f, "help"),
            Severity::Note => write!(f, "note"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering() {
        assert!(Severity::Help < Severity::Note);
        assert!(Severity::Note < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }

    #[test]
    fn from_name_accepts_aliases() {
        assert_eq!(Severity::from_name("error"), Some(Severity::Error));
        assert_eq!(Severity::from_name("warn"), Some(Severity::Warning));
        assert_eq!(Severity::from_name("info"), Some(Severity::Note));
        assert_eq!(Severity::from_name("fatal"), None);
    }

    #[test]
    fn display_matches_from_name() {
        for sev in [Severity::Help, Severity::Note, Severity::Warning, Severity::Error] {
            assert_eq!(Severity::from_name(&sev.to_string()), Some(sev));
        }
    }

    #[test]
    fn serde_lowercase() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }
}
