//! Common result and error types for the weft driver.

/// The standard result type for fallible internal operations.
///
/// `Err` indicates a broken driver invariant, not a user-facing problem.
/// Problems in the compiled sources are collected as messages on the
/// compilation unit and the build still returns `Ok`.
pub type WeftResult<T> = Result<T, InternalError>;

/// An internal error indicating a bug in the driver, not a user input problem.
#[derive(Debug, thiserror::Error)]
#[error("internal driver error: {message}")]
pub struct InternalError {
    /// Description of the internal error.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let err = InternalError::new("delegate vanished");
        assert_eq!(format!("{err}"), "internal driver error: delegate vanished");
    }

    #[test]
    fn err_path() {
        let r: WeftResult<i32> = Err(InternalError::new("test error"));
        let err = r.err().unwrap();
        assert_eq!(err.message, "test error");
    }

    #[test]
    fn from_string() {
        let err: InternalError = "from string".to_string().into();
        assert_eq!(err.message, "from string");
    }
}
