//! Identification Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.
//!
//! An error from this crate means the identification *service* failed. A
//! file that simply could not be classified is not an error; identifiers
//! return `Ok(None)` for that.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An identification error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for identification operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("identification tool `{_0}` not detected on your system")]
    ToolNotFound(#[error(not(source))] String),
    /// The identification tool exited with a non-zero exit code.
    #[display("identification tool exited with code: {_0}")]
    ToolFailed(#[error(not(source))] i32),
    /// The identification tool did not answer in time and was killed.
    ToolTimeout,
    /// The identification tool produced output we could not understand.
    #[display("unreadable identification report")]
    InvalidReport,
    #[display("I/O error: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ToolTimeout | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::ToolFailed(2).to_string(), "identification tool exited with code: 2");
        assert_eq!(ErrorKind::ToolNotFound("sf".to_string()).to_string(), "identification tool `sf` not detected on your system");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::ToolTimeout.is_retryable());
        assert!(!ErrorKind::InvalidReport.is_retryable());
    }
}
