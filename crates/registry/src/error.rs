//! Registry Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use crate::FileId;
use derive_more::{Display, Error};

/// A registry error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No record with this identity was ever registered.
    #[display("unknown archival file: {_0}")]
    UnknownFile(#[error(not(source))] FileId),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
