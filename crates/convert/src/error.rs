//! Converter Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.
//!
//! These errors describe faults of an engine invocation: the process could
//! not be launched, timed out, crashed, or produced nothing. Whether a file
//! made it to its next format is *not* an error; that is reported through
//! [`HopOutcome`](crate::HopOutcome).

use conveyor_format::FormatCode;
use derive_more::{Display, Error};
use std::path::PathBuf;

/// A converter error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for converter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("{_0} not detected on your system")]
    ToolNotFound(#[error(not(source))] String),
    /// The engine ran past its time budget and was killed.
    ToolTimeout,
    /// The engine exited with a non-zero exit code. Processes killed by a
    /// signal report `-1`.
    #[display("engine exited with code: {_0}")]
    ToolFailed(#[error(not(source))] i32),
    /// The engine claimed success but the expected file is not there.
    #[display("engine did not produce {}", _0.display())]
    MissingOutput(#[error(not(source))] PathBuf),
    #[display("cannot convert {from} to {to}")]
    Unsupported { from: FormatCode, to: FormatCode },
    /// No two paths are left to reserve for an output name.
    #[display("no free output name next to {}", _0.display())]
    NameExhausted(#[error(not(source))] PathBuf),
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ToolTimeout | Self::ToolFailed(_) | Self::MissingOutput(_) | Self::Io)
    }
}
