//! Orchestration Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.
//!
//! Only failures of shared infrastructure end up here. Anything that goes
//! wrong with a single file is recorded as that file's outcome and the batch
//! carries on.

use conveyor_format::FormatCode;
use derive_more::{Display, Error};
use std::path::PathBuf;

/// An orchestration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Install or enable at least one engine.
    #[display("no converters registered")]
    NoConverters,
    /// The identification service failed; nothing can be verified.
    #[display("identification service unavailable")]
    IdentificationUnavailable,
    /// A route survived filtering although one of its hops is unsupported.
    /// This is a bug, not a configuration problem.
    #[display("route table inconsistent at {from} -> {to}")]
    InconsistentRoute { from: FormatCode, to: FormatCode },
    #[display("archival file registry out of sync")]
    Registry,
    #[display("could not ingest {}", _0.display())]
    Ingest(#[error(not(source))] PathBuf),
    #[display("output directory {} lies inside the input directory", _0.display())]
    NestedOutput(#[error(not(source))] PathBuf),
    #[display("run ended without a summary")]
    Incomplete,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::IdentificationUnavailable | Self::Ingest(_))
    }
}
