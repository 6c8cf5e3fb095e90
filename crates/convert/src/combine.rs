use crate::error::Result;
use async_trait::async_trait;
use conveyor_format::FormatCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An engine that concatenates several files into one document.
///
/// Used for merge groups: a folder of scans becomes a single document
/// instead of one document per page.
// TODO: When `dyn async trait` stabilizes, migrate to native 2024 Edition async traits.
#[async_trait]
pub trait Combiner: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a file in `from` can be part of a combined `to` document.
    fn can_combine(&self, from: &FormatCode, to: &FormatCode) -> bool;

    /// Writes `inputs`, in order, into a single `to` document at `output`.
    async fn combine(&self, inputs: &[PathBuf], output: &Path, to: &FormatCode) -> Result<()>;
}

pub type CombinerHandle = Arc<dyn Combiner>;
