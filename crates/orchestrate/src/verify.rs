use crate::error::{ErrorKind, Result};
use conveyor_format::Identifier;
use conveyor_registry::{ArchivalFile, Bucket, FileRegistry, Outcome};
use exn::ResultExt;
use futures::{StreamExt, TryStreamExt, stream};
use tracing::instrument;

/// What the verification pass found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verification {
    pub checked: usize,
    /// Files whose recorded outcome had to be downgraded.
    pub reclassified: usize,
}

/// Re-identifies every file once the rounds are over.
///
/// The registry is brought up to date with what is actually on disk. A file
/// claimed as converted or merged that is missing, or not in its target
/// format, is downgraded to failed, as is anything still without an outcome.
///
/// # Errors
/// Fails if the identification service itself is unusable.
#[instrument(skip_all, fields(files = registry.len()))]
pub async fn verify(registry: &FileRegistry, identifier: &dyn Identifier, concurrency: usize) -> Result<Verification> {
    let files = registry.snapshot();
    let checked = files.len();
    let results: Vec<usize> = stream::iter(files)
        .map(|file| verify_one(registry, identifier, file))
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await?;
    let verification = Verification { checked, reclassified: results.into_iter().sum() };
    tracing::info!(checked, reclassified = verification.reclassified, "Verification finished");
    Ok(verification)
}

async fn verify_one(registry: &FileRegistry, identifier: &dyn Identifier, file: ArchivalFile) -> Result<usize> {
    let found = identifier
        .identify(&file.path, true)
        .await
        .or_raise(|| ErrorKind::IdentificationUnavailable)?;
    let recorded = match &found {
        Some(identification) => registry.record_identification(file.id, identification),
        None => registry.record_unidentified(file.id),
    };
    recorded.or_raise(|| ErrorKind::Registry)?;

    let bucket = file.outcome.as_ref().map_or(Bucket::Unsettled, Outcome::bucket);
    let reason = match (bucket, &found) {
        (Bucket::Unsettled, _) => "no outcome recorded",
        (Bucket::Converted | Bucket::Merged, None) => "output missing or unidentifiable",
        (Bucket::Converted | Bucket::Merged, Some(identification))
            if file.target.as_ref().is_some_and(|target| *target != identification.format) =>
        {
            "output not in target format"
        },
        _ => return Ok(0),
    };
    tracing::warn!(path = %file.path.display(), %bucket, reason, "Outcome reclassified");
    registry.settle(file.id, Outcome::failed(reason)).or_raise(|| ErrorKind::Registry)?;
    Ok(1)
}
