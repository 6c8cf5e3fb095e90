use crate::error::{ErrorKind, Result};
use crate::plan::MergeGroup;
use conveyor_convert::{ConverterSet, HopContext, Status, check_status, output};
use conveyor_registry::{FileId, Outcome};
use std::path::{Path, PathBuf};
use tracing::instrument;

/// How a merge group ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub directory: PathBuf,
    /// The combined document, when there is one.
    pub merged: Option<PathBuf>,
    pub outcome: Outcome,
    pub members: Vec<FileId>,
}

/// Combines a group into a single document named after its directory.
///
/// The inputs are only removed once the combined document is verified. Any
/// failure leaves them in place and classifies the whole group; combining is
/// never retried.
///
/// # Errors
/// Fails only if the identification service is unavailable.
#[instrument(skip_all, fields(directory = %group.directory.display(), files = group.members.len(), target = %group.target))]
pub async fn flush(group: MergeGroup, converters: &ConverterSet, ctx: &HopContext) -> Result<MergeResult> {
    let members: Vec<FileId> = group.members.iter().map(|m| m.file).collect();
    let result = |merged: Option<PathBuf>, outcome: Outcome| MergeResult {
        directory: group.directory.clone(),
        merged,
        outcome,
        members: members.clone(),
    };
    let Some(first) = group.members.first() else {
        return Ok(result(None, Outcome::failed("empty merge group")));
    };
    let Some(combiner) = converters.combiner_for(group.members.iter().map(|m| &m.format), &group.target) else {
        tracing::warn!("No combiner accepts every file of the group");
        return Ok(result(None, Outcome::NotSupported));
    };

    let stem = group
        .directory
        .file_name()
        .map_or_else(|| "merged".to_string(), |name| name.to_string_lossy().into_owned());
    let staging = output::staging_path(&group.directory.join(&stem), first.file, &group.target);
    let inputs: Vec<PathBuf> = group.members.iter().map(|m| m.path.clone()).collect();
    if let Err(e) = combiner.combine(&inputs, &staging, &group.target).await {
        tracing::warn!(combiner = combiner.name(), error = ?e, "Combining failed");
        output::discard(&staging).await;
        return Ok(result(None, Outcome::failed(format!("combining failed: {}", *e))));
    }
    let identification = match check_status(ctx.identifier.as_ref(), &staging, &group.target).await {
        Status::Verified(identification) => identification,
        Status::Unavailable(error) => {
            output::discard(&staging).await;
            tracing::error!(%error, "Identification service failed");
            exn::bail!(ErrorKind::IdentificationUnavailable);
        },
        status => {
            output::discard(&staging).await;
            return Ok(result(None, Outcome::failed(format!("combined document not verified: {status:?}"))));
        },
    };
    let merged = match output::publish(&staging, &group.directory, &stem, &group.target).await {
        Ok(merged) => merged,
        Err(e) => {
            output::discard(&staging).await;
            return Ok(result(None, Outcome::failed(format!("could not place combined document: {}", *e))));
        },
    };

    for member in &group.members {
        remove_input(&member.path, &merged).await;
        let recorded = ctx
            .registry
            .replace_path(member.file, &merged)
            .and_then(|()| ctx.registry.append_tool(member.file, combiner.name()))
            .and_then(|()| ctx.registry.record_identification(member.file, &identification));
        if let Err(e) = recorded {
            tracing::error!(path = %member.path.display(), error = ?e, "Could not record merge in registry");
        }
    }
    tracing::info!(merged = %merged.display(), combiner = combiner.name(), "Merge group combined");
    Ok(result(Some(merged.clone()), Outcome::Merged { into: merged }))
}

async fn remove_input(path: &Path, merged: &Path) {
    if path == merged {
        return;
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => {},
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not remove merged input"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Member;
    use conveyor_convert::MockCombiner;
    use conveyor_format::{FormatCode, MockIdentifier};
    use conveyor_registry::{ArchivalFile, FileRegistry, FormatState};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        dir: tempfile::TempDir,
        ctx: HopContext,
        group: MergeGroup,
    }

    fn fixture(formats: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let scans = dir.path().join("scans");
        std::fs::create_dir_all(&scans).unwrap();
        let registry = Arc::new(FileRegistry::default());
        let mut members = Vec::new();
        for (i, format) in formats.iter().enumerate() {
            let path = scans.join(format!("{i}.img"));
            std::fs::write(&path, format!("{format}\n")).unwrap();
            let state = FormatState { format: (*format).into(), name: String::new(), size: 1, checksum: None };
            let file = registry.register(ArchivalFile::new(&path, state));
            members.push(Member { file, path, format: (*format).into() });
        }
        let ctx = HopContext::new(Arc::new(MockIdentifier::default()), registry, 1, Duration::from_secs(10));
        let group = MergeGroup { directory: scans, target: FormatCode::from("pdfa"), members };
        Fixture { dir, ctx, group }
    }

    #[tokio::test]
    async fn test_group_is_combined() {
        let f = fixture(&["IMG", "IMG", "IMG"]);
        let combiner = Arc::new(MockCombiner::new("stacker"));
        let converters = ConverterSet::new().with_combiner(combiner.clone());
        let result = flush(f.group.clone(), &converters, &f.ctx).await.unwrap();

        let merged = f.dir.path().join("scans/scans.pdfa");
        assert_eq!(result.merged.as_deref(), Some(merged.as_path()));
        assert_eq!(result.outcome, Outcome::Merged { into: merged.clone() });
        assert_eq!(result.members.len(), 3);
        assert_eq!(combiner.calls(), 1);
        let remaining: Vec<_> = std::fs::read_dir(f.dir.path().join("scans")).unwrap().collect();
        assert_eq!(remaining.len(), 1);
        for member in &f.group.members {
            let record = f.ctx.registry.get(member.file).unwrap();
            assert_eq!(record.path, merged);
            assert_eq!(record.tools, vec!["stacker"]);
        }
    }

    #[tokio::test]
    async fn test_failed_combine_keeps_inputs() {
        let f = fixture(&["IMG", "IMG"]);
        let converters = ConverterSet::new().with_combiner(Arc::new(MockCombiner::new("stacker").failing()));
        let result = flush(f.group.clone(), &converters, &f.ctx).await.unwrap();
        assert!(matches!(result.outcome, Outcome::Failed { .. }));
        assert!(result.merged.is_none());
        assert!(f.group.members.iter().all(|m| m.path.exists()));
        assert_eq!(std::fs::read_dir(f.dir.path().join("scans")).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_no_combiner_is_not_supported() {
        let f = fixture(&["IMG", "DOC"]);
        let converters = ConverterSet::new().with_combiner(Arc::new(MockCombiner::new("stacker").accepting(["IMG"])));
        let result = flush(f.group.clone(), &converters, &f.ctx).await.unwrap();
        assert_eq!(result.outcome, Outcome::NotSupported);
    }

    #[tokio::test]
    async fn test_identification_outage_is_fatal() {
        let mut f = fixture(&["IMG", "IMG"]);
        f.ctx.identifier = Arc::new(MockIdentifier::unavailable());
        let combiner = Arc::new(MockCombiner::new("stacker"));
        let converters = ConverterSet::new().with_combiner(combiner.clone());
        let err = flush(f.group.clone(), &converters, &f.ctx).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::IdentificationUnavailable));
        assert_eq!(combiner.calls(), 1);
        // Inputs stay, nothing else is left behind.
        assert!(f.group.members.iter().all(|m| m.path.exists()));
        assert_eq!(std::fs::read_dir(f.dir.path().join("scans")).unwrap().count(), 2);
    }
}
