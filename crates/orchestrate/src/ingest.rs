use crate::error::{ErrorKind, Result};
use conveyor_format::Identifier;
use conveyor_registry::{ArchivalFile, FileRegistry, FormatState};
use exn::{OptionExt, ResultExt};
use futures::{StreamExt, TryStreamExt, stream};
use std::path::{Path, PathBuf};
use tracing::instrument;
use walkdir::WalkDir;

/// Mirrors `input` into `output` and registers every file found there.
///
/// Conversion happens in place when both are the same directory. Each file
/// is identified (with a content hash) before registration; files the service
/// cannot classify are registered under the unknown format.
///
/// Returns the number of files registered.
///
/// # Errors
/// Fails if `output` lies inside `input`, if a file cannot be copied, or if
/// the identification service is unusable.
#[instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
pub async fn ingest(
    input: &Path,
    output: &Path,
    identifier: &dyn Identifier,
    registry: &FileRegistry,
    concurrency: usize,
) -> Result<usize> {
    let in_place = same_directory(input, output);
    if !in_place && output.starts_with(input) {
        exn::bail!(ErrorKind::NestedOutput(output.to_path_buf()));
    }

    let mut sources = Vec::new();
    for entry in WalkDir::new(input).follow_links(false).sort_by_file_name() {
        let entry = entry.or_raise(|| ErrorKind::Ingest(input.to_path_buf()))?;
        if entry.file_type().is_file() {
            sources.push(entry.into_path());
        }
    }
    tracing::info!(files = sources.len(), in_place, "Ingesting files");

    let registered: Vec<()> = stream::iter(sources)
        .map(|source| async move {
            let path = match in_place {
                true => Ok(source),
                false => mirror(input, output, &source).await,
            };
            register(identifier, registry, path).await
        })
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await?;
    Ok(registered.len())
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

async fn mirror(input: &Path, output: &Path, source: &Path) -> Result<PathBuf> {
    let relative = source
        .strip_prefix(input)
        .ok()
        .ok_or_raise(|| ErrorKind::Ingest(source.to_path_buf()))?;
    let destination = output.join(relative);
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .or_raise(|| ErrorKind::Ingest(parent.to_path_buf()))?;
    }
    tokio::fs::copy(source, &destination)
        .await
        .or_raise(|| ErrorKind::Ingest(source.to_path_buf()))?;
    Ok(destination)
}

async fn register(identifier: &dyn Identifier, registry: &FileRegistry, path: Result<PathBuf>) -> Result<()> {
    let path = path?;
    let found = identifier
        .identify(&path, true)
        .await
        .or_raise(|| ErrorKind::IdentificationUnavailable)?;
    let file = match &found {
        Some(identification) => ArchivalFile::identified(&path, identification),
        None => {
            let size = tokio::fs::metadata(&path).await.map_or(0, |m| m.len());
            tracing::debug!(path = %path.display(), "File could not be identified");
            ArchivalFile::new(&path, FormatState::unidentified(size))
        },
    };
    registry.register(file);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_format::MockIdentifier;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        std::fs::create_dir_all(input.join("letters/old")).unwrap();
        std::fs::write(input.join("a.doc"), "docA\n").unwrap();
        std::fs::write(input.join("letters/b.doc"), "docA\n").unwrap();
        std::fs::write(input.join("letters/old/c.bin"), "").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_mirror_and_register() {
        let dir = tree();
        let (input, output) = (dir.path().join("in"), dir.path().join("out"));
        let registry = FileRegistry::default();
        let count = ingest(&input, &output, &MockIdentifier::default(), &registry, 2).await.unwrap();
        assert_eq!(count, 3);
        assert_eq!(registry.len(), 3);

        let b = registry.find_by_path(&output.join("letters/b.doc")).unwrap();
        assert_eq!(b.original.format.as_str(), "docA");
        assert!(b.original.checksum.is_some());
        let c = registry.find_by_path(&output.join("letters/old/c.bin")).unwrap();
        assert!(c.format().is_unknown());
        // The input tree is left alone.
        assert!(input.join("a.doc").exists());
    }

    #[tokio::test]
    async fn test_in_place() {
        let dir = tree();
        let input = dir.path().join("in");
        let registry = FileRegistry::default();
        ingest(&input, &input, &MockIdentifier::default(), &registry, 1).await.unwrap();
        assert!(registry.find_by_path(&input.join("a.doc")).is_some());
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_nested_output_is_rejected() {
        let dir = tree();
        let input = dir.path().join("in");
        let registry = FileRegistry::default();
        let err = ingest(&input, &input.join("converted"), &MockIdentifier::default(), &registry, 1)
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::NestedOutput(_)));
        assert!(registry.is_empty());
    }
}
