use crate::FormatCode;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// What the identification service knows about a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    pub format: FormatCode,
    /// Human readable format name as reported by the service.
    pub name: String,
    pub mime: Option<String>,
    pub size: u64,
    /// BLAKE3 digest of the file contents, only present when requested.
    pub hash: Option<String>,
}

/// Format identification service.
///
/// Used by converters to verify that a hop produced what it promised, by
/// ingestion to classify incoming files, and by the post-run verification
/// pass.
///
/// # Errors
/// `Ok(None)` means the file is missing or could not be classified. An `Err`
/// means the service itself is unusable, which callers outside a single hop
/// treat as fatal for the whole batch.
#[async_trait]
pub trait Identifier: Send + Sync {
    fn name(&self) -> &str;

    async fn identify(&self, path: &Path, want_hash: bool) -> Result<Option<Identification>>;
}

pub type IdentifierHandle = Arc<dyn Identifier>;

/// Computes the BLAKE3 digest of a file on a blocking thread.
pub async fn hash_file(path: &Path) -> Result<String> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String> {
        let file = File::open(&owned).or_raise(|| ErrorKind::Io(owned.clone()))?;
        let mut hasher = blake3::Hasher::new();
        hasher.update_reader(file).or_raise(|| ErrorKind::Io(owned.clone()))?;
        Ok(hasher.finalize().to_hex().to_string())
    })
    .await
    .or_raise(|| ErrorKind::Io(path.to_path_buf()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_matches_blake3() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        let hash = hash_file(&path).await.unwrap();
        assert_eq!(hash, blake3::hash(b"hello").to_hex().to_string());
    }

    #[tokio::test]
    async fn test_hash_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = hash_file(&dir.path().join("missing")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Io(_)));
    }
}
