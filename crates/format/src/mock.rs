//! Content-sniffing identifier for testing.

use crate::error::{ErrorKind, Result};
use crate::identify::{Identification, Identifier};
use crate::{FormatCode, catalogue};
use async_trait::async_trait;
use exn::ResultExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Identifies a file by reading its format code from the first line.
///
/// Test fixtures (and the mock converters) write the code a file is supposed
/// to be in as its first line, e.g. `fmt/276\n...`. Missing and empty files
/// are unclassifiable. Every call is counted so that tests can assert on how
/// often verification happened.
#[derive(Default)]
pub struct MockIdentifier {
    calls: AtomicUsize,
    unavailable: bool,
}
impl MockIdentifier {
    /// An identifier that fails every call, as if the service were down.
    pub fn unavailable() -> Self {
        Self { calls: AtomicUsize::new(0), unavailable: true }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Identifier for MockIdentifier {
    fn name(&self) -> &str {
        "mock"
    }

    async fn identify(&self, path: &Path, want_hash: bool) -> Result<Option<Identification>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            exn::bail!(ErrorKind::ToolNotFound("mock".to_string()));
        }
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Io(path.to_path_buf())),
        };
        let text = String::from_utf8_lossy(&bytes);
        let format = FormatCode::new(text.lines().next().unwrap_or_default());
        if format.is_unknown() {
            return Ok(None);
        }
        let name = catalogue::lookup(&format).map_or_else(|| format!("Mock {format}"), |e| e.name.to_string());
        let hash = want_hash.then(|| blake3::hash(&bytes).to_hex().to_string());
        Ok(Some(Identification {
            format,
            name,
            mime: None,
            size: bytes.len() as u64,
            hash,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identifies_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.doc");
        std::fs::write(&path, "fmt/40\nbody").unwrap();
        let id = MockIdentifier::default();
        let found = id.identify(&path, true).await.unwrap().unwrap();
        assert_eq!(found.format.as_str(), "fmt/40");
        assert_eq!(found.name, "Microsoft Word 97-2003 Document");
        assert_eq!(found.size, 11);
        assert!(found.hash.is_some());
        assert_eq!(id.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        std::fs::write(&empty, "").unwrap();
        let id = MockIdentifier::default();
        assert!(id.identify(&empty, false).await.unwrap().is_none());
        assert!(id.identify(&dir.path().join("missing"), false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MockIdentifier::unavailable().identify(dir.path(), false).await.is_err());
    }
}
