use crate::error::{ErrorKind, Result};
use crate::identify::{Identification, Identifier, hash_file};
use crate::{FormatCode, catalogue};
use async_trait::async_trait;
use exn::ResultExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::instrument;

const EXECUTABLE: &str = "sf";
// Siegfried answers in milliseconds; anything slower is a hung process.
const TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct Report {
    #[serde(default)]
    files: Vec<ReportFile>,
}

#[derive(Deserialize)]
struct ReportFile {
    filesize: u64,
    #[serde(default)]
    matches: Vec<ReportMatch>,
}

#[derive(Deserialize)]
struct ReportMatch {
    #[serde(default)]
    ns: String,
    id: String,
    #[serde(default)]
    format: String,
    #[serde(default)]
    mime: String,
}

/// Identification through the [Siegfried](https://www.itforarchivists.com/siegfried)
/// command-line tool, using the PRONOM signature file it ships with.
pub struct Siegfried {
    executable: PathBuf,
}
impl Siegfried {
    /// Finds `sf` on the `PATH`.
    pub fn discover() -> Result<Self> {
        match which::which(EXECUTABLE) {
            Ok(executable) => Ok(Self { executable }),
            Err(_) => {
                tracing::info!("Siegfried executable not found in PATH");
                exn::bail!(ErrorKind::ToolNotFound(EXECUTABLE.to_string()))
            },
        }
    }

    pub fn with_executable(executable: impl Into<PathBuf>) -> Self {
        Self { executable: executable.into() }
    }

    fn parse(stdout: &[u8]) -> Result<Option<(FormatCode, String, Option<String>, u64)>> {
        let report: Report = serde_json::from_slice(stdout).or_raise(|| ErrorKind::InvalidReport)?;
        let Some(file) = report.files.into_iter().next() else {
            exn::bail!(ErrorKind::InvalidReport);
        };
        // Prefer the PRONOM namespace when several identifiers are loaded.
        let Some(found) = file
            .matches
            .iter()
            .find(|m| m.ns == "pronom")
            .or_else(|| file.matches.first())
        else {
            return Ok(None);
        };
        let format = FormatCode::new(&found.id);
        if format.is_unknown() {
            return Ok(None);
        }
        let name = match (found.format.is_empty(), catalogue::lookup(&format)) {
            (false, _) => found.format.clone(),
            (true, Some(entry)) => entry.name.to_string(),
            (true, None) => format.to_string(),
        };
        let mime = (!found.mime.is_empty()).then(|| found.mime.clone());
        Ok(Some((format, name, mime, file.filesize)))
    }
}

#[async_trait]
impl Identifier for Siegfried {
    fn name(&self) -> &str {
        "siegfried"
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn identify(&self, path: &Path, want_hash: bool) -> Result<Option<Identification>> {
        if !tokio::fs::try_exists(path).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))? {
            tracing::debug!("File missing; nothing to identify");
            return Ok(None);
        }
        let output = Command::new(&self.executable).arg("-json").arg(path).kill_on_drop(true).output();
        let output = match tokio::time::timeout(TIMEOUT, output).await {
            Ok(result) => result.or_raise(|| ErrorKind::Io(self.executable.clone()))?,
            Err(_) => exn::bail!(ErrorKind::ToolTimeout),
        };
        if !output.status.success() {
            exn::bail!(ErrorKind::ToolFailed(output.status.code().unwrap_or(-1)));
        }
        let Some((format, name, mime, size)) = Self::parse(&output.stdout)? else {
            tracing::debug!("Siegfried could not classify file");
            return Ok(None);
        };
        let hash = match want_hash {
            true => Some(hash_file(path).await?),
            false => None,
        };
        Ok(Some(Identification { format, name, mime, size, hash }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDF_REPORT: &str = r#"{
        "siegfried": "1.11.0",
        "identifiers": [{"name": "pronom", "details": "DROID_SignatureFile_V116.xml"}],
        "files": [{
            "filename": "/tmp/report.pdf",
            "filesize": 5120,
            "modified": "2024-01-01T00:00:00Z",
            "errors": "",
            "matches": [{
                "ns": "pronom",
                "id": "fmt/276",
                "format": "Acrobat PDF 1.7 - Portable Document Format",
                "version": "1.7",
                "mime": "application/pdf",
                "basis": "extension match pdf",
                "warning": ""
            }]
        }]
    }"#;

    #[test]
    fn test_parse_match() {
        let (format, name, mime, size) = Siegfried::parse(PDF_REPORT.as_bytes()).unwrap().unwrap();
        assert_eq!(format, FormatCode::from(catalogue::PDF_1_7));
        assert_eq!(name, "Acrobat PDF 1.7 - Portable Document Format");
        assert_eq!(mime.as_deref(), Some("application/pdf"));
        assert_eq!(size, 5120);
    }

    #[test]
    fn test_parse_unknown() {
        let report = r#"{"files": [{"filesize": 3, "matches": [{"ns": "pronom", "id": "UNKNOWN"}]}]}"#;
        assert!(Siegfried::parse(report.as_bytes()).unwrap().is_none());
    }

    #[test]
    fn test_parse_no_matches() {
        let report = r#"{"files": [{"filesize": 3}]}"#;
        assert!(Siegfried::parse(report.as_bytes()).unwrap().is_none());
    }

    #[test]
    fn test_parse_garbage() {
        let err = Siegfried::parse(b"not json").unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidReport));
        let err = Siegfried::parse(br#"{"files": []}"#).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidReport));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sf = Siegfried::with_executable("/nonexistent/sf");
        assert!(sf.identify(&dir.path().join("gone.pdf"), false).await.unwrap().is_none());
    }
}
