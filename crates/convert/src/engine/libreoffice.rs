use crate::engine::{locate, probe_version};
use crate::error::{ErrorKind, Result};
use crate::{CapabilityMap, Converter, process};
use async_trait::async_trait;
use conveyor_format::FormatCode;
use conveyor_format::catalogue::{DOC, DOCX, ODP, ODS, ODT, PDF_1_7, PDFA_1B, PDFA_2B, PPT, PPTX, RTF, TXT, XLS, XLSX};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::instrument;

const CANDIDATES: &[&str] = &["soffice", "libreoffice"];
const TEXT: &[&str] = &[DOC, DOCX, RTF, TXT, ODT];
const SPREADSHEET: &[&str] = &[XLS, XLSX, ODS];
const PRESENTATION: &[&str] = &[PPT, PPTX, ODP];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Text,
    Spreadsheet,
    Presentation,
}
impl Family {
    fn of(code: &FormatCode) -> Option<Self> {
        let code = code.as_str();
        if TEXT.contains(&code) {
            Some(Self::Text)
        } else if SPREADSHEET.contains(&code) {
            Some(Self::Spreadsheet)
        } else if PRESENTATION.contains(&code) {
            Some(Self::Presentation)
        } else {
            None
        }
    }

    fn pdf_filter(self) -> &'static str {
        match self {
            Self::Text => "writer_pdf_Export",
            Self::Spreadsheet => "calc_pdf_Export",
            Self::Presentation => "impress_pdf_Export",
        }
    }
}

/// The office-document engine (`soffice --headless`).
///
/// LibreOffice shares state between instances of the same user profile and
/// falls over when several conversions run at once, so every conversion
/// through one `LibreOffice` value holds its [`serial`](Converter::serial)
/// lock.
pub struct LibreOffice {
    executable: PathBuf,
    version: String,
    timeout: Duration,
    capabilities: CapabilityMap,
    lock: Mutex<()>,
}
impl LibreOffice {
    pub fn discover(configured: Option<&Path>, timeout: Duration) -> Result<Self> {
        let executable = locate(CANDIDATES, configured)?;
        let version = probe_version(&executable, &["--version"]);
        Ok(Self::with_executable(executable, version, timeout))
    }

    pub fn with_executable(executable: impl Into<PathBuf>, version: impl Into<String>, timeout: Duration) -> Self {
        let capabilities = CapabilityMap::new()
            .with_all(TEXT.iter().copied(), [PDF_1_7, PDFA_1B, PDFA_2B, ODT])
            .with_all(SPREADSHEET.iter().copied(), [PDF_1_7, PDFA_1B, PDFA_2B, ODS])
            .with_all(PRESENTATION.iter().copied(), [PDF_1_7, PDFA_1B, PDFA_2B, ODP]);
        Self {
            executable: executable.into(),
            version: version.into(),
            timeout,
            capabilities,
            lock: Mutex::new(()),
        }
    }

    /// The `--convert-to` argument and the extension LibreOffice gives its
    /// output.
    fn filter(from: &FormatCode, to: &FormatCode) -> Option<(String, &'static str)> {
        let family = Family::of(from)?;
        let pdf_version = match to.as_str() {
            PDF_1_7 => "0",
            PDFA_1B => "1",
            PDFA_2B => "2",
            ODT if family == Family::Text => return Some(("odt".to_string(), "odt")),
            ODS if family == Family::Spreadsheet => return Some(("ods".to_string(), "ods")),
            ODP if family == Family::Presentation => return Some(("odp".to_string(), "odp")),
            _ => return None,
        };
        let options = serde_json::json!({ "SelectPdfVersion": { "type": "long", "value": pdf_version } });
        Some((format!("pdf:{}:{}", family.pdf_filter(), options), "pdf"))
    }
}

#[async_trait]
impl Converter for LibreOffice {
    fn name(&self) -> &str {
        "LibreOffice"
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn capabilities(&self) -> &CapabilityMap {
        &self.capabilities
    }

    fn serial(&self) -> Option<&Mutex<()>> {
        Some(&self.lock)
    }

    #[instrument(skip(self), fields(input = %input.display()))]
    async fn execute(&self, input: &Path, output: &Path, from: &FormatCode, to: &FormatCode) -> Result<()> {
        let Some((filter, extension)) = Self::filter(from, to) else {
            exn::bail!(ErrorKind::Unsupported { from: from.clone(), to: to.clone() });
        };
        let outdir = tempfile::tempdir().or_raise(|| ErrorKind::Io)?;
        let profile = tempfile::tempdir().or_raise(|| ErrorKind::Io)?;
        let mut command = Command::new(&self.executable);
        command
            .arg(format!("-env:UserInstallation=file://{}", profile.path().display()))
            .args(["--headless", "--norestore", "--convert-to"])
            .arg(&filter)
            .arg("--outdir")
            .arg(outdir.path())
            .arg(input);
        process::run(command, self.timeout).await?;

        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        let produced = outdir.path().join(format!("{stem}.{extension}"));
        if !tokio::fs::try_exists(&produced).await.or_raise(|| ErrorKind::Io)? {
            exn::bail!(ErrorKind::MissingOutput(produced));
        }
        // The temporary directory may live on another filesystem.
        tokio::fs::copy(&produced, output).await.or_raise(|| ErrorKind::Io)?;
        Ok(())
    }
}
