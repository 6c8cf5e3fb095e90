use crate::engine::{locate, probe_version};
use crate::error::{ErrorKind, Result};
use crate::{CapabilityMap, Combiner, Converter, process};
use async_trait::async_trait;
use conveyor_format::FormatCode;
use conveyor_format::catalogue::{
    EPS, PDF_1_3, PDF_1_4, PDF_1_5, PDF_1_6, PDF_1_7, PDFA_1A, PDFA_1B, PDFA_2A, PDFA_2B, PDFA_2U, POSTSCRIPT, TIFF,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::instrument;

const CANDIDATES: &[&str] = &["gs", "gswin64c", "gswin32c"];
const PDF: &[&str] = &[PDF_1_3, PDF_1_4, PDF_1_5, PDF_1_6, PDF_1_7, PDFA_1A, PDFA_1B, PDFA_2A, PDFA_2B, PDFA_2U];
const POSTSCRIPTS: &[&str] = &[POSTSCRIPT, EPS];
/// Resolution for rasterized pages.
const DPI: u32 = 300;

/// The PostScript and PDF engine (`gs`).
///
/// Normalizes anything PostScript-like into PDF 1.7 or PDF/A-2b, and
/// rasterizes PDF pages into multi-page TIFF. Also concatenates documents
/// for merge groups.
pub struct Ghostscript {
    executable: PathBuf,
    version: String,
    timeout: Duration,
    capabilities: CapabilityMap,
}
impl Ghostscript {
    pub fn discover(configured: Option<&Path>, timeout: Duration) -> Result<Self> {
        let executable = locate(CANDIDATES, configured)?;
        let version = probe_version(&executable, &["--version"]);
        Ok(Self::with_executable(executable, version, timeout))
    }

    pub fn with_executable(executable: impl Into<PathBuf>, version: impl Into<String>, timeout: Duration) -> Self {
        let capabilities = CapabilityMap::new()
            .with_all(PDF.iter().chain(POSTSCRIPTS).copied(), [PDF_1_7, PDFA_2B])
            .with_all(PDF.iter().copied(), [TIFF]);
        Self {
            executable: executable.into(),
            version: version.into(),
            timeout,
            capabilities,
        }
    }

    /// Device selection and output options for producing `to`.
    fn device_args(to: &FormatCode) -> Option<Vec<String>> {
        let args: &[&str] = match to.as_str() {
            PDFA_2B => &[
                "-sDEVICE=pdfwrite",
                "-dPDFA=2",
                "-dPDFACompatibilityPolicy=1",
                "-sColorConversionStrategy=RGB",
                "-sProcessColorModel=DeviceRGB",
            ],
            PDF_1_7 => &["-sDEVICE=pdfwrite", "-dCompatibilityLevel=1.7"],
            TIFF => &["-sDEVICE=tiff24nc", "-sCompression=lzw"],
            _ => return None,
        };
        let mut args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        if to.as_str() == TIFF {
            args.push(format!("-r{DPI}"));
        }
        Some(args)
    }

    fn command(&self, device: Vec<String>, inputs: &[&Path], output: &Path) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .args(["-dBATCH", "-dNOPAUSE", "-dQUIET", "-dSAFER"])
            .args(device)
            .arg(format!("-sOutputFile={}", output.display()))
            .args(inputs);
        command
    }

    async fn produce(&self, inputs: &[&Path], output: &Path, to: &FormatCode) -> Result<()> {
        let Some(device) = Self::device_args(to) else {
            exn::bail!(ErrorKind::Unsupported { from: FormatCode::unknown(), to: to.clone() });
        };
        process::run(self.command(device, inputs, output), self.timeout).await?;
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            exn::bail!(ErrorKind::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }
}

#[async_trait]
impl Converter for Ghostscript {
    fn name(&self) -> &str {
        "Ghostscript"
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn capabilities(&self) -> &CapabilityMap {
        &self.capabilities
    }

    #[instrument(skip(self), fields(input = %input.display()))]
    async fn execute(&self, input: &Path, output: &Path, from: &FormatCode, to: &FormatCode) -> Result<()> {
        if !self.supports(from, to) {
            exn::bail!(ErrorKind::Unsupported { from: from.clone(), to: to.clone() });
        }
        self.produce(&[input], output, to).await
    }
}

#[async_trait]
impl Combiner for Ghostscript {
    fn name(&self) -> &str {
        "Ghostscript"
    }

    fn can_combine(&self, from: &FormatCode, to: &FormatCode) -> bool {
        [PDF_1_7, PDFA_2B].contains(&to.as_str()) && (PDF.contains(&from.as_str()) || POSTSCRIPTS.contains(&from.as_str()))
    }

    #[instrument(skip_all, fields(inputs = inputs.len(), output = %output.display()))]
    async fn combine(&self, inputs: &[PathBuf], output: &Path, to: &FormatCode) -> Result<()> {
        let inputs: Vec<&Path> = inputs.iter().map(PathBuf::as_path).collect();
        self.produce(&inputs, output, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Ghostscript {
        Ghostscript::with_executable("gs", "10.0", Duration::from_secs(1))
    }

    #[test]
    fn test_capabilities() {
        let gs = engine();
        assert!(gs.supports(&POSTSCRIPT.into(), &PDFA_2B.into()));
        assert!(gs.supports(&PDF_1_4.into(), &TIFF.into()));
        assert!(!gs.supports(&EPS.into(), &TIFF.into()));
        assert!(!gs.supports(&PDF_1_7.into(), &PDF_1_7.into()));
    }

    #[test]
    fn test_command_line() {
        let gs = engine();
        let device = Ghostscript::device_args(&PDFA_2B.into()).unwrap();
        let command = gs.command(device, &[Path::new("a.pdf"), Path::new("b.ps")], Path::new("out.pdf"));
        let args: Vec<_> = command.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.contains(&"-dPDFA=2".to_string()));
        assert!(args.contains(&"-sOutputFile=out.pdf".to_string()));
        assert_eq!(&args[args.len() - 2..], ["a.pdf", "b.ps"]);
    }

    #[test]
    fn test_tiff_resolution() {
        let device = Ghostscript::device_args(&TIFF.into()).unwrap();
        assert!(device.contains(&"-r300".to_string()));
        assert!(Ghostscript::device_args(&"fmt/13".into()).is_none());
    }

    #[test]
    fn test_can_combine() {
        let gs = engine();
        assert!(gs.can_combine(&PDF_1_4.into(), &PDFA_2B.into()));
        assert!(gs.can_combine(&EPS.into(), &PDF_1_7.into()));
        assert!(!gs.can_combine(&"fmt/43".into(), &PDFA_2B.into()));
        assert!(!gs.can_combine(&PDF_1_4.into(), &TIFF.into()));
    }
}
