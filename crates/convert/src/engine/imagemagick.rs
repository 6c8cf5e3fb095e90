use crate::engine::{locate, probe_version};
use crate::error::{ErrorKind, Result};
use crate::{CapabilityMap, Combiner, Converter, process};
use async_trait::async_trait;
use conveyor_format::FormatCode;
use conveyor_format::catalogue::{BMP, GIF, JPEG, PDF_1_3, PNG, TIFF};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::instrument;

// `convert` is the ImageMagick 6 name.
const CANDIDATES: &[&str] = &["magick", "convert"];
const RASTER: &[&str] = &[JPEG, PNG, TIFF, BMP, GIF];

/// The raster image engine (`magick`).
///
/// Turns images into single-image PDF (which Ghostscript can take further),
/// TIFF or PNG, and stacks several images into one PDF for merge groups.
pub struct ImageMagick {
    executable: PathBuf,
    version: String,
    timeout: Duration,
    capabilities: CapabilityMap,
}
impl ImageMagick {
    pub fn discover(configured: Option<&Path>, timeout: Duration) -> Result<Self> {
        let executable = locate(CANDIDATES, configured)?;
        let version = probe_version(&executable, &["-version"]);
        Ok(Self::with_executable(executable, version, timeout))
    }

    pub fn with_executable(executable: impl Into<PathBuf>, version: impl Into<String>, timeout: Duration) -> Self {
        let capabilities = CapabilityMap::new().with_all(RASTER.iter().copied(), [PDF_1_3, TIFF, PNG]);
        Self {
            executable: executable.into(),
            version: version.into(),
            timeout,
            capabilities,
        }
    }

    /// Output argument with an explicit coder prefix, so the result does not
    /// depend on the (hidden, arbitrary) output file extension.
    fn output_arg(output: &Path, to: &FormatCode) -> Option<OsString> {
        let coder = match to.as_str() {
            PDF_1_3 => "PDF",
            TIFF => "TIFF",
            PNG => "PNG",
            _ => return None,
        };
        let mut arg = OsString::from(format!("{coder}:"));
        arg.push(output);
        Some(arg)
    }

    async fn produce(&self, inputs: &[&Path], output: &Path, to: &FormatCode) -> Result<()> {
        let Some(target) = Self::output_arg(output, to) else {
            exn::bail!(ErrorKind::Unsupported { from: FormatCode::unknown(), to: to.clone() });
        };
        let mut command = Command::new(&self.executable);
        command.args(inputs).arg(target);
        process::run(command, self.timeout).await?;
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            exn::bail!(ErrorKind::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }
}

#[async_trait]
impl Converter for ImageMagick {
    fn name(&self) -> &str {
        "ImageMagick"
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
impl Combiner for ImageMagick {
    fn name(&self) -> &str {
        "ImageMagick"
    }

    fn can_combine(&self, from: &FormatCode, to: &FormatCode) -> bool {
        [PDF_1_3, TIFF].contains(&to.as_str()) && RASTER.contains(&from.as_str())
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

    #[test]
    fn test_output_arg() {
        let arg = ImageMagick::output_arg(Path::new("out/.scan.1.pdf"), &PDF_1_3.into()).unwrap();
        assert_eq!(arg, OsString::from("PDF:out/.scan.1.pdf"));
        assert!(ImageMagick::output_arg(Path::new("x"), &JPEG.into()).is_none());
    }

    #[test]
    fn test_capabilities() {
        let magick = ImageMagick::with_executable("magick", "7.1", Duration::from_secs(1));
        assert!(magick.supports(&JPEG.into(), &PDF_1_3.into()));
        assert!(magick.supports(&GIF.into(), &PNG.into()));
        assert!(!magick.supports(&PNG.into(), &PNG.into()));
        assert!(magick.can_combine(&BMP.into(), &TIFF.into()));
        assert!(!magick.can_combine(&BMP.into(), &PNG.into()));
    }
}
