//! The bundled external engines.

mod ghostscript;
mod imagemagick;
mod libreoffice;

pub use self::ghostscript::Ghostscript;
pub use self::imagemagick::ImageMagick;
pub use self::libreoffice::LibreOffice;
use crate::error::{ErrorKind, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Resolves an engine executable: the configured path when given, else the
/// first candidate found on the `PATH`.
pub(crate) fn locate(candidates: &[&str], configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        return match which::which(path) {
            Ok(path) => Ok(path),
            Err(_) => exn::bail!(ErrorKind::ToolNotFound(path.display().to_string())),
        };
    }
    for candidate in candidates {
        if let Ok(path) = which::which(candidate) {
            return Ok(path);
        }
    }
    exn::bail!(ErrorKind::ToolNotFound(candidates.join("/")))
}

/// First non-empty line an engine prints for its version flag.
pub(crate) fn probe_version(executable: &Path, args: &[&str]) -> String {
    let output = Command::new(executable).args(args).stdin(Stdio::null()).stderr(Stdio::null()).output();
    match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map_or_else(|| "unknown".to_string(), str::to_string),
        _ => {
            tracing::debug!(executable = %executable.display(), "Could not determine engine version");
            "unknown".to_string()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_missing() {
        let err = locate(&["conveyor-no-such-engine"], None).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ToolNotFound(name) if name == "conveyor-no-such-engine"));
        let err = locate(&["sh"], Some(Path::new("/nonexistent/engine"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ToolNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_locate_and_probe() {
        let sh = locate(&["conveyor-no-such-engine", "sh"], None).unwrap();
        assert!(sh.is_absolute());
        assert_eq!(probe_version(&sh, &["-c", "echo; echo 1.2.3"]), "1.2.3");
        assert_eq!(probe_version(&sh, &["-c", "exit 1"]), "unknown");
    }
}
