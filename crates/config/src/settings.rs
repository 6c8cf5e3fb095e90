use conveyor_format::FormatCode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A directory-scoped rule, applied to the directory and everything below it.
///
/// ```toml
/// [[overrides]]
/// folder = "scans"
/// target = "fmt/477"
/// formats = ["fmt/353", "fmt/43"]
/// merge = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderOverride {
    /// Directory relative to the output root.
    pub folder: PathBuf,
    /// Format that matching files are converted (or merged) into.
    pub target: FormatCode,
    /// Source formats the override applies to. Empty means every format.
    #[serde(default)]
    pub formats: Vec<FormatCode>,
    /// Combine matching files into one document per directory instead of
    /// converting them one by one.
    #[serde(default)]
    pub merge: bool,
}
impl FolderOverride {
    pub fn matches(&self, format: &FormatCode) -> bool {
        self.formats.is_empty() || self.formats.contains(format)
    }
}

/// An explicit route that takes precedence over the discovered one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOverride {
    pub from: FormatCode,
    pub to: FormatCode,
    /// Intermediate formats, in order. Empty for a forced direct hop.
    #[serde(default)]
    pub via: Vec<FormatCode>,
}

/// Per-engine switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Engine {
    pub enabled: bool,
    /// Use this executable instead of searching the `PATH`.
    pub executable: Option<PathBuf>,
}
impl Default for Engine {
    fn default() -> Self {
        Self { enabled: true, executable: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Engines {
    pub libreoffice: Engine,
    pub ghostscript: Engine,
    pub imagemagick: Engine,
}
