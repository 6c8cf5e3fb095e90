use crate::outcome::Outcome;
use conveyor_format::{FormatCode, Identification};
use derive_more::Display;
use std::path::PathBuf;
use uuid::Uuid;

/// Opaque identity of an archival file, stable for the whole run.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(Uuid);
impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Compact form, safe to embed in file names.
    pub fn simple(&self) -> String {
        self.0.simple().to_string()
    }
}
impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

/// Format-related facts about a file at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatState {
    pub format: FormatCode,
    pub name: String,
    pub size: u64,
    pub checksum: Option<String>,
}
impl FormatState {
    /// State for a file the identification service could not classify.
    pub fn unidentified(size: u64) -> Self {
        Self {
            format: FormatCode::unknown(),
            name: String::new(),
            size,
            checksum: None,
        }
    }
}
impl From<&Identification> for FormatState {
    fn from(found: &Identification) -> Self {
        Self {
            format: found.format.clone(),
            name: found.name.clone(),
            size: found.size,
            checksum: found.hash.clone(),
        }
    }
}

/// The durable record for one input file.
///
/// Created once at ingestion, updated as converters move the file along its
/// route, and never removed during a run. A record ends the run with exactly
/// one [`Outcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivalFile {
    pub id: FileId,
    /// Where the file currently lives.
    pub path: PathBuf,
    /// As identified at ingestion.
    pub original: FormatState,
    /// As identified after the most recent successful hop or verification.
    pub current: FormatState,
    /// Format the file is supposed to end up in, once planning decided it.
    pub target: Option<FormatCode>,
    /// Converters that touched the file, in order of first use.
    pub tools: Vec<String>,
    pub outcome: Option<Outcome>,
}
impl ArchivalFile {
    pub fn new(path: impl Into<PathBuf>, original: FormatState) -> Self {
        Self {
            id: FileId::new(),
            path: path.into(),
            current: original.clone(),
            original,
            target: None,
            tools: Vec::new(),
            outcome: None,
        }
    }

    /// Shortcut for tests and ingestion of already identified files.
    pub fn identified(path: impl Into<PathBuf>, found: &Identification) -> Self {
        Self::new(path, FormatState::from(found))
    }

    pub fn format(&self) -> &FormatCode {
        &self.current.format
    }

    pub fn is_converted(&self) -> bool {
        matches!(self.outcome, Some(Outcome::Converted))
    }

    pub fn is_merged(&self) -> bool {
        matches!(self.outcome, Some(Outcome::Merged { .. }))
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self.outcome, Some(Outcome::NotSupported))
    }

    pub fn is_output_not_set(&self) -> bool {
        matches!(self.outcome, Some(Outcome::OutputNotSet))
    }
}
