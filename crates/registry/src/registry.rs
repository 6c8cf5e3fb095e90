use crate::error::{ErrorKind, Result};
use crate::file::{ArchivalFile, FileId, FormatState};
use crate::outcome::{Bucket, Outcome, Tally};
use conveyor_format::{FormatCode, Identification};
use dashmap::DashMap;
use std::path::{Path, PathBuf};

/// Concurrent store of every [`ArchivalFile`] in the batch.
///
/// Many workers touch the registry at once, each about its own file. Every
/// operation is atomic per record and never locks across records.
///
/// # Examples
///
/// ```
/// use conveyor_registry::{ArchivalFile, FileRegistry, FormatState, Outcome};
///
/// let registry = FileRegistry::default();
/// let id = registry.register(ArchivalFile::new("in/report.doc", FormatState::unidentified(12)));
/// registry.replace_path(id, "in/report.pdf").unwrap();
/// registry.append_tool(id, "LibreOffice").unwrap();
/// registry.settle(id, Outcome::Converted).unwrap();
///
/// let file = registry.get(id).unwrap();
/// assert_eq!(file.path.to_str(), Some("in/report.pdf"));
/// assert_eq!(file.tools, vec!["LibreOffice".to_string()]);
/// assert!(file.is_converted());
/// ```
#[derive(Debug, Default)]
pub struct FileRegistry {
    files: DashMap<FileId, ArchivalFile>,
}
impl FileRegistry {
    pub fn register(&self, file: ArchivalFile) -> FileId {
        let id = file.id;
        self.files.insert(id, file);
        id
    }

    pub fn get(&self, id: FileId) -> Option<ArchivalFile> {
        self.files.get(&id).map(|f| f.clone())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn update<T>(&self, id: FileId, f: impl FnOnce(&mut ArchivalFile) -> T) -> Result<T> {
        match self.files.get_mut(&id) {
            Some(mut file) => Ok(f(file.value_mut())),
            None => exn::bail!(ErrorKind::UnknownFile(id)),
        }
    }

    /// Records that the file now lives at `path`.
    pub fn replace_path(&self, id: FileId, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.update(id, |file| file.path = path)
    }

    /// Adds a tool to the file's history, unless it already touched the file.
    pub fn append_tool(&self, id: FileId, tool: impl Into<String>) -> Result<()> {
        let tool = tool.into();
        self.update(id, |file| {
            if !file.tools.contains(&tool) {
                file.tools.push(tool);
            }
        })
    }

    /// Replaces the file's current format facts with a fresh identification.
    pub fn record_identification(&self, id: FileId, found: &Identification) -> Result<()> {
        let state = FormatState::from(found);
        self.update(id, |file| file.current = state)
    }

    /// Records that the file could not be identified (or is gone), keeping
    /// whatever was known about its size.
    pub fn record_unidentified(&self, id: FileId) -> Result<()> {
        self.update(id, |file| file.current = FormatState::unidentified(file.current.size))
    }

    pub fn set_target(&self, id: FileId, target: Option<FormatCode>) -> Result<()> {
        self.update(id, |file| file.target = target)
    }

    /// Assigns the file's terminal outcome, replacing any earlier one.
    pub fn settle(&self, id: FileId, outcome: Outcome) -> Result<()> {
        self.update(id, |file| {
            if let Some(previous) = &file.outcome
                && previous != &outcome
            {
                tracing::debug!(path = %file.path.display(), %previous, %outcome, "Reclassifying file outcome");
            }
            file.outcome = Some(outcome);
        })
    }

    /// Every record, ordered by path so that reports are stable between runs.
    pub fn snapshot(&self) -> Vec<ArchivalFile> {
        let mut files: Vec<_> = self.files.iter().map(|f| f.clone()).collect();
        files.sort_by(|a, b| a.path.cmp(&b.path).then(a.id.cmp(&b.id)));
        files
    }

    /// Finds the record currently living at `path`.
    pub fn find_by_path(&self, path: &Path) -> Option<ArchivalFile> {
        self.files.iter().find(|f| f.path == path).map(|f| f.clone())
    }

    pub fn tally(&self) -> Tally {
        self.files.iter().map(|f| f.outcome.as_ref().map_or(Bucket::Unsettled, Outcome::bucket)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, format: &str) -> ArchivalFile {
        let state = FormatState {
            format: format.into(),
            name: String::new(),
            size: 1,
            checksum: None,
        };
        ArchivalFile::new(path, state)
    }

    #[test]
    fn test_unknown_file() {
        let registry = FileRegistry::default();
        let err = registry.replace_path(FileId::new(), "x").unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownFile(_)));
    }

    #[test]
    fn test_append_tool_is_deduplicated() {
        let registry = FileRegistry::default();
        let id = registry.register(file("a.doc", "fmt/40"));
        registry.append_tool(id, "Ghostscript").unwrap();
        registry.append_tool(id, "LibreOffice").unwrap();
        registry.append_tool(id, "Ghostscript").unwrap();
        assert_eq!(registry.get(id).unwrap().tools, vec!["Ghostscript", "LibreOffice"]);
    }

    #[test]
    fn test_identification_updates_current_only() {
        let registry = FileRegistry::default();
        let id = registry.register(file("a.doc", "fmt/40"));
        let found = Identification {
            format: "fmt/276".into(),
            name: "PDF".to_string(),
            mime: None,
            size: 42,
            hash: Some("abc".to_string()),
        };
        registry.record_identification(id, &found).unwrap();
        let record = registry.get(id).unwrap();
        assert_eq!(record.original.format.as_str(), "fmt/40");
        assert_eq!(record.current.format.as_str(), "fmt/276");
        assert_eq!(record.current.checksum.as_deref(), Some("abc"));

        registry.record_unidentified(id).unwrap();
        let record = registry.get(id).unwrap();
        assert!(record.current.format.is_unknown());
        assert_eq!(record.current.size, 42);
    }

    #[test]
    fn test_tally_counts_unsettled() {
        let registry = FileRegistry::default();
        let a = registry.register(file("a", "fmt/40"));
        registry.register(file("b", "fmt/40"));
        registry.settle(a, Outcome::NotSupported).unwrap();
        let tally = registry.tally();
        assert_eq!(tally.get(Bucket::NotSupported), 1);
        assert_eq!(tally.get(Bucket::Unsettled), 1);
    }

    #[test]
    fn test_snapshot_is_sorted_and_findable() {
        let registry = FileRegistry::default();
        registry.register(file("b.doc", "fmt/40"));
        registry.register(file("a.doc", "fmt/40"));
        let paths: Vec<_> = registry.snapshot().into_iter().map(|f| f.path).collect();
        assert_eq!(paths, vec![PathBuf::from("a.doc"), PathBuf::from("b.doc")]);
        assert!(registry.find_by_path(Path::new("b.doc")).is_some());
        assert!(registry.find_by_path(Path::new("c.doc")).is_none());
    }
}
