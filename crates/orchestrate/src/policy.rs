use conveyor_config::{Config, FolderOverride};
use conveyor_format::FormatCode;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What should happen to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Convert(FormatCode),
    /// Combine with the other matching files of `group` into one `target`
    /// document.
    Merge { group: PathBuf, target: FormatCode },
    /// Nobody said what the file should become.
    NoTarget,
}

/// Folder overrides resolved to concrete directories.
///
/// Every directory below an overridden folder is enumerated up front; a
/// nested override wins over the one above it.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    overrides: Vec<FolderOverride>,
    directories: HashMap<PathBuf, usize>,
}
impl OverrideTable {
    /// Resolves `overrides` (relative folders) against `root`.
    pub fn enumerate(root: &Path, overrides: &[FolderOverride]) -> Self {
        let mut order: Vec<usize> = (0..overrides.len()).collect();
        order.sort_by_key(|&i| overrides[i].folder.components().count());
        let mut directories = HashMap::new();
        for i in order {
            let folder = root.join(&overrides[i].folder);
            if !folder.is_dir() {
                tracing::warn!(folder = %folder.display(), "Override folder does not exist");
            }
            directories.insert(folder.clone(), i);
            for entry in WalkDir::new(&folder).min_depth(1).into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_dir() {
                    directories.insert(entry.into_path(), i);
                }
            }
        }
        tracing::debug!(overrides = overrides.len(), directories = directories.len(), "Folder overrides enumerated");
        Self { overrides: overrides.to_vec(), directories }
    }

    /// The override governing `directory`, if any.
    ///
    /// Directories that appeared after enumeration inherit from their
    /// closest enumerated ancestor.
    pub fn lookup(&self, directory: &Path) -> Option<&FolderOverride> {
        directory.ancestors().find_map(|dir| self.directories.get(dir)).map(|&i| &self.overrides[i])
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

/// Decides each file's target: folder overrides first, then the global
/// source-to-target mapping.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub overrides: OverrideTable,
    pub targets: BTreeMap<FormatCode, FormatCode>,
}
impl Policy {
    pub fn new(overrides: OverrideTable, targets: BTreeMap<FormatCode, FormatCode>) -> Self {
        Self { overrides, targets }
    }

    /// Builds the policy for the converted tree rooted at `root`.
    pub fn from_config(root: &Path, config: &Config) -> Self {
        Self::new(OverrideTable::enumerate(root, &config.overrides), config.targets.clone())
    }

    /// Decides for a file of `format` living in `directory`.
    pub fn decide(&self, directory: &Path, format: &FormatCode) -> Decision {
        if let Some(rule) = self.overrides.lookup(directory)
            && rule.matches(format)
        {
            return match rule.merge {
                true => Decision::Merge { group: directory.to_path_buf(), target: rule.target.clone() },
                false => Decision::Convert(rule.target.clone()),
            };
        }
        match self.targets.get(format) {
            Some(target) => Decision::Convert(target.clone()),
            None => Decision::NoTarget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(folder: &str, target: &str, formats: &[&str], merge: bool) -> FolderOverride {
        FolderOverride {
            folder: folder.into(),
            target: target.into(),
            formats: formats.iter().map(|f| FormatCode::from(*f)).collect(),
            merge,
        }
    }

    #[test]
    fn test_decisions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("scans/2024/march")).unwrap();
        std::fs::create_dir_all(root.join("letters")).unwrap();
        let overrides = vec![rule("scans", "pdfa", &["img"], true), rule("letters", "odt", &[], false)];
        let policy = Policy::new(OverrideTable::enumerate(root, &overrides), BTreeMap::from([("doc".into(), "pdf".into())]));

        let march = root.join("scans/2024/march");
        assert_eq!(policy.decide(&march, &"img".into()), Decision::Merge { group: march.clone(), target: "pdfa".into() });
        // Not in the override's list: global targets apply.
        assert_eq!(policy.decide(&march, &"doc".into()), Decision::Convert("pdf".into()));
        assert_eq!(policy.decide(&march, &"xls".into()), Decision::NoTarget);
        // An empty list matches everything.
        assert_eq!(policy.decide(&root.join("letters"), &"xls".into()), Decision::Convert("odt".into()));
        assert_eq!(policy.decide(root, &"doc".into()), Decision::Convert("pdf".into()));
    }

    #[test]
    fn test_nested_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("a/b/c")).unwrap();
        let overrides = vec![rule("a/b", "inner", &[], false), rule("a", "outer", &[], false)];
        let table = OverrideTable::enumerate(root, &overrides);
        assert_eq!(table.lookup(&root.join("a/b/c")).map(|o| o.target.as_str()), Some("inner"));
        assert_eq!(table.lookup(&root.join("a")).map(|o| o.target.as_str()), Some("outer"));
        // Created after enumeration.
        assert_eq!(table.lookup(&root.join("a/new")).map(|o| o.target.as_str()), Some("outer"));
        assert!(table.lookup(root).is_none());
    }
}
