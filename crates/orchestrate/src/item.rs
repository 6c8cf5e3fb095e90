use crate::route::Route;
use conveyor_format::FormatCode;
use conveyor_registry::FileId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A file while it is being converted.
///
/// Separate from the long-lived [`ArchivalFile`](conveyor_registry::ArchivalFile):
/// it only exists while there is still a hop to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub file: FileId,
    pub path: PathBuf,
    pub format: FormatCode,
    pub target: FormatCode,
    pub route: Route,
    /// Whether the item was dispatched in the current round.
    pub claimed: bool,
    /// Successful hops so far.
    pub hops: usize,
}
impl WorkItem {
    /// `None` unless `route` is non-empty and ends with `target`.
    pub fn new(file: FileId, path: PathBuf, format: FormatCode, target: FormatCode, route: Route) -> Option<Self> {
        if route.target() != Some(&target) {
            return None;
        }
        Some(Self { file, path, format, target, route, claimed: false, hops: 0 })
    }

    /// The format the next hop should produce.
    pub fn next_hop(&self) -> Option<&FormatCode> {
        self.route.next()
    }
}

/// Items in flight, keyed by the path they currently live at.
///
/// Only touched between rounds, from a single task.
#[derive(Debug, Clone, Default)]
pub struct WorkingSet(BTreeMap<PathBuf, WorkItem>);
impl WorkingSet {
    /// Adds an item, handing it back if its path is already taken.
    pub fn insert(&mut self, item: WorkItem) -> Result<(), WorkItem> {
        if self.0.contains_key(&item.path) {
            return Err(item);
        }
        self.0.insert(item.path.clone(), item);
        Ok(())
    }

    pub fn get(&self, path: &Path) -> Option<&WorkItem> {
        self.0.get(path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut WorkItem> {
        self.0.get_mut(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.0.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WorkItem> {
        self.0.values_mut()
    }

    /// Removes and returns every item.
    pub fn drain(&mut self) -> impl Iterator<Item = WorkItem> {
        std::mem::take(&mut self.0).into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(path: &str, route: &[&str]) -> Option<WorkItem> {
        let route = Route::new(route.iter().map(|h| FormatCode::from(*h)))?;
        WorkItem::new(FileId::new(), PathBuf::from(path), "a".into(), "c".into(), route)
    }

    #[test]
    fn test_route_must_end_at_target() {
        assert!(item("x", &["b", "c"]).is_some());
        assert!(item("x", &["c", "b"]).is_none());
        assert!(item("x", &[]).is_none());
    }

    #[test]
    fn test_paths_are_unique() {
        let mut set = WorkingSet::default();
        assert!(set.insert(item("x", &["c"]).unwrap()).is_ok());
        assert!(set.insert(item("x", &["b", "c"]).unwrap()).is_err());
        assert!(set.insert(item("y", &["b", "c"]).unwrap()).is_ok());
        assert_eq!(set.len(), 2);
        assert_eq!(set.drain().count(), 2);
        assert!(set.is_empty());
    }
}
