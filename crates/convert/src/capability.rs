use conveyor_format::FormatCode;
use std::collections::{BTreeMap, BTreeSet};

/// The `(source, target)` pairs a converter can produce in a single step.
///
/// Built once when a converter is constructed and only read afterwards.
/// Self-pairs are never recorded.
///
/// # Examples
///
/// ```
/// use conveyor_convert::CapabilityMap;
///
/// let map = CapabilityMap::new()
///     .with("fmt/40", ["fmt/276", "fmt/291"])
///     .with_all(["fmt/412", "fmt/40"], ["fmt/276"]);
/// assert!(map.supports(&"fmt/412".into(), &"fmt/276".into()));
/// assert!(!map.supports(&"fmt/276".into(), &"fmt/40".into()));
/// assert_eq!(map.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityMap(BTreeMap<FormatCode, BTreeSet<FormatCode>>);
impl CapabilityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every `from -> target` pair.
    pub fn with(mut self, from: impl Into<FormatCode>, targets: impl IntoIterator<Item = impl Into<FormatCode>>) -> Self {
        self.insert(from.into(), targets);
        self
    }

    /// Adds the full cross product of `sources` and `targets`.
    pub fn with_all(
        mut self,
        sources: impl IntoIterator<Item = impl Into<FormatCode>>,
        targets: impl IntoIterator<Item = impl Into<FormatCode>> + Clone,
    ) -> Self {
        for from in sources {
            self.insert(from.into(), targets.clone());
        }
        self
    }

    fn insert(&mut self, from: FormatCode, targets: impl IntoIterator<Item = impl Into<FormatCode>>) {
        let set = self.0.entry(from.clone()).or_default();
        set.extend(targets.into_iter().map(Into::into).filter(|to| to != &from));
        if set.is_empty() {
            self.0.remove(&from);
        }
    }

    /// Merges another map into this one.
    pub fn extend(&mut self, other: &CapabilityMap) {
        for (from, targets) in &other.0 {
            self.insert(from.clone(), targets.iter().cloned());
        }
    }

    pub fn supports(&self, from: &FormatCode, to: &FormatCode) -> bool {
        self.0.get(from).is_some_and(|targets| targets.contains(to))
    }

    /// Formats directly reachable from `from`, in code order.
    pub fn targets(&self, from: &FormatCode) -> impl Iterator<Item = &FormatCode> {
        self.0.get(from).into_iter().flatten()
    }

    pub fn sources(&self) -> impl Iterator<Item = &FormatCode> {
        self.0.keys()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&FormatCode, &FormatCode)> {
        self.0.iter().flat_map(|(from, targets)| targets.iter().map(move |to| (from, to)))
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
