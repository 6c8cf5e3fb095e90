use derive_more::Display;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// How a file's journey through the batch ended.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The file is in its target format, either after conversion or because
    /// it already was.
    #[display("converted")]
    Converted,
    /// The file was combined with its neighbours into one document.
    #[display("merged into {}", into.display())]
    Merged { into: PathBuf },
    /// No converter can take the file anywhere towards its target.
    #[display("not supported")]
    NotSupported,
    /// Nobody configured what the file should become.
    #[display("output not set")]
    OutputNotSet,
    #[display("failed: {reason}")]
    Failed { reason: String },
}
impl Outcome {
    pub fn failed(reason: impl ToString) -> Self {
        Self::Failed { reason: reason.to_string() }
    }

    pub fn bucket(&self) -> Bucket {
        match self {
            Self::Converted => Bucket::Converted,
            Self::Merged { .. } => Bucket::Merged,
            Self::NotSupported => Bucket::NotSupported,
            Self::OutputNotSet => Bucket::OutputNotSet,
            Self::Failed { .. } => Bucket::Failed,
        }
    }
}

/// Reporting bucket of an [`Outcome`], without the details.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    #[display("converted")]
    Converted,
    #[display("merged")]
    Merged,
    #[display("not supported")]
    NotSupported,
    #[display("output not set")]
    OutputNotSet,
    #[display("failed")]
    Failed,
    /// Only ever seen mid-run; a finished run leaves nothing here.
    #[display("unsettled")]
    Unsettled,
}

/// Number of files per [`Bucket`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally(BTreeMap<Bucket, usize>);
impl Tally {
    pub fn add(&mut self, bucket: Bucket) {
        *self.0.entry(bucket).or_default() += 1;
    }

    pub fn get(&self, bucket: Bucket) -> usize {
        self.0.get(&bucket).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Bucket, usize)> + '_ {
        self.0.iter().map(|(b, n)| (*b, *n))
    }
}
impl FromIterator<Bucket> for Tally {
    fn from_iter<I: IntoIterator<Item = Bucket>>(iter: I) -> Self {
        let mut tally = Self::default();
        for bucket in iter {
            tally.add(bucket);
        }
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Outcome::Converted, "converted")]
    #[case(Outcome::NotSupported, "not supported")]
    #[case(Outcome::failed("timed out"), "failed: timed out")]
    #[case(Outcome::Merged { into: PathBuf::from("scans/scans.pdf") }, "merged into scans/scans.pdf")]
    fn test_outcome_display(#[case] outcome: Outcome, #[case] expected: &str) {
        assert_eq!(outcome.to_string(), expected);
    }

    #[test]
    fn test_tally() {
        let tally: Tally = [Bucket::Converted, Bucket::Failed, Bucket::Converted].into_iter().collect();
        assert_eq!(tally.get(Bucket::Converted), 2);
        assert_eq!(tally.get(Bucket::Failed), 1);
        assert_eq!(tally.get(Bucket::Merged), 0);
        assert_eq!(tally.total(), 3);
    }
}
