use crate::file::{ArchivalFile, FileId};
use crate::outcome::Outcome;
use std::sync::Mutex;

/// Receives the terminal outcome of every file once a run has settled.
///
/// Sinks are for reporting only; nothing they do feeds back into the run.
pub trait OutcomeSink: Send + Sync {
    fn record(&self, file: &ArchivalFile);
}

/// Logs one line per file.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;
impl OutcomeSink for TracingSink {
    fn record(&self, file: &ArchivalFile) {
        match &file.outcome {
            Some(Outcome::Failed { reason }) => {
                tracing::warn!(path = %file.path.display(), format = %file.current.format, %reason, "File not converted")
            },
            Some(outcome) => tracing::info!(
                path = %file.path.display(),
                format = %file.current.format,
                tools = ?file.tools,
                %outcome,
                "File settled"
            ),
            None => tracing::error!(path = %file.path.display(), "File left without an outcome"),
        }
    }
}

/// Keeps every recorded outcome in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(FileId, Option<Outcome>)>>,
}
impl MemorySink {
    pub fn records(&self) -> Vec<(FileId, Option<Outcome>)> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}
impl OutcomeSink for MemorySink {
    fn record(&self, file: &ArchivalFile) {
        if let Ok(mut records) = self.records.lock() {
            records.push((file.id, file.outcome.clone()));
        }
    }
}

/// Fans out to several sinks.
impl<A: OutcomeSink, B: OutcomeSink> OutcomeSink for (A, B) {
    fn record(&self, file: &ArchivalFile) {
        self.0.record(file);
        self.1.record(file);
    }
}
