//! The archival file registry.
//!
//! An [`ArchivalFile`] is the long-lived record of one input file: where it
//! is, what it was, what it has become, which tools touched it and how its
//! journey ended. Records live in a [`FileRegistry`] shared by every worker
//! of a run; converters update them through a narrow set of
//! calls ([`FileRegistry::replace_path`], [`FileRegistry::append_tool`],
//! [`FileRegistry::record_identification`]).
//!
//! Terminal outcomes are reported to an [`OutcomeSink`] once the run is over.

pub mod error;
mod file;
mod outcome;
mod registry;
mod sink;

pub use crate::file::{ArchivalFile, FileId, FormatState};
pub use crate::outcome::{Bucket, Outcome, Tally};
pub use crate::registry::FileRegistry;
pub use crate::sink::{MemorySink, OutcomeSink, TracingSink};
use std::sync::Arc;

pub type RegistryHandle = Arc<FileRegistry>;
