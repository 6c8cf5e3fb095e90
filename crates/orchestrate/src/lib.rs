//! Planning and round-based execution of a conversion batch.
//!
//! [`ingest`] fills the registry. [`run`] then assigns every file a target
//! and a [`Route`], flushes merge groups, and advances the working set one hop
//! per round until nothing is left in flight.

pub mod error;
mod ingest;
mod item;
mod merge;
mod plan;
mod policy;
mod route;
mod run;
mod schedule;
mod verify;

pub use crate::ingest::ingest;
pub use crate::item::{WorkItem, WorkingSet};
pub use crate::merge::{MergeResult, flush};
pub use crate::plan::{Member, MergeGroup, Plan, Settled, plan};
pub use crate::policy::{Decision, OverrideTable, Policy};
pub use crate::route::{Pair, Route, RouteOptions, RouteTable};
pub use crate::run::{Context, Interrupt, RunEvent, RunOptions, Summary, run, run_to_end};
pub use crate::schedule::{Reconciliation, Round, Step, reconcile};
pub use crate::verify::{Verification, verify};
