use crate::item::{WorkItem, WorkingSet};
use crate::policy::{Decision, Policy};
use crate::route::{Route, RouteTable};
use conveyor_format::FormatCode;
use conveyor_registry::{ArchivalFile, FileId, Outcome};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A file to be combined with its neighbours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub file: FileId,
    pub path: PathBuf,
    pub format: FormatCode,
}

/// Files of one directory that end up as a single document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeGroup {
    pub directory: PathBuf,
    pub target: FormatCode,
    pub members: Vec<Member>,
}

/// A file that needs no further work, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub file: FileId,
    pub target: Option<FormatCode>,
    pub outcome: Outcome,
}

#[derive(Debug, Default)]
pub struct Plan {
    pub working: WorkingSet,
    pub merges: BTreeMap<PathBuf, MergeGroup>,
    pub settled: Vec<Settled>,
}
impl Plan {
    /// Every file the plan accounts for.
    pub fn len(&self) -> usize {
        self.working.len() + self.merges.values().map(|g| g.members.len()).sum::<usize>() + self.settled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Assigns every unsettled file a target, then either a route, a merge group
/// or an immediate outcome.
///
/// Routes come from `routes`; a pair the table does not know is attempted as
/// a single direct hop.
pub fn plan(files: &[ArchivalFile], routes: &RouteTable, policy: &Policy) -> Plan {
    let mut plan = Plan::default();
    for file in files.iter().filter(|f| f.outcome.is_none()) {
        let directory = file.path.parent().unwrap_or_else(|| Path::new(""));
        let format = file.format();
        let target = match policy.decide(directory, format) {
            Decision::NoTarget => {
                plan.settled.push(Settled { file: file.id, target: None, outcome: Outcome::OutputNotSet });
                continue;
            },
            Decision::Merge { group, target } => {
                let member = Member { file: file.id, path: file.path.clone(), format: format.clone() };
                plan.merges
                    .entry(group.clone())
                    .or_insert_with(|| MergeGroup { directory: group, target, members: Vec::new() })
                    .members
                    .push(member);
                continue;
            },
            Decision::Convert(target) => target,
        };
        if format == &target {
            plan.settled.push(Settled { file: file.id, target: Some(target), outcome: Outcome::Converted });
            continue;
        }
        let route = routes.get(format, &target).cloned().unwrap_or_else(|| Route::direct(target.clone()));
        let item = WorkItem::new(file.id, file.path.clone(), format.clone(), target.clone(), route);
        let queued = item.map(|item| plan.working.insert(item));
        if !matches!(queued, Some(Ok(()))) {
            tracing::error!(path = %file.path.display(), "Could not queue file for conversion");
            let outcome = Outcome::failed("could not be scheduled");
            plan.settled.push(Settled { file: file.id, target: Some(target), outcome });
        }
    }
    tracing::info!(
        working = plan.working.len(),
        merge_groups = plan.merges.len(),
        settled = plan.settled.len(),
        "Conversion planned"
    );
    plan
}
