//! One round of the execution scheduler.
//!
//! A round dispatches the next hop of every item in the working set onto a
//! bounded pool, waits for all of them, and only then reconciles the results
//! into the working set. Items therefore never have two hops in flight, and
//! the working set is only mutated from the orchestrating task.

use crate::item::WorkingSet;
use conveyor_convert::{Cancellation, ConverterSet, FailureReason, Hop, HopContext, HopOutcome, output};
use conveyor_format::FormatCode;
use conveyor_registry::{FileId, Outcome};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};

/// What [`Round::step`] observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A dispatched hop finished.
    Completed { done: usize, total: usize },
    /// Nothing finished within the polling interval.
    Waiting { done: usize, total: usize },
    /// A hop could not be verified because the identification service
    /// failed. The rest of the round has been told to stop.
    Unavailable(String),
    /// Every dispatched hop has finished.
    Drained,
}

/// Hops dispatched in one round.
pub struct Round {
    tasks: JoinSet<HopOutcome>,
    hops: HashMap<Id, Hop>,
    results: Vec<(PathBuf, HopOutcome)>,
    total: usize,
    cancellation: Cancellation,
}
impl Round {
    /// Claims every item of `working` and dispatches its next hop.
    ///
    /// Each item goes to the first converter, in priority order, declaring
    /// `(current format, next hop)`. At most `permits` hops run at once.
    pub fn dispatch(
        working: &mut WorkingSet,
        converters: &ConverterSet,
        ctx: &HopContext,
        permits: &Arc<Semaphore>,
    ) -> Self {
        let cancellation = Cancellation::default();
        let ctx = ctx.with_cancellation(cancellation.clone());
        let mut round = Self {
            tasks: JoinSet::new(),
            hops: HashMap::new(),
            results: Vec::new(),
            total: 0,
            cancellation,
        };
        for item in working.iter_mut() {
            item.claimed = true;
            round.total += 1;
            let Some(to) = item.next_hop().cloned() else {
                round.results.push((item.path.clone(), HopOutcome::Failed(FailureReason::NoConverter)));
                continue;
            };
            let Some(converter) = converters.first_supporting(&item.format, &to).cloned() else {
                tracing::debug!(path = %item.path.display(), from = %item.format, %to, "No converter for hop");
                round.results.push((item.path.clone(), HopOutcome::Failed(FailureReason::NoConverter)));
                continue;
            };
            let hop = Hop { file: item.file, source: item.path.clone(), from: item.format.clone(), to };
            let task = {
                let hop = hop.clone();
                let ctx = ctx.clone();
                let permits = Arc::clone(permits);
                async move {
                    let permit = tokio::select! {
                        biased;
                        () = ctx.cancellation.cancelled() => return HopOutcome::Failed(FailureReason::Interrupted),
                        permit = permits.acquire_owned() => permit,
                    };
                    let Ok(_permit) = permit else {
                        return HopOutcome::Failed(FailureReason::Interrupted);
                    };
                    let outcome = converter.convert(&hop, &ctx).await;
                    if let HopOutcome::Failed(FailureReason::Identification(error)) = &outcome {
                        tracing::error!(path = %hop.source.display(), %error, "Identification service failed");
                        // Before the permit is released, so no queued hop starts.
                        ctx.cancellation.cancel();
                    }
                    outcome
                }
            };
            let handle = round.tasks.spawn(task);
            round.hops.insert(handle.id(), hop);
        }
        round
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn done(&self) -> usize {
        self.results.len()
    }

    /// Waits up to `interval` for the next dispatched hop to finish.
    pub async fn step(&mut self, interval: Duration) -> Step {
        if self.tasks.is_empty() {
            return Step::Drained;
        }
        let joined = match tokio::time::timeout(interval, self.tasks.join_next_with_id()).await {
            Err(_) => return Step::Waiting { done: self.done(), total: self.total },
            Ok(None) => return Step::Drained,
            Ok(Some(joined)) => joined,
        };
        let (id, outcome) = settle(joined);
        let unavailable = match &outcome {
            HopOutcome::Failed(FailureReason::Identification(error)) => Some(error.clone()),
            _ => None,
        };
        if let Some(hop) = self.hops.remove(&id) {
            self.results.push((hop.source, outcome));
        }
        match unavailable {
            Some(error) => Step::Unavailable(error),
            None => Step::Completed { done: self.done(), total: self.total },
        }
    }

    /// Stops every hop still in flight and waits for them to wind down.
    ///
    /// Hops still waiting or running are killed and reported as interrupted.
    /// A hop whose output was already verified finishes placing it.
    pub async fn abort(&mut self) {
        self.cancellation.cancel();
        while let Some(joined) = self.tasks.join_next_with_id().await {
            let (id, outcome) = settle(joined);
            let Some(hop) = self.hops.remove(&id) else {
                continue;
            };
            if !outcome.is_converted() {
                output::discard(&output::staging_path(&hop.source, hop.file, &hop.to)).await;
            }
            self.results.push((hop.source, outcome));
        }
    }

    pub fn into_results(self) -> Vec<(PathBuf, HopOutcome)> {
        self.results
    }
}

fn settle(joined: std::result::Result<(Id, HopOutcome), JoinError>) -> (Id, HopOutcome) {
    match joined {
        Ok((id, outcome)) => (id, outcome),
        Err(e) if e.is_panic() => {
            tracing::error!(task = %e.id(), "Conversion task panicked");
            (e.id(), HopOutcome::Failed(FailureReason::Panicked))
        },
        Err(e) => (e.id(), HopOutcome::Failed(FailureReason::Interrupted)),
    }
}

/// Effect of a round on the files it touched.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Items that moved one hop closer to their target.
    pub advanced: usize,
    /// Files that left the working set, with their terminal outcome.
    pub settled: Vec<(FileId, Outcome)>,
}

/// Folds a round's results into the working set.
///
/// Successful items advance one hop and are re-keyed under their new path;
/// finished ones leave the set as converted. A failed hop removes the item:
/// not supported when no converter could take its very first hop, failed
/// otherwise. Claimed items without a result are treated as failed too.
pub fn reconcile(working: &mut WorkingSet, results: Vec<(PathBuf, HopOutcome)>) -> Reconciliation {
    let mut reconciliation = Reconciliation::default();
    let mut advanced = Vec::new();
    let mut outcomes: BTreeMap<PathBuf, HopOutcome> = results.into_iter().collect();

    for mut item in working.drain() {
        let Some(result) = outcomes.remove(&item.path) else {
            match item.claimed {
                true => reconciliation.settled.push((item.file, Outcome::failed("hop result lost"))),
                false => advanced.push(item),
            }
            continue;
        };
        let from = item.format.clone();
        match result {
            HopOutcome::Converted { path, identification } => {
                let hop = item.route.advance().unwrap_or_else(|| identification.format.clone());
                item.format = hop;
                item.path = path;
                item.hops += 1;
                reconciliation.advanced += 1;
                if item.route.is_empty() {
                    reconciliation.settled.push((item.file, Outcome::Converted));
                } else {
                    advanced.push(item);
                }
            },
            HopOutcome::Failed(FailureReason::NoConverter) if item.hops == 0 => {
                reconciliation.settled.push((item.file, Outcome::NotSupported));
            },
            HopOutcome::Failed(reason) => {
                let to = item.next_hop().cloned().unwrap_or_else(FormatCode::unknown);
                reconciliation.settled.push((item.file, Outcome::failed(format!("{from} -> {to}: {reason}"))));
            },
        }
    }
    for path in outcomes.keys() {
        tracing::error!(path = %path.display(), "Hop result for a file not in the working set");
    }
    for mut item in advanced {
        item.claimed = false;
        if let Err(item) = working.insert(item) {
            tracing::error!(path = %item.path.display(), "Two files converged on the same path");
            reconciliation.settled.push((item.file, Outcome::failed("output path collision")));
        }
    }
    reconciliation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::WorkItem;
    use crate::route::Route;
    use conveyor_convert::MockConverter;
    use conveyor_format::{Identification, MockIdentifier};
    use conveyor_registry::{ArchivalFile, FileRegistry, FormatState};
    use rstest::rstest;
    use std::path::Path;

    fn item(path: &str, format: &str, route: &[&str]) -> WorkItem {
        let route = Route::new(route.iter().map(|h| FormatCode::from(*h))).unwrap();
        let target = route.target().cloned().unwrap();
        WorkItem::new(FileId::new(), PathBuf::from(path), format.into(), target, route).unwrap()
    }

    fn converted(path: &str, format: &str) -> HopOutcome {
        let identification = Identification { format: format.into(), name: String::new(), mime: None, size: 1, hash: None };
        HopOutcome::Converted { path: PathBuf::from(path), identification }
    }

    #[test]
    fn test_reconcile_advances_and_rekeys() {
        let mut working = WorkingSet::default();
        working.insert(item("a.doc", "docA", &["pdfBridge", "docB"])).unwrap();
        let file = working.get(Path::new("a.doc")).unwrap().file;
        working.get_mut(Path::new("a.doc")).unwrap().claimed = true;

        let rec = reconcile(&mut working, vec![(PathBuf::from("a.doc"), converted("a.pdf", "pdfBridge"))]);
        assert_eq!(rec.advanced, 1);
        assert!(rec.settled.is_empty());
        let item = working.get(Path::new("a.pdf")).unwrap();
        assert_eq!(item.format.as_str(), "pdfBridge");
        assert_eq!(item.route, Route::direct("docB".into()));
        assert!(!item.claimed);

        working.get_mut(Path::new("a.pdf")).unwrap().claimed = true;
        let rec = reconcile(&mut working, vec![(PathBuf::from("a.pdf"), converted("a.docb", "docB"))]);
        assert_eq!(rec.settled, vec![(file, Outcome::Converted)]);
        assert!(working.is_empty());
    }

    #[test]
    fn test_reconcile_failures() {
        let mut working = WorkingSet::default();
        working.insert(item("first", "Z", &["docB"])).unwrap();
        let mut later = item("later", "pdfBridge", &["docB"]);
        later.hops = 1;
        working.insert(later).unwrap();
        working.insert(item("broken", "docA", &["docB"])).unwrap();
        working.insert(item("lost", "docA", &["docB"])).unwrap();
        for item in working.iter_mut() {
            item.claimed = true;
        }

        let rec = reconcile(
            &mut working,
            vec![
                (PathBuf::from("first"), HopOutcome::Failed(FailureReason::NoConverter)),
                (PathBuf::from("later"), HopOutcome::Failed(FailureReason::NoConverter)),
                (PathBuf::from("broken"), HopOutcome::Failed(FailureReason::TimedOut)),
            ],
        );
        assert!(working.is_empty());
        let buckets: Vec<_> = rec.settled.iter().map(|(_, o)| o.bucket()).collect();
        assert_eq!(buckets.iter().filter(|b| **b == conveyor_registry::Bucket::NotSupported).count(), 1);
        assert_eq!(buckets.iter().filter(|b| **b == conveyor_registry::Bucket::Failed).count(), 3);
    }

    struct Batch {
        dir: tempfile::TempDir,
        working: WorkingSet,
        ctx: HopContext,
    }

    /// `count` files in `docA`, each routed straight to `docB`.
    fn batch(count: usize, identifier: MockIdentifier, hop_timeout: Duration) -> Batch {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(FileRegistry::default());
        let mut working = WorkingSet::default();
        for i in 0..count {
            let path = dir.path().join(format!("{i}.doc"));
            std::fs::write(&path, "docA\n").unwrap();
            let state = FormatState { format: "docA".into(), name: String::new(), size: 1, checksum: None };
            let file = registry.register(ArchivalFile::new(&path, state));
            let route = Route::direct("docB".into());
            working.insert(WorkItem::new(file, path, "docA".into(), "docB".into(), route).unwrap()).unwrap();
        }
        let ctx = HopContext::new(Arc::new(identifier), registry, 1, hop_timeout);
        Batch { dir, working, ctx }
    }

    async fn drain(round: &mut Round) {
        while round.step(Duration::from_millis(5)).await != Step::Drained {}
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_round_respects_pool_size() {
        let mut b = batch(8, MockIdentifier::default(), Duration::from_secs(10));
        let converter = Arc::new(MockConverter::new("X").with("docA", ["docB"]).delay(Duration::from_millis(20)));
        let converters = ConverterSet::new().with(converter.clone());
        let permits = Arc::new(Semaphore::new(2));

        let mut round = Round::dispatch(&mut b.working, &converters, &b.ctx, &permits);
        assert_eq!(round.total(), 8);
        drain(&mut round).await;
        let results = round.into_results();
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|(_, outcome)| outcome.is_converted()));
        assert_eq!(converter.calls(), 8);
        assert!(converter.max_in_flight() <= 2);
    }

    #[rstest]
    #[case(1)]
    #[case(4)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_serialized_engine_converts_at_any_pool_size(#[case] pool: usize) {
        // Six calls of 60ms queue far longer than a single hop may take.
        let mut b = batch(6, MockIdentifier::default(), Duration::from_millis(200));
        let converter =
            Arc::new(MockConverter::new("X").with("docA", ["docB"]).delay(Duration::from_millis(60)).serialized());
        let converters = ConverterSet::new().with(converter.clone());
        let permits = Arc::new(Semaphore::new(pool));

        let mut round = Round::dispatch(&mut b.working, &converters, &b.ctx, &permits);
        drain(&mut round).await;
        let results = round.into_results();
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|(_, outcome)| outcome.is_converted()), "{results:?}");
        assert_eq!(converter.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_hop_timeout() {
        let mut b = batch(1, MockIdentifier::default(), Duration::from_millis(20));
        let path = b.dir.path().join("0.doc");
        let converters = ConverterSet::new()
            .with(Arc::new(MockConverter::new("X").with("docA", ["docB"]).delay(Duration::from_secs(30))));

        let permits = Arc::new(Semaphore::new(1));
        let mut round = Round::dispatch(&mut b.working, &converters, &b.ctx, &permits);
        drain(&mut round).await;
        assert_eq!(round.into_results(), vec![(path.clone(), HopOutcome::Failed(FailureReason::TimedOut))]);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_abort() {
        let mut b = batch(1, MockIdentifier::default(), Duration::from_secs(60));
        let path = b.dir.path().join("0.doc");
        let converters = ConverterSet::new()
            .with(Arc::new(MockConverter::new("X").with("docA", ["docB"]).delay(Duration::from_secs(30))));

        let permits = Arc::new(Semaphore::new(1));
        let mut round = Round::dispatch(&mut b.working, &converters, &b.ctx, &permits);
        assert!(matches!(round.step(Duration::from_millis(10)).await, Step::Waiting { done: 0, total: 1 }));
        round.abort().await;
        assert_eq!(round.into_results(), vec![(path, HopOutcome::Failed(FailureReason::Interrupted))]);
    }

    #[tokio::test]
    async fn test_abort_keeps_finished_hops() {
        let mut b = batch(1, MockIdentifier::default(), Duration::from_secs(60));
        let slow = b.dir.path().join("slow.doe");
        std::fs::write(&slow, "docE\n").unwrap();
        let state = FormatState { format: "docE".into(), name: String::new(), size: 1, checksum: None };
        let file = b.ctx.registry.register(ArchivalFile::new(&slow, state));
        let route = Route::direct("docB".into());
        b.working.insert(WorkItem::new(file, slow.clone(), "docE".into(), "docB".into(), route).unwrap()).unwrap();
        let converters = ConverterSet::new()
            .with(Arc::new(MockConverter::new("X").with("docA", ["docB"])))
            .with(Arc::new(MockConverter::new("W").with("docE", ["docB"]).delay(Duration::from_secs(30))));

        let permits = Arc::new(Semaphore::new(2));
        let mut round = Round::dispatch(&mut b.working, &converters, &b.ctx, &permits);
        assert!(matches!(round.step(Duration::from_secs(5)).await, Step::Completed { done: 1, total: 2 }));
        round.abort().await;

        let results: BTreeMap<_, _> = round.into_results().into_iter().collect();
        let converted = b.dir.path().join("0.docb");
        assert!(matches!(&results[&b.dir.path().join("0.doc")], HopOutcome::Converted { path, .. } if *path == converted));
        assert_eq!(results[&slow], HopOutcome::Failed(FailureReason::Interrupted));
        assert!(converted.exists());
        assert!(slow.exists());
        let record = b.ctx.registry.find_by_path(&converted).unwrap();
        assert_eq!(record.tools, vec!["X"]);
    }

    #[tokio::test]
    async fn test_identification_outage_stops_round() {
        let mut b = batch(5, MockIdentifier::unavailable(), Duration::from_secs(10));
        let converter = Arc::new(MockConverter::new("X").with("docA", ["docB"]));
        let converters = ConverterSet::new().with(converter.clone());
        let permits = Arc::new(Semaphore::new(1));

        let mut round = Round::dispatch(&mut b.working, &converters, &b.ctx, &permits);
        let step = loop {
            match round.step(Duration::from_millis(50)).await {
                Step::Waiting { .. } | Step::Completed { .. } => continue,
                step => break step,
            }
        };
        assert!(matches!(step, Step::Unavailable(_)));
        round.abort().await;
        assert_eq!(converter.calls(), 1);
        let results = round.into_results();
        assert_eq!(results.len(), 5);
        let interrupted = results.iter().filter(|(_, o)| *o == HopOutcome::Failed(FailureReason::Interrupted)).count();
        assert_eq!(interrupted, 4);
    }
}
