use crate::error::{ErrorKind, Result};
use crate::merge::{self, MergeResult};
use crate::plan::{self, Plan};
use crate::policy::Policy;
use crate::route::{RouteOptions, RouteTable};
use crate::schedule::{Round, Step, reconcile};
use crate::verify::verify;
use async_stream::stream;
use conveyor_config::Config;
use conveyor_convert::{ConverterSet, FailureReason, HopContext};
use conveyor_format::IdentifierHandle;
use conveyor_registry::{FileId, FileRegistry, OutcomeSink, Outcome, RegistryHandle, Tally};
use exn::ResultExt;
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use time::UtcDateTime;
use tokio::sync::Semaphore;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Stops a run early.
///
/// Cloning shares the flag, so a signal handler can hold one copy while the
/// run holds another.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);
impl Interrupt {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Hops running at the same time.
    pub max_concurrency: usize,
    /// Attempts a converter gets at one hop.
    pub max_attempts: u32,
    pub hop_timeout: Duration,
    /// How often a round reports progress while waiting.
    pub progress_interval: Duration,
}
impl From<&Config> for RunOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            max_attempts: config.max_attempts,
            hop_timeout: config.hop_timeout(),
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

/// Everything a run needs, built once and shared by reference.
pub struct Context {
    pub registry: RegistryHandle,
    pub identifier: IdentifierHandle,
    pub converters: ConverterSet,
    pub routes: RouteTable,
    pub policy: Policy,
    pub options: RunOptions,
    pub interrupt: Interrupt,
}
impl Context {
    /// # Errors
    /// Fails when `converters` is empty: nothing could ever be converted.
    pub fn new(
        registry: RegistryHandle,
        identifier: IdentifierHandle,
        converters: ConverterSet,
        routes: RouteTable,
        policy: Policy,
        options: RunOptions,
    ) -> Result<Self> {
        if converters.is_empty() {
            exn::bail!(ErrorKind::NoConverters);
        }
        Ok(Self { registry, identifier, converters, routes, policy, options, interrupt: Interrupt::default() })
    }

    /// Builds the route table from `converters` and the policy for the tree
    /// rooted at `root`.
    pub fn from_config(
        config: &Config,
        root: &Path,
        registry: RegistryHandle,
        identifier: IdentifierHandle,
        converters: ConverterSet,
    ) -> Result<Self> {
        if converters.is_empty() {
            exn::bail!(ErrorKind::NoConverters);
        }
        let routes = RouteTable::build(&converters.capabilities(), &RouteOptions::from(config))?;
        let policy = Policy::from_config(root, config);
        Self::new(registry, identifier, converters, routes, policy, RunOptions::from(config))
    }

    fn hop_context(&self) -> HopContext {
        HopContext::new(
            Arc::clone(&self.identifier),
            Arc::clone(&self.registry),
            self.options.max_attempts,
            self.options.hop_timeout,
        )
    }
}

/// Final counts of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub started: UtcDateTime,
    pub finished: UtcDateTime,
    pub rounds: usize,
    pub interrupted: bool,
    pub tally: Tally,
}
impl Summary {
    pub fn elapsed(&self) -> time::Duration {
        self.finished - self.started
    }
}

/// Progress events emitted by [`run`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) and [`Planned`](Self::Planned), once each.
/// 2. [`MergeFlushed`](Self::MergeFlushed), once per merge group.
/// 3. For every round: [`RoundStarted`](Self::RoundStarted), any number of
///    [`Progress`](Self::Progress), then [`RoundComplete`](Self::RoundComplete).
/// 4. [`Verified`](Self::Verified) and [`Complete`](Self::Complete), once each.
///
/// A fatal error ends the stream early with an `Err` item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Started { files: usize },
    Planned { working: usize, merge_groups: usize, settled: usize },
    MergeFlushed { directory: PathBuf, files: usize, merged: Option<PathBuf> },
    RoundStarted { round: usize, items: usize },
    Progress { round: usize, done: usize, total: usize },
    /// `completed` files reached their target, `failed` ones left the
    /// working set without doing so.
    RoundComplete { round: usize, advanced: usize, completed: usize, failed: usize },
    Verified { checked: usize, reclassified: usize },
    Complete(Summary),
}

/// Drives every registered file to a terminal outcome.
///
/// Files are planned, merge groups flushed, then the working set is advanced
/// one hop per round until it is empty. Once the rounds are over every file
/// is re-identified and handed to `sink`.
///
/// Triggering [`Context::interrupt`] aborts the hops in flight and fails
/// everything unfinished; verification still runs over what completed.
///
/// An unavailable identification service is fatal: the round in flight is
/// stopped and reconciled, then the stream ends with an error.
pub fn run<'a>(ctx: &'a Context, sink: &'a dyn OutcomeSink) -> impl Stream<Item = Result<RunEvent>> + 'a {
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    stream!({
        let started = UtcDateTime::now();
        let registry = ctx.registry.as_ref();
        yield Ok(RunEvent::Started { files: registry.len() });

        let plan = plan::plan(&registry.snapshot(), &ctx.routes, &ctx.policy);
        if let Err(e) = record_plan(registry, &plan) {
            yield Err(e);
            return;
        }
        yield Ok(RunEvent::Planned {
            working: plan.working.len(),
            merge_groups: plan.merges.len(),
            settled: plan.settled.len(),
        });
        let Plan { mut working, merges, .. } = plan;
        let hop_ctx = ctx.hop_context();

        for group in merges.into_values() {
            let files = group.members.len();
            let result = match ctx.interrupt.is_triggered() {
                true => MergeResult {
                    directory: group.directory.clone(),
                    merged: None,
                    outcome: Outcome::failed(FailureReason::Interrupted),
                    members: group.members.iter().map(|m| m.file).collect(),
                },
                false => match merge::flush(group, &ctx.converters, &hop_ctx).await {
                    Ok(result) => result,
                    Err(e) => {
                        yield Err(e);
                        return;
                    },
                },
            };
            if let Err(e) = settle_all(registry, result.members.iter().map(|&file| (file, result.outcome.clone()))) {
                yield Err(e);
                return;
            }
            yield Ok(RunEvent::MergeFlushed { directory: result.directory, files, merged: result.merged });
        }

        let permits = Arc::new(Semaphore::new(ctx.options.max_concurrency.max(1)));
        let mut rounds = 0;
        while !working.is_empty() {
            if ctx.interrupt.is_triggered() {
                tracing::warn!(items = working.len(), "Run interrupted");
                let unfinished = working.drain().map(|item| (item.file, Outcome::failed(FailureReason::Interrupted)));
                if let Err(e) = settle_all(registry, unfinished) {
                    yield Err(e);
                    return;
                }
                break;
            }
            rounds += 1;
            tracing::info!(round = rounds, items = working.len(), "Round started");
            yield Ok(RunEvent::RoundStarted { round: rounds, items: working.len() });

            let mut round = Round::dispatch(&mut working, &ctx.converters, &hop_ctx, &permits);
            let mut outage = false;
            loop {
                if ctx.interrupt.is_triggered() {
                    round.abort().await;
                    break;
                }
                match round.step(ctx.options.progress_interval).await {
                    Step::Drained => break,
                    Step::Waiting { done, total } => {
                        yield Ok(RunEvent::Progress { round: rounds, done, total });
                    },
                    Step::Completed { .. } => {},
                    Step::Unavailable(_) => {
                        round.abort().await;
                        outage = true;
                        break;
                    },
                }
            }

            let reconciliation = reconcile(&mut working, round.into_results());
            let advanced = reconciliation.advanced;
            let completed = reconciliation.settled.iter().filter(|(_, outcome)| *outcome == Outcome::Converted).count();
            let failed = reconciliation.settled.len() - completed;
            if let Err(e) = settle_all(registry, reconciliation.settled) {
                yield Err(e);
                return;
            }
            tracing::info!(round = rounds, advanced, completed, failed, "Round complete");
            yield Ok(RunEvent::RoundComplete { round: rounds, advanced, completed, failed });
            if outage {
                tracing::error!(round = rounds, items = working.len(), "Run stopped, identification service unavailable");
                yield Err(exn::Exn::from(ErrorKind::IdentificationUnavailable));
                return;
            }
        }

        let verification = match verify(registry, ctx.identifier.as_ref(), ctx.options.max_concurrency).await {
            Ok(verification) => verification,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        yield Ok(RunEvent::Verified { checked: verification.checked, reclassified: verification.reclassified });

        for file in registry.snapshot() {
            sink.record(&file);
        }
        let summary = Summary {
            started,
            finished: UtcDateTime::now(),
            rounds,
            interrupted: ctx.interrupt.is_triggered(),
            tally: registry.tally(),
        };
        tracing::info!(rounds, files = summary.tally.total(), interrupted = summary.interrupted, "Run complete");
        yield Ok(RunEvent::Complete(summary));
    })
}

/// Consumes [`run`], returning its summary.
pub async fn run_to_end(ctx: &Context, sink: &dyn OutcomeSink) -> Result<Summary> {
    let mut events = std::pin::pin!(run(ctx, sink));
    while let Some(event) = events.next().await {
        if let RunEvent::Complete(summary) = event? {
            return Ok(summary);
        }
    }
    exn::bail!(ErrorKind::Incomplete)
}

fn record_plan(registry: &FileRegistry, plan: &Plan) -> Result<()> {
    for item in plan.working.iter() {
        registry.set_target(item.file, Some(item.target.clone())).or_raise(|| ErrorKind::Registry)?;
    }
    for group in plan.merges.values() {
        for member in &group.members {
            registry.set_target(member.file, Some(group.target.clone())).or_raise(|| ErrorKind::Registry)?;
        }
    }
    for settled in &plan.settled {
        registry.set_target(settled.file, settled.target.clone()).or_raise(|| ErrorKind::Registry)?;
    }
    settle_all(registry, plan.settled.iter().map(|s| (s.file, s.outcome.clone())))
}

fn settle_all(registry: &FileRegistry, outcomes: impl IntoIterator<Item = (FileId, Outcome)>) -> Result<()> {
    for (file, outcome) in outcomes {
        registry.settle(file, outcome).or_raise(|| ErrorKind::Registry)?;
    }
    Ok(())
}
