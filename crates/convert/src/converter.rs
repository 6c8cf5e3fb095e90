use crate::CapabilityMap;
use crate::error::Result;
use crate::output;
use crate::status::{Status, check_status};
use async_trait::async_trait;
use conveyor_format::{FormatCode, Identification, IdentifierHandle};
use conveyor_registry::{FileId, RegistryHandle};
use derive_more::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::instrument;

/// Operating systems an engine can be installed on.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    Windows,
    #[display("macOS")]
    MacOs,
}
impl Os {
    pub const ALL: &[Os] = &[Os::Linux, Os::Windows, Os::MacOs];

    /// The system this binary was built for, if it is one we know.
    pub fn current() -> Option<Self> {
        if cfg!(target_os = "linux") {
            Some(Self::Linux)
        } else if cfg!(target_os = "windows") {
            Some(Self::Windows)
        } else if cfg!(target_os = "macos") {
            Some(Self::MacOs)
        } else {
            None
        }
    }
}

/// One step of a route: take the file at `source`, currently in `from`, and
/// produce `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub file: FileId,
    pub source: PathBuf,
    pub from: FormatCode,
    pub to: FormatCode,
}

/// Shared services a hop needs besides the converter itself.
#[derive(Clone)]
pub struct HopContext {
    pub identifier: IdentifierHandle,
    pub registry: RegistryHandle,
    /// Engine invocations allowed per hop, verification included.
    pub max_attempts: u32,
    /// Time the attempts of one hop may take, counted from the moment the
    /// engine is free to run.
    pub hop_timeout: Duration,
    pub cancellation: Cancellation,
}
impl HopContext {
    pub fn new(identifier: IdentifierHandle, registry: RegistryHandle, max_attempts: u32, hop_timeout: Duration) -> Self {
        Self { identifier, registry, max_attempts, hop_timeout, cancellation: Cancellation::default() }
    }

    /// The same services under a different cancellation.
    pub fn with_cancellation(&self, cancellation: Cancellation) -> Self {
        Self { cancellation, ..self.clone() }
    }
}

/// Tells hops in flight to stop.
///
/// A cancelled hop stops waiting for its engine, kills it, and reports
/// [`FailureReason::Interrupted`]. A hop whose output is already verified is
/// still placed and recorded.
#[derive(Debug, Clone)]
pub struct Cancellation(Arc<watch::Sender<bool>>);
impl Default for Cancellation {
    fn default() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }
}
impl Cancellation {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut receiver = self.0.subscribe();
        // The sender outlives the receiver, so this only returns once cancelled.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

/// Why a hop did not produce its target format.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No registered converter declares the pair.
    #[display("no converter supports this conversion")]
    NoConverter,
    /// The chosen converter was asked for a pair it does not declare.
    #[display("converter does not support this conversion")]
    Unsupported,
    #[display("engine failed: {_0}")]
    Engine(String),
    /// The produced file could not be classified.
    #[display("output could not be identified")]
    Unidentified,
    #[display("expected {expected}, produced {actual}")]
    WrongFormat { expected: FormatCode, actual: FormatCode },
    /// The identification service itself failed while verifying.
    #[display("identification failed: {_0}")]
    Identification(String),
    #[display("timed out")]
    TimedOut,
    #[display("interrupted")]
    Interrupted,
    #[display("worker panicked")]
    Panicked,
    /// The converted file could not be moved into place.
    #[display("could not place output: {_0}")]
    Output(String),
}

/// Result of a single hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HopOutcome {
    /// The file now lives at `path` and was verified to be in the hop's
    /// target format.
    Converted { path: PathBuf, identification: Identification },
    Failed(FailureReason),
}
impl HopOutcome {
    pub fn is_converted(&self) -> bool {
        matches!(self, Self::Converted { .. })
    }
}

/// A conversion engine.
///
/// Implementors declare what they can do through a [`CapabilityMap`] and
/// perform a single engine invocation in [`Converter::execute`]. Everything
/// around it (bounded retries, output verification, naming, and registry
/// updates) is provided by [`Converter::convert`], which should rarely need
/// overriding.
// TODO: When `dyn async trait` stabilizes, migrate to native 2024 Edition async traits.
#[async_trait]
pub trait Converter: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn operating_systems(&self) -> &[Os] {
        Os::ALL
    }

    fn capabilities(&self) -> &CapabilityMap;

    fn supports(&self, from: &FormatCode, to: &FormatCode) -> bool {
        self.capabilities().supports(from, to)
    }

    fn runs_on(&self, os: Os) -> bool {
        self.operating_systems().contains(&os)
    }

    /// A lock held around every invocation, for engines that cannot run
    /// twice at once. Waiting for it does not count against the hop timeout.
    fn serial(&self) -> Option<&Mutex<()>> {
        None
    }

    /// Runs the engine once, writing the result to exactly `output`.
    ///
    /// Only faults are errors. Whether `output` really is in format `to` is
    /// checked by the caller.
    async fn execute(&self, input: &Path, output: &Path, from: &FormatCode, to: &FormatCode) -> Result<()>;

    /// Performs one hop, never failing past this boundary.
    async fn convert(&self, hop: &Hop, ctx: &HopContext) -> HopOutcome {
        convert_hop(self, hop, ctx).await
    }
}

/// Attempts `hop` up to `ctx.max_attempts` times, verifying each attempt's
/// output with the identification service before the source is replaced.
///
/// Only the attempts are subject to `ctx.hop_timeout` and cancellation. Once
/// an output is verified, placing it and updating the registry always runs
/// to completion.
#[instrument(skip_all, fields(converter = converter.name(), path = %hop.source.display(), from = %hop.from, to = %hop.to))]
pub async fn convert_hop<C: Converter + ?Sized>(converter: &C, hop: &Hop, ctx: &HopContext) -> HopOutcome {
    if !converter.supports(&hop.from, &hop.to) {
        return HopOutcome::Failed(FailureReason::Unsupported);
    }
    let staging = output::staging_path(&hop.source, hop.file, &hop.to);
    let attempts = async {
        let _serial = match converter.serial() {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        let deadline = Instant::now() + ctx.hop_timeout;
        match tokio::time::timeout_at(deadline, attempt(converter, hop, ctx, &staging)).await {
            Ok(verified) => verified,
            Err(_) => {
                tracing::warn!(timeout = ?ctx.hop_timeout, "Hop timed out");
                Err(FailureReason::TimedOut)
            },
        }
    };
    let verified = tokio::select! {
        biased;
        () = ctx.cancellation.cancelled() => Err(FailureReason::Interrupted),
        verified = attempts => verified,
    };
    match verified {
        Ok(identification) => finalize(converter.name(), hop, ctx, &staging, identification).await,
        Err(reason) => {
            output::discard(&staging).await;
            HopOutcome::Failed(reason)
        },
    }
}

async fn attempt<C: Converter + ?Sized>(
    converter: &C,
    hop: &Hop,
    ctx: &HopContext,
    staging: &Path,
) -> std::result::Result<Identification, FailureReason> {
    let mut reason = FailureReason::Engine("no attempt made".to_string());
    for attempt in 1..=ctx.max_attempts.max(1) {
        if let Err(e) = converter.execute(&hop.source, staging, &hop.from, &hop.to).await {
            tracing::warn!(attempt, error = ?e, "Engine invocation failed");
            output::discard(staging).await;
            reason = FailureReason::Engine((*e).to_string());
            if !e.is_retryable() {
                break;
            }
            continue;
        }
        match check_status(ctx.identifier.as_ref(), staging, &hop.to).await {
            Status::Verified(identification) => return Ok(identification),
            Status::Mismatch(actual) => {
                tracing::warn!(attempt, %actual, "Engine produced the wrong format");
                reason = FailureReason::WrongFormat { expected: hop.to.clone(), actual };
            },
            Status::Unidentified => {
                tracing::warn!(attempt, "Engine output could not be identified");
                reason = FailureReason::Unidentified;
            },
            Status::Unavailable(error) => return Err(FailureReason::Identification(error)),
        }
        output::discard(staging).await;
    }
    Err(reason)
}

async fn finalize(
    converter: &str,
    hop: &Hop,
    ctx: &HopContext,
    staging: &Path,
    identification: Identification,
) -> HopOutcome {
    let path = match output::place(&hop.source, staging, &hop.to).await {
        Ok(path) => path,
        Err(e) => {
            output::discard(staging).await;
            return HopOutcome::Failed(FailureReason::Output((*e).to_string()));
        },
    };
    let recorded = ctx
        .registry
        .replace_path(hop.file, &path)
        .and_then(|()| ctx.registry.append_tool(hop.file, converter))
        .and_then(|()| ctx.registry.record_identification(hop.file, &identification));
    if let Err(e) = recorded {
        // The file on disk is fine; the orchestrator reconciles from the outcome.
        tracing::error!(error = ?e, "Could not record hop in registry");
    }
    tracing::debug!(output = %path.display(), "Hop complete");
    HopOutcome::Converted { path, identification }
}
