//! In-process converters and combiners for testing.
//!
//! Outputs are text files whose first line is the produced format code, which
//! is exactly what [`MockIdentifier`](conveyor_format::MockIdentifier) reads.

use crate::error::{ErrorKind, Result};
use crate::{CapabilityMap, Combiner, Converter};
use async_trait::async_trait;
use conveyor_format::FormatCode;
use exn::ResultExt;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default)]
enum Behaviour {
    #[default]
    Honest,
    /// Every invocation fails.
    Failing,
    /// The first `n` invocations fail.
    Flaky(usize),
    /// Writes this code instead of the requested one.
    Mislabelled(FormatCode),
    /// Exits fine without writing anything.
    Silent,
}

/// Decrements the in-flight counter even if the future is dropped.
struct InFlight<'a>(&'a AtomicUsize);
impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A converter that "converts" by writing the target code into the output.
pub struct MockConverter {
    name: String,
    capabilities: CapabilityMap,
    behaviour: Behaviour,
    delay: Option<Duration>,
    serial: Option<Mutex<()>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}
impl MockConverter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: CapabilityMap::new(),
            behaviour: Behaviour::default(),
            delay: None,
            serial: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, from: impl Into<FormatCode>, targets: impl IntoIterator<Item = impl Into<FormatCode>>) -> Self {
        self.capabilities = self.capabilities.with(from, targets);
        self
    }

    pub fn failing(mut self) -> Self {
        self.behaviour = Behaviour::Failing;
        self
    }

    pub fn flaky(mut self, failures: usize) -> Self {
        self.behaviour = Behaviour::Flaky(failures);
        self
    }

    pub fn mislabelled(mut self, produces: impl Into<FormatCode>) -> Self {
        self.behaviour = Behaviour::Mislabelled(produces.into());
        self
    }

    pub fn silent(mut self) -> Self {
        self.behaviour = Behaviour::Silent;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Runs one invocation at a time, like an engine with shared state.
    pub fn serialized(mut self) -> Self {
        self.serial = Some(Mutex::new(()));
        self
    }

    /// Number of `execute` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous `execute` invocations observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Converter for MockConverter {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> &CapabilityMap {
        &self.capabilities
    }

    fn serial(&self) -> Option<&Mutex<()>> {
        self.serial.as_ref()
    }

    async fn execute(&self, _input: &Path, output: &Path, from: &FormatCode, to: &FormatCode) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if !self.supports(from, to) {
            exn::bail!(ErrorKind::Unsupported { from: from.clone(), to: to.clone() });
        }
        let produced = match &self.behaviour {
            Behaviour::Failing => exn::bail!(ErrorKind::ToolFailed(1)),
            Behaviour::Flaky(failures) if call <= *failures => exn::bail!(ErrorKind::ToolFailed(1)),
            Behaviour::Silent => return Ok(()),
            Behaviour::Mislabelled(code) => code,
            Behaviour::Honest | Behaviour::Flaky(_) => to,
        };
        tokio::fs::write(output, format!("{produced}\n")).await.or_raise(|| ErrorKind::Io)?;
        Ok(())
    }
}

/// A combiner writing the target code followed by the names of its inputs.
#[derive(Default)]
pub struct MockCombiner {
    name: String,
    accepts: Option<BTreeSet<FormatCode>>,
    failing: bool,
    calls: AtomicUsize,
}
impl MockCombiner {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Restricts the source formats; by default everything is accepted.
    pub fn accepting(mut self, formats: impl IntoIterator<Item = impl Into<FormatCode>>) -> Self {
        self.accepts = Some(formats.into_iter().map(Into::into).collect());
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Combiner for MockCombiner {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_combine(&self, from: &FormatCode, _to: &FormatCode) -> bool {
        self.accepts.as_ref().is_none_or(|formats| formats.contains(from))
    }

    async fn combine(&self, inputs: &[PathBuf], output: &Path, to: &FormatCode) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            exn::bail!(ErrorKind::ToolFailed(1));
        }
        let mut contents = format!("{to}\n");
        for input in inputs {
            contents.push_str(&format!("{}\n", input.display()));
        }
        tokio::fs::write(output, contents).await.or_raise(|| ErrorKind::Io)?;
        Ok(())
    }
}
