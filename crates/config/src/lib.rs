//! Configuration loading and validation.
//!
//! Settings are layered with [`figment`], later layers winning:
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. A configuration file: TOML, YAML or JSON, chosen by extension. Either
//!    passed explicitly, or `conveyor.toml` in the platform config directory
//!    (see [`Config::default_path`]) when it exists.
//! 3. Environment variables prefixed with `CONVEYOR_`; nested keys are
//!    separated by a double underscore (`CONVEYOR_ENGINES__GHOSTSCRIPT__ENABLED=false`).

pub mod error;
mod settings;

pub use crate::settings::{Engine, Engines, FolderOverride, RouteOverride};
use crate::error::{ErrorKind, Result};
use conveyor_format::{FormatCode, catalogue};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "CONVEYOR_";
const FILE_NAME: &str = "conveyor.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the files to convert.
    pub input: Option<PathBuf>,
    /// Directory the converted tree is written to. Conversion happens in
    /// place when this is the same as `input`.
    pub output: Option<PathBuf>,
    /// Size of the worker pool dispatching conversions.
    pub max_concurrency: usize,
    /// Attempts a converter gets at a single hop before giving up.
    pub max_attempts: u32,
    /// Upper bound for one dispatched hop, all attempts included.
    pub hop_timeout_secs: u64,
    /// Upper bound for a single engine process.
    pub process_timeout_secs: u64,
    /// Longest route the planner will discover on its own.
    pub max_route_hops: usize,
    /// Intermediate formats preferred when several routes are equally short.
    pub bridges: Vec<FormatCode>,
    /// Global source format to target format mapping.
    pub targets: BTreeMap<FormatCode, FormatCode>,
    pub overrides: Vec<FolderOverride>,
    pub routes: Vec<RouteOverride>,
    pub engines: Engines,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            max_concurrency: std::thread::available_parallelism().map_or(2, |n| n.get().saturating_mul(2)),
            max_attempts: 3,
            hop_timeout_secs: 900,
            process_timeout_secs: 300,
            max_route_hops: 3,
            bridges: vec![FormatCode::from(catalogue::PDF_1_7)],
            targets: BTreeMap::new(),
            overrides: Vec::new(),
            routes: Vec::new(),
            engines: Engines::default(),
        }
    }
}
impl Config {
    /// Loads and validates the configuration.
    ///
    /// An explicit `path` must exist. Without one, the platform default
    /// location is used when a file is present there.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.exists() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = &file {
            tracing::debug!(path = %file.display(), "Loading configuration file");
            figment = Self::merge_file(figment, file)?;
        }
        let config: Self =
            figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// `conveyor.toml` inside the platform configuration directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "conveyor").map(|dirs| dirs.config_dir().join(FILE_NAME))
    }

    fn merge_file(figment: Figment, file: &Path) -> Result<Figment> {
        let extension = file.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        Ok(match extension.as_deref() {
            Some("toml") => figment.merge(Toml::file(file)),
            Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
            Some("json") => figment.merge(Json::file(file)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(file.to_path_buf())),
        })
    }

    /// Checks the values that parse fine but can't drive a run.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| -> Result<()> { exn::bail!(ErrorKind::Invalid(reason)) };
        if self.max_concurrency == 0 {
            invalid("max_concurrency must be at least 1".to_string())?;
        }
        if self.max_attempts == 0 {
            invalid("max_attempts must be at least 1".to_string())?;
        }
        if self.hop_timeout_secs == 0 || self.process_timeout_secs == 0 {
            invalid("timeouts must be greater than zero".to_string())?;
        }
        if self.max_route_hops == 0 {
            invalid("max_route_hops must be at least 1".to_string())?;
        }
        for o in &self.overrides {
            let escapes = o.folder.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if o.folder.as_os_str().is_empty() || escapes {
                invalid(format!("override folder `{}` must be relative to the output root", o.folder.display()))?;
            }
        }
        for r in &self.routes {
            if r.from == r.to {
                invalid(format!("route from `{}` to itself", r.from))?;
            }
            if r.via.iter().any(|hop| hop == &r.from || hop == &r.to) {
                invalid(format!("route `{}` -> `{}` passes through one of its own ends", r.from, r.to))?;
            }
        }
        Ok(())
    }

    pub fn hop_timeout(&self) -> Duration {
        Duration::from_secs(self.hop_timeout_secs)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    /// Globally configured target for files currently in `format`.
    pub fn target_for(&self, format: &FormatCode) -> Option<&FormatCode> {
        self.targets.get(format)
    }
}
