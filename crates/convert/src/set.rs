use crate::engine::{Ghostscript, ImageMagick, LibreOffice};
use crate::error::Result;
use crate::{CapabilityMap, CombinerHandle, ConverterHandle, Os};
use conveyor_config::{Config, Engine};
use conveyor_format::FormatCode;
use std::path::Path;
use std::sync::Arc;

/// Registered converters in priority order, plus the combiners available for
/// merge groups.
///
/// Lookups always walk the converters in registration order and return the
/// first match, so a batch dispatches the same engine for the same pair no
/// matter how it is scheduled.
#[derive(Clone, Default)]
pub struct ConverterSet {
    converters: Vec<ConverterHandle>,
    combiners: Vec<CombinerHandle>,
}
impl ConverterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the bundled engines that are enabled, installed and able
    /// to run on this system. Missing engines are skipped with a warning.
    pub fn discover(config: &Config) -> Self {
        let timeout = config.process_timeout();
        let mut set = Self::new();
        if let Some(engine) = Self::try_engine("LibreOffice", &config.engines.libreoffice, |path| {
            LibreOffice::discover(path, timeout)
        }) {
            set.register(Arc::new(engine));
        }
        if let Some(engine) =
            Self::try_engine("Ghostscript", &config.engines.ghostscript, |path| Ghostscript::discover(path, timeout))
        {
            let engine = Arc::new(engine);
            set.register(engine.clone());
            set.register_combiner(engine);
        }
        if let Some(engine) =
            Self::try_engine("ImageMagick", &config.engines.imagemagick, |path| ImageMagick::discover(path, timeout))
        {
            let engine = Arc::new(engine);
            set.register(engine.clone());
            set.register_combiner(engine);
        }
        set
    }

    fn try_engine<T>(name: &str, settings: &Engine, discover: impl FnOnce(Option<&Path>) -> Result<T>) -> Option<T> {
        if !settings.enabled {
            tracing::info!(engine = name, "Engine disabled in configuration");
            return None;
        }
        match discover(settings.executable.as_deref()) {
            Ok(engine) => Some(engine),
            Err(e) => {
                tracing::warn!(engine = name, error = ?e, "Engine unavailable; skipping");
                None
            },
        }
    }

    /// Appends a converter at the lowest priority.
    ///
    /// Converters that declare they cannot run on this system are ignored.
    pub fn register(&mut self, converter: ConverterHandle) {
        if let Some(os) = Os::current()
            && !converter.runs_on(os)
        {
            tracing::warn!(converter = converter.name(), %os, "Converter does not run on this system; skipping");
            return;
        }
        tracing::debug!(converter = converter.name(), version = converter.version(), "Converter registered");
        self.converters.push(converter);
    }

    pub fn with(mut self, converter: ConverterHandle) -> Self {
        self.register(converter);
        self
    }

    pub fn register_combiner(&mut self, combiner: CombinerHandle) {
        self.combiners.push(combiner);
    }

    pub fn with_combiner(mut self, combiner: CombinerHandle) -> Self {
        self.register_combiner(combiner);
        self
    }

    /// The highest priority converter declaring `(from, to)`.
    pub fn first_supporting(&self, from: &FormatCode, to: &FormatCode) -> Option<&ConverterHandle> {
        self.converters.iter().find(|c| c.supports(from, to))
    }

    /// The first combiner able to take every one of `formats` into `to`.
    pub fn combiner_for<'a>(
        &self,
        formats: impl Iterator<Item = &'a FormatCode> + Clone,
        to: &FormatCode,
    ) -> Option<&CombinerHandle> {
        formats.clone().next()?;
        self.combiners.iter().find(|c| formats.clone().all(|from| c.can_combine(from, to)))
    }

    /// Union of every registered converter's capabilities.
    pub fn capabilities(&self) -> CapabilityMap {
        let mut union = CapabilityMap::new();
        for converter in &self.converters {
            union.extend(converter.capabilities());
        }
        union
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConverterHandle> {
        self.converters.iter()
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockCombiner, MockConverter};

    #[test]
    fn test_priority_order() {
        let set = ConverterSet::new()
            .with(Arc::new(MockConverter::new("X").with("a", ["b"])))
            .with(Arc::new(MockConverter::new("Y").with("a", ["b", "c"])));
        assert_eq!(set.first_supporting(&"a".into(), &"b".into()).map(|c| c.name()), Some("X"));
        assert_eq!(set.first_supporting(&"a".into(), &"c".into()).map(|c| c.name()), Some("Y"));
        assert!(set.first_supporting(&"b".into(), &"a".into()).is_none());
        assert_eq!(set.capabilities().len(), 2);
    }

    #[test]
    fn test_combiner_for() {
        let set = ConverterSet::new()
            .with_combiner(Arc::new(MockCombiner::new("images").accepting(["jpg", "png"])))
            .with_combiner(Arc::new(MockCombiner::new("anything")));
        let jpg = FormatCode::from("jpg");
        let png = FormatCode::from("png");
        let pdf = FormatCode::from("pdf");
        let target = FormatCode::from("fmt/477");
        let picked = set.combiner_for([&jpg, &png].into_iter(), &target).map(|c| c.name());
        assert_eq!(picked, Some("images"));
        let picked = set.combiner_for([&jpg, &pdf].into_iter(), &target).map(|c| c.name());
        assert_eq!(picked, Some("anything"));
        assert!(set.combiner_for(std::iter::empty(), &target).is_none());
    }

    #[test]
    fn test_discover_respects_disabled_engines() {
        let mut config = Config::default();
        config.engines.libreoffice.enabled = false;
        config.engines.ghostscript.enabled = false;
        config.engines.imagemagick.enabled = false;
        assert!(ConverterSet::discover(&config).is_empty());
    }
}
