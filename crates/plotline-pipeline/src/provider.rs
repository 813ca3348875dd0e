//! Providers and the provider registry.
//!
//! A [`Provider`] is one concrete algorithm for one [`StageKind`]. Providers
//! are collected into a [`ProviderRegistry`] from static registration tables
//! (see [`crate::providers`]); a stage resolves the first available provider
//! from the caller's preference list, falling back to registration order.
//!
//! Stage inputs and outputs travel as a type-erased [`StagePayload`] so the
//! registry can hold providers of every stage behind one trait object.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::error::{PipelineError, ProviderError};
use crate::params::{Limits, ProcessingParams};
use crate::types::{ExportBundle, GrayImage, RgbImage, Shading, VectorDocument};

const TRACING_TARGET: &str = "plotline_pipeline::provider";

/// The pipeline responsibilities, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Preprocess,
    LineExtract,
    Vectorize,
    Optimize,
    Hatch,
    Export,
}

impl StageKind {
    pub const ALL: [Self; 6] = [
        Self::Preprocess,
        Self::LineExtract,
        Self::Vectorize,
        Self::Optimize,
        Self::Hatch,
        Self::Export,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::LineExtract => "line_extract",
            Self::Vectorize => "vectorize",
            Self::Optimize => "optimize",
            Self::Hatch => "hatch",
            Self::Export => "export",
        }
    }

    /// Name of the stage's primary operation, used to key hooks.
    #[must_use]
    pub const fn hook_point(self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::LineExtract => "extract",
            Self::Vectorize => "vectorize",
            Self::Optimize => "optimize",
            Self::Hatch => "hatch",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Data flowing into and out of a stage.
#[derive(Debug, Clone)]
pub enum StagePayload {
    /// Undecoded image bytes, the Preprocess input.
    Encoded(Arc<[u8]>),
    /// Normalized RGB raster, the Preprocess output.
    Raster(RgbImage),
    /// Two-level line raster (255 = line), the LineExtract output.
    LineArt(GrayImage),
    /// Paths, the Vectorize/Optimize/Hatch output.
    Document(VectorDocument),
    /// Tone map plus document, the Hatch input.
    Shading(Shading),
    /// Serialized outputs, the Export output.
    Exported(ExportBundle),
}

/// Generates the consuming `into_*` and borrowing `as_*` accessors, each
/// reporting the actual variant on mismatch.
macro_rules! payload_accessors {
    ($($variant:ident => $into:ident, $as_ref:ident: $ty:ty;)*) => {
        impl StagePayload {
            /// Short name of the variant, for diagnostics.
            #[must_use]
            pub const fn kind_name(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => stringify!($variant),)*
                }
            }

            $(
                #[doc = concat!("Unwrap a `", stringify!($variant), "` payload.")]
                ///
                /// # Errors
                ///
                /// Returns [`ProviderError::UnexpectedPayload`] for any other variant.
                pub fn $into(self) -> Result<$ty, ProviderError> {
                    match self {
                        Self::$variant(value) => Ok(value),
                        other => Err(ProviderError::UnexpectedPayload {
                            expected: stringify!($variant),
                            actual: other.kind_name(),
                        }),
                    }
                }

                #[must_use]
                pub const fn $as_ref(&self) -> Option<&$ty> {
                    match self {
                        Self::$variant(value) => Some(value),
                        _ => None,
                    }
                }
            )*
        }
    };
}

payload_accessors! {
    Encoded => into_encoded, as_encoded: Arc<[u8]>;
    Raster => into_raster, as_raster: RgbImage;
    LineArt => into_line_art, as_line_art: GrayImage;
    Document => into_document, as_document: VectorDocument;
    Shading => into_shading, as_shading: Shading;
    Exported => into_exported, as_exported: ExportBundle;
}

/// Everything a provider may read besides its input.
#[derive(Debug, Clone, Copy)]
pub struct ProviderContext<'a> {
    /// Parameters after `before` hooks had a chance to adjust them.
    pub params: &'a ProcessingParams,
    /// The process-wide device choice. Accelerated providers must use this
    /// rather than probing on their own.
    pub device: Device,
    pub limits: &'a Limits,
}

/// One concrete algorithm implementing one stage.
pub trait Provider: Send + Sync {
    /// Stage this provider implements.
    fn stage(&self) -> StageKind;

    /// Unique name within the stage, matched against preference lists.
    fn name(&self) -> &'static str;

    /// Whether the provider can run in this process (dependency present,
    /// device supported, and so on).
    fn is_available(&self, _device: Device) -> bool {
        true
    }

    /// Transform the stage input into the stage output.
    ///
    /// # Errors
    ///
    /// Any [`ProviderError`]; the stage attaches stage and provider
    /// identity before surfacing it.
    fn execute(
        &self,
        input: StagePayload,
        ctx: &ProviderContext<'_>,
    ) -> Result<StagePayload, ProviderError>;
}

impl fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("stage", &self.stage())
            .field("name", &self.name())
            .finish()
    }
}

/// A static registration table: a function returning one crate's providers.
pub type ProviderTable = fn() -> Vec<Arc<dyn Provider>>;

/// Providers grouped by stage, in registration order.
///
/// Read-only once built; cloning shares the provider objects.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    stages: BTreeMap<StageKind, Vec<Arc<dyn Provider>>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (stage, providers) in &self.stages {
            let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
            map.entry(stage, &names);
        }
        map.finish()
    }
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from registration tables.
    ///
    /// Calling this with the same tables always yields the same registry;
    /// a table listed twice contributes its providers once.
    #[must_use]
    pub fn discover(tables: &[ProviderTable]) -> Self {
        let mut registry = Self::new();
        for table in tables {
            registry.extend(table());
        }
        tracing::debug!(
            target: TRACING_TARGET,
            registry = ?registry,
            "Discovered providers"
        );
        registry
    }

    /// Register one provider. Returns `false` (and keeps the existing one)
    /// if the stage already has a provider with the same name.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> bool {
        let slot = self.stages.entry(provider.stage()).or_default();
        if slot.iter().any(|p| p.name() == provider.name()) {
            return false;
        }
        slot.push(provider);
        true
    }

    /// Register many providers, returning how many were new.
    pub fn extend(&mut self, providers: impl IntoIterator<Item = Arc<dyn Provider>>) -> usize {
        providers
            .into_iter()
            .map(|p| usize::from(self.register(p)))
            .sum()
    }

    /// Providers of `stage` in registration (default) order.
    #[must_use]
    pub fn providers(&self, stage: StageKind) -> &[Arc<dyn Provider>] {
        self.stages.get(&stage).map_or(&[], Vec::as_slice)
    }

    /// Provider names of `stage` in registration order.
    #[must_use]
    pub fn names(&self, stage: StageKind) -> Vec<&'static str> {
        self.providers(stage).iter().map(|p| p.name()).collect()
    }

    /// Total number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick the provider for `stage`.
    ///
    /// Walks `preferences` in order and returns the first registered,
    /// available provider. When the list is empty or exhausted, walks the
    /// registration order instead. List order is the only tie-break.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoProviderAvailable`] when nothing usable
    /// is registered for the stage.
    pub fn resolve(
        &self,
        stage: StageKind,
        preferences: &[String],
        device: Device,
    ) -> Result<Arc<dyn Provider>, PipelineError> {
        let registered = self.providers(stage);

        for name in preferences {
            let Some(provider) = registered.iter().find(|p| p.name() == name) else {
                tracing::warn!(
                    target: TRACING_TARGET,
                    stage = %stage,
                    provider = %name,
                    "Skipping unknown provider in preference list"
                );
                continue;
            };
            if provider.is_available(device) {
                return Ok(Arc::clone(provider));
            }
            tracing::debug!(
                target: TRACING_TARGET,
                stage = %stage,
                provider = %name,
                "Preferred provider unavailable"
            );
        }

        registered
            .iter()
            .find(|p| p.is_available(device))
            .map(Arc::clone)
            .ok_or(PipelineError::NoProviderAvailable { stage })
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::test_support::FakeProvider;
    use super::*;

    fn prefs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    fn table() -> Vec<Arc<dyn Provider>> {
        vec![
            FakeProvider::arc(StageKind::Vectorize, "a", false),
            FakeProvider::arc(StageKind::Vectorize, "b", false),
            FakeProvider::arc(StageKind::Vectorize, "c", true),
            FakeProvider::arc(StageKind::Vectorize, "d", true),
        ]
    }

    #[test]
    fn first_available_preference_wins() {
        let registry = ProviderRegistry::discover(&[table]);
        let chosen = registry
            .resolve(StageKind::Vectorize, &prefs(&["a", "b", "d", "c"]), Device::Cpu)
            .unwrap();
        assert_eq!(chosen.name(), "d");
    }

    #[test]
    fn exhausted_preferences_fall_back_to_registration_order() {
        let registry = ProviderRegistry::discover(&[table]);
        let chosen = registry
            .resolve(StageKind::Vectorize, &prefs(&["a", "b"]), Device::Cpu)
            .unwrap();
        assert_eq!(chosen.name(), "c");
        let chosen = registry
            .resolve(StageKind::Vectorize, &[], Device::Cpu)
            .unwrap();
        assert_eq!(chosen.name(), "c");
    }

    #[test]
    fn unknown_names_are_skipped() {
        let registry = ProviderRegistry::discover(&[table]);
        let chosen = registry
            .resolve(StageKind::Vectorize, &prefs(&["nope", "d"]), Device::Cpu)
            .unwrap();
        assert_eq!(chosen.name(), "d");
    }

    #[test]
    fn all_unavailable_is_an_error() {
        fn dead() -> Vec<Arc<dyn Provider>> {
            vec![
                FakeProvider::arc(StageKind::Hatch, "x", false),
                FakeProvider::arc(StageKind::Hatch, "y", false),
            ]
        }
        let registry = ProviderRegistry::discover(&[dead]);
        let err = registry
            .resolve(StageKind::Hatch, &prefs(&["x", "y"]), Device::Cpu)
            .unwrap_err();
        assert_eq!(err, PipelineError::NoProviderAvailable {
            stage: StageKind::Hatch
        });
        let err = registry
            .resolve(StageKind::Export, &[], Device::Cpu)
            .unwrap_err();
        assert_eq!(err, PipelineError::NoProviderAvailable {
            stage: StageKind::Export
        });
    }

    #[test]
    fn discovery_is_idempotent() {
        let once = ProviderRegistry::discover(&[table]);
        let twice = ProviderRegistry::discover(&[table, table]);
        assert_eq!(once.len(), 4);
        assert_eq!(twice.len(), 4);
        assert_eq!(twice.names(StageKind::Vectorize), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.register(FakeProvider::arc(StageKind::Optimize, "n", true)));
        assert!(!registry.register(FakeProvider::arc(StageKind::Optimize, "n", false)));
        assert!(registry.register(FakeProvider::arc(StageKind::Hatch, "n", true)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn payload_accessors_report_mismatch() {
        let payload = StagePayload::Encoded(Arc::from(vec![1_u8, 2, 3]));
        assert!(payload.as_encoded().is_some());
        assert!(payload.as_document().is_none());
        let err = payload.into_raster().unwrap_err();
        assert_eq!(err, ProviderError::UnexpectedPayload {
            expected: "Raster",
            actual: "Encoded",
        });
    }
}
