//! plotline-pipeline: photo to plotter line drawing (sans-IO).
//!
//! Converts raster images into canvas-sized vector paths through a chain
//! of stages:
//!
//! preprocess -> line extract -> vectorize -> optimize -> [hatch] -> export
//!
//! Each stage is served by interchangeable [`Provider`]s picked from a
//! [`ProviderRegistry`] and wrapped by hooks from a [`HookRegistry`]. The
//! [`Pipeline`] orchestrator threads one job through every stage.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! byte slices and returns structured data. Serialization to SVG, HPGL,
//! and G-code lives in `plotline-export`; job tracking lives in
//! `plotline-jobs`.

use std::sync::Arc;

pub mod bilateral;
pub mod canny;
pub mod contour;
pub mod dedupe;
pub mod device;
pub mod diagnostics;
pub mod edge;
pub mod error;
pub mod fit;
pub mod hatch;
pub mod hooks;
pub mod merge;
pub mod optimize;
pub mod params;
pub mod pipeline;
pub mod preprocess;
pub mod provider;
pub mod simplify;
pub mod stage;
pub mod thinning;
pub mod types;

pub use device::{Device, DeviceSelector};
pub use diagnostics::{PipelineDiagnostics, StageMetrics};
pub use error::{ErrorKind, PipelineError, ProviderError};
pub use hooks::{HookContext, HookPriority, HookRegistry, HookTiming};
pub use params::{Limits, Preset, ProcessingParams, ProviderPreferences};
pub use pipeline::{NoopObserver, Pipeline, PipelineObserver, PipelineOutput, progress_after};
pub use provider::{Provider, ProviderContext, ProviderRegistry, ProviderTable, StageKind, StagePayload};
pub use stage::{Stage, StageOutcome};
pub use types::{
    BoundingBox, Dimensions, DocumentStats, ExportBundle, ExportFormat, GrayImage, Placement,
    Point, Polyline, RgbImage, Shading, Units, VectorDocument,
};

/// Registration table for the providers this crate ships, in default
/// order per stage.
#[must_use]
pub fn providers() -> Vec<Arc<dyn Provider>> {
    vec![
        Arc::new(preprocess::ClassicalPreprocess),
        Arc::new(preprocess::BorderSegmentation),
        Arc::new(edge::BilateralCanny),
        Arc::new(edge::DifferenceOfGaussians),
        Arc::new(contour::SkeletonTrace),
        Arc::new(contour::ContourTrace),
        Arc::new(optimize::NativeOptimize),
        Arc::new(hatch::ScanlineHatch),
    ]
}
