//! The orchestrator: runs every stage of one job in order.
//!
//! A [`Pipeline`] owns the provider registry (shared, read-only), its own
//! [`HookRegistry`], the process device, and the service limits. Each
//! [`Pipeline::run`] call is synchronous and self-contained, so concurrent
//! jobs only share read-only state. Progress and cancellation flow
//! through a [`PipelineObserver`] supplied by the caller.
//!
//! Stage outputs are threaded into the next stage's input:
//!
//! ```text
//! Encoded -> Preprocess -> Raster -> LineExtract -> LineArt
//!         -> Vectorize -> Document -> Optimize -> Document
//!         -> [Hatch(Shading) -> Document] -> Export -> Exported
//! ```
//!
//! The grayscale tone map for Hatch is derived once, right after
//! Preprocess.

use std::sync::Arc;

use crate::device::Device;
use crate::diagnostics::{PipelineDiagnostics, StageMetrics};
use crate::error::PipelineError;
use crate::hooks::HookRegistry;
use crate::params::{Limits, ProcessingParams};
use crate::preprocess::luma;
use crate::provider::{ProviderRegistry, StageKind, StagePayload};
use crate::stage::Stage;
use crate::types::{ExportBundle, GrayImage, Shading, VectorDocument};

const TRACING_TARGET: &str = "plotline_pipeline::pipeline";

/// Provider the Preprocess stage prefers when subject isolation is on and
/// the caller named none.
pub const SUBJECT_ISOLATION_PROVIDER: &str = "border_segmentation";

/// Receives progress from a running pipeline and may request cancellation.
pub trait PipelineObserver: Send + Sync {
    /// Called right before `stage` resolves its provider.
    fn stage_started(&self, _stage: StageKind) {}

    /// Called after `stage` finished; `percent` never decreases within a
    /// run and reaches 100 only after Export.
    fn stage_completed(&self, _stage: StageKind, _percent: u8) {}

    /// Checked before every stage. Returning `true` stops the run with
    /// [`PipelineError::Cancelled`].
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// The final document, in canvas millimetres.
    pub document: VectorDocument,
    pub bundle: ExportBundle,
    pub diagnostics: PipelineDiagnostics,
}

/// Progress after `completed` of `total` stages: `round(100 * i / n)`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn progress_after(completed: usize, total: usize) -> u8 {
    if total == 0 || completed >= total {
        return 100;
    }
    ((completed * 200 + total) / (total * 2)) as u8
}

/// The stages a run with `params` executes, in order.
#[must_use]
pub fn stage_plan(params: &ProcessingParams) -> Vec<StageKind> {
    StageKind::ALL
        .into_iter()
        .filter(|&s| s != StageKind::Hatch || params.hatching_enabled)
        .collect()
}

/// Orchestrates stages for one job at a time.
#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: Arc<ProviderRegistry>,
    hooks: HookRegistry,
    device: Device,
    limits: Limits,
}

impl Pipeline {
    #[must_use]
    pub const fn new(
        registry: Arc<ProviderRegistry>,
        hooks: HookRegistry,
        device: Device,
        limits: Limits,
    ) -> Self {
        Self {
            registry,
            hooks,
            device,
            limits,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    #[must_use]
    pub const fn device(&self) -> Device {
        self.device
    }

    #[must_use]
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Run every stage over `image`.
    ///
    /// Parameters are validated before the first stage. Cancellation is
    /// checked before each stage; an in-flight provider call is never
    /// interrupted.
    ///
    /// # Errors
    ///
    /// The first error any stage, hook, or validation reports, or
    /// [`PipelineError::Cancelled`].
    pub fn run(
        &self,
        image: Arc<[u8]>,
        params: &ProcessingParams,
        observer: &dyn PipelineObserver,
    ) -> Result<PipelineOutput, PipelineError> {
        params.validate(&self.limits)?;

        let start = web_time::Instant::now();
        let plan = stage_plan(params);
        let total = plan.len();
        let mut diagnostics = PipelineDiagnostics::default();
        let mut payload = StagePayload::Encoded(image);
        let mut gray: Option<GrayImage> = None;
        let mut document: Option<VectorDocument> = None;
        let isolation = [SUBJECT_ISOLATION_PROVIDER.to_owned()];

        for (i, &kind) in plan.iter().enumerate() {
            if observer.is_cancelled() {
                tracing::info!(
                    target: TRACING_TARGET,
                    stage = %kind,
                    "Cancelled before stage"
                );
                return Err(PipelineError::Cancelled);
            }
            observer.stage_started(kind);

            let input = match kind {
                StageKind::Hatch => {
                    let gray = gray.clone().ok_or_else(|| {
                        PipelineError::Internal("no tone map recorded before hatching".into())
                    })?;
                    StagePayload::Shading(Shading {
                        gray,
                        document: into_document(payload, kind)?,
                    })
                }
                StageKind::Export => {
                    document = payload.as_document().cloned();
                    payload
                }
                _ => payload,
            };

            let mut preferences = params.providers.for_stage(kind);
            if kind == StageKind::Preprocess && params.isolate_subject && preferences.is_empty() {
                preferences = &isolation;
            }

            let outcome = Stage::new(kind, &self.registry, &self.hooks).run(
                input,
                preferences,
                params,
                self.device,
                &self.limits,
            )?;

            if kind == StageKind::Preprocess {
                let raster = outcome.output.as_raster().ok_or_else(|| {
                    PipelineError::Internal(format!(
                        "preprocess produced a {} payload",
                        outcome.output.kind_name()
                    ))
                })?;
                diagnostics.raster_width = raster.width();
                diagnostics.raster_height = raster.height();
                gray = Some(luma(raster));
            }

            diagnostics.stages.push(StageMetrics {
                stage: kind,
                provider: outcome.provider.to_owned(),
                duration: outcome.duration,
                metadata: outcome.metadata,
            });
            observer.stage_completed(kind, progress_after(i + 1, total));
            payload = outcome.output;
        }

        let bundle = payload
            .into_exported()
            .map_err(|e| PipelineError::Internal(format!("export stage output: {e}")))?;
        let document = document.ok_or_else(|| {
            PipelineError::Internal("no document reached the export stage".into())
        })?;
        diagnostics.total_duration = start.elapsed();

        tracing::debug!(
            target: TRACING_TARGET,
            paths = document.len(),
            result_ref = %bundle.result_ref,
            elapsed_ms = diagnostics.total_duration.as_millis(),
            "Pipeline finished"
        );
        Ok(PipelineOutput {
            document,
            bundle,
            diagnostics,
        })
    }
}

fn into_document(payload: StagePayload, stage: StageKind) -> Result<VectorDocument, PipelineError> {
    payload
        .into_document()
        .map_err(|e| PipelineError::Internal(format!("input of stage `{stage}`: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use image::{ImageFormat, Luma};

    use super::*;
    use crate::error::ProviderError;
    use crate::provider::{Provider, ProviderContext};
    use crate::types::{DocumentStats, ExportFormat};

    /// Export stand-in: the real serializers live in another crate.
    struct CountingExport;

    impl Provider for CountingExport {
        fn stage(&self) -> StageKind {
            StageKind::Export
        }

        fn name(&self) -> &'static str {
            "counting"
        }

        fn execute(
            &self,
            input: StagePayload,
            _ctx: &ProviderContext<'_>,
        ) -> Result<StagePayload, ProviderError> {
            let doc = input.into_document()?;
            let mut outputs = BTreeMap::new();
            outputs.insert(ExportFormat::Svg, format!("{} paths", doc.len()));
            Ok(StagePayload::Exported(ExportBundle {
                outputs,
                stats: DocumentStats {
                    path_count: doc.len(),
                    point_count: 0,
                    total_length_mm: 0.0,
                    travel_length_mm: 0.0,
                    bounds: doc.bounding_box(),
                    width_mm: 0.0,
                    height_mm: 0.0,
                },
                result_ref: format!("plt-{:016x}", doc.fingerprint()),
            }))
        }
    }

    fn pipeline() -> Pipeline {
        let mut registry = ProviderRegistry::discover(&[crate::providers]);
        registry.register(Arc::new(CountingExport));
        Pipeline::new(
            Arc::new(registry),
            HookRegistry::with_builtin_hooks(),
            Device::Cpu,
            Limits::default(),
        )
    }

    fn square_png() -> Arc<[u8]> {
        let img = GrayImage::from_fn(100, 100, |x, y| {
            if (25..75).contains(&x) && (25..75).contains(&y) {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner().into()
    }

    #[derive(Default)]
    struct Recorder {
        progress: Mutex<Vec<u8>>,
        cancel_after: Option<usize>,
        cancelled: AtomicBool,
    }

    impl PipelineObserver for Recorder {
        fn stage_completed(&self, _stage: StageKind, percent: u8) {
            let mut progress = self.progress.lock().unwrap();
            progress.push(percent);
            if self.cancel_after == Some(progress.len()) {
                self.cancelled.store(true, Ordering::SeqCst);
            }
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn progress_rounds_to_whole_percent() {
        assert_eq!(progress_after(1, 5), 20);
        assert_eq!(progress_after(1, 6), 17);
        assert_eq!(progress_after(3, 6), 50);
        assert_eq!(progress_after(5, 6), 83);
        assert_eq!(progress_after(6, 6), 100);
    }

    #[test]
    fn plan_includes_hatch_only_when_enabled() {
        let mut params = ProcessingParams::new(50.0, 50.0, 0.3);
        assert_eq!(stage_plan(&params).len(), 5);
        params.hatching_enabled = true;
        assert_eq!(stage_plan(&params)[4], StageKind::Hatch);
    }

    #[test]
    fn square_becomes_one_closed_path() {
        let params = ProcessingParams::new(50.0, 50.0, 0.3);
        let observer = Recorder::default();
        let out = pipeline().run(square_png(), &params, &observer).unwrap();

        assert_eq!(out.document.len(), 1);
        let path = &out.document.paths()[0];
        assert!(path.is_closed());
        let bb = out.document.bounding_box().unwrap();
        assert!((bb.width() - 50.0).abs() < 0.5, "width {}", bb.width());
        assert!((bb.height() - 50.0).abs() < 0.5, "height {}", bb.height());
        assert_eq!(*observer.progress.lock().unwrap(), vec![20, 40, 60, 80, 100]);
        assert_eq!(out.diagnostics.stages.len(), 5);
        assert_eq!(out.diagnostics.raster_width, 100);
    }

    #[test]
    fn runs_are_deterministic() {
        let params = ProcessingParams::new(80.0, 60.0, 0.4);
        let a = pipeline().run(square_png(), &params, &NoopObserver).unwrap();
        let b = pipeline().run(square_png(), &params, &NoopObserver).unwrap();
        assert_eq!(a.document, b.document);
        assert_eq!(a.bundle.result_ref, b.bundle.result_ref);
    }

    #[test]
    fn invalid_params_fail_before_any_stage() {
        let params = ProcessingParams::new(0.0, 50.0, 0.3);
        let observer = Recorder::default();
        let err = pipeline().run(square_png(), &params, &observer).unwrap_err();
        assert!(matches!(err, PipelineError::Validation { .. }));
        assert!(observer.progress.lock().unwrap().is_empty());
    }

    #[test]
    fn cancellation_stops_between_stages() {
        let params = ProcessingParams::new(50.0, 50.0, 0.3);
        let observer = Recorder {
            cancel_after: Some(2),
            ..Recorder::default()
        };
        let err = pipeline().run(square_png(), &params, &observer).unwrap_err();
        assert_eq!(err, PipelineError::Cancelled);
        assert_eq!(*observer.progress.lock().unwrap(), vec![20, 40]);
    }

    #[test]
    fn garbage_bytes_are_unsupported() {
        let params = ProcessingParams::new(50.0, 50.0, 0.3);
        let err = pipeline()
            .run(Arc::from(&b"not an image"[..]), &params, &NoopObserver)
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn hatching_adds_a_stage_and_paths() {
        let params = ProcessingParams {
            hatching_enabled: true,
            ..ProcessingParams::new(50.0, 50.0, 0.3)
        };
        let observer = Recorder::default();
        let out = pipeline().run(square_png(), &params, &observer).unwrap();
        assert!(out.document.len() > 1);
        assert_eq!(observer.progress.lock().unwrap().len(), 6);
        assert_eq!(observer.progress.lock().unwrap().last(), Some(&100));
        let canvas = out.document.placement().unwrap().canvas();
        assert!(canvas.contains(&out.document.bounding_box().unwrap(), 1e-6));
    }

    #[test]
    fn isolate_subject_prefers_segmentation() {
        let params = ProcessingParams {
            isolate_subject: true,
            ..ProcessingParams::new(50.0, 50.0, 0.3)
        };
        let out = pipeline().run(square_png(), &params, &NoopObserver).unwrap();
        let pre = out.diagnostics.stage(StageKind::Preprocess).unwrap();
        assert_eq!(pre.provider, SUBJECT_ISOLATION_PROVIDER);
    }

    #[test]
    fn missing_export_provider_is_reported() {
        let pipeline = Pipeline::new(
            Arc::new(ProviderRegistry::discover(&[crate::providers])),
            HookRegistry::new(),
            Device::Cpu,
            Limits::default(),
        );
        let params = ProcessingParams::new(50.0, 50.0, 0.3);
        let err = pipeline.run(square_png(), &params, &NoopObserver).unwrap_err();
        assert_eq!(err, PipelineError::NoProviderAvailable {
            stage: StageKind::Export
        });
    }
}
