//! Hooks: cross-cutting functions run before and after a stage's provider.
//!
//! A [`HookRegistry`] is an explicit value owned by whoever builds the
//! [`Pipeline`](crate::pipeline::Pipeline); nothing here is global. Hooks are
//! keyed by `(stage, hook point, timing)` and run in ascending priority,
//! ties broken by registration order. A stage takes a snapshot of its hook
//! lists before running anything, so registering a hook from inside a hook
//! only affects later stage runs.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::params::ProcessingParams;
use crate::provider::{StageKind, StagePayload};

const TRACING_TARGET: &str = "plotline_pipeline::hooks";

/// When a hook runs relative to the provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookTiming {
    Before,
    After,
}

impl HookTiming {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

impl fmt::Display for HookTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conventional priority bands. Lower runs first.
#[derive(Debug, Clone, Copy)]
pub struct HookPriority;

impl HookPriority {
    /// Fail-fast validation (band 1 to 20).
    pub const VALIDATION: i32 = 10;
    /// Hooks that rewrite params or payloads.
    pub const TRANSFORM: i32 = 40;
    pub const DEFAULT: i32 = 50;
    /// Logging and metrics.
    pub const OBSERVE: i32 = 70;
    pub const CLEANUP: i32 = 90;
}

/// Mutable state handed to every hook of one stage run.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub stage: StageKind,
    pub hook_point: &'static str,
    pub timing: HookTiming,
    /// Stage input. Present for `before` hooks; moved into the provider
    /// afterwards.
    pub input: Option<StagePayload>,
    /// Stage output. Present for `after` hooks, which may replace it.
    pub output: Option<StagePayload>,
    /// Merged parameters. Changes made by `before` hooks reach the
    /// provider.
    pub params: ProcessingParams,
    /// Free-form values hooks want to surface alongside the output.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Provider that ran, once resolved.
    pub provider: Option<&'static str>,
}

impl HookContext {
    #[must_use]
    pub fn new(stage: StageKind, input: StagePayload, params: ProcessingParams) -> Self {
        Self {
            stage,
            hook_point: stage.hook_point(),
            timing: HookTiming::Before,
            input: Some(input),
            output: None,
            params,
            metadata: BTreeMap::new(),
            provider: None,
        }
    }

    /// Error attributed to the provider that produced the current output.
    #[must_use]
    pub fn output_error(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::ProviderExecutionFailed {
            stage: self.stage,
            provider: self.provider.unwrap_or("unknown").to_owned(),
            message: message.into(),
        }
    }
}

/// A hook body. Returning an error aborts the stage with that error.
pub type HookFn = Arc<dyn Fn(&mut HookContext) -> Result<(), PipelineError> + Send + Sync>;

/// One registered hook.
#[derive(Clone)]
pub struct HookEntry {
    pub name: String,
    pub priority: i32,
    seq: u64,
    handler: HookFn,
}

impl fmt::Debug for HookEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookEntry")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

type HookKey = (StageKind, String, HookTiming);

#[derive(Default)]
struct HookTable {
    entries: BTreeMap<HookKey, Vec<HookEntry>>,
    next_seq: u64,
}

/// Shared, cheaply cloneable hook table.
///
/// Clones share the same table. Writes take a short exclusive lock; reads
/// copy the matching entries out so no lock is held while hooks run.
#[derive(Clone, Default)]
pub struct HookRegistry {
    table: Arc<RwLock<HookTable>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let mut map = f.debug_map();
        for ((stage, point, timing), entries) in &table.entries {
            let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
            map.entry(&format_args!("{stage}.{point}.{timing}"), &names);
        }
        map.finish()
    }
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh registry with [`install_builtin_hooks`] applied.
    #[must_use]
    pub fn with_builtin_hooks() -> Self {
        let registry = Self::new();
        install_builtin_hooks(&registry);
        registry
    }

    /// Register `handler` under `name`.
    ///
    /// Returns `false` and leaves the table unchanged when a hook with the
    /// same name is already registered for the same key, which makes
    /// repeated discovery harmless.
    pub fn register<F>(
        &self,
        name: impl Into<String>,
        stage: StageKind,
        hook_point: impl Into<String>,
        timing: HookTiming,
        priority: i32,
        handler: F,
    ) -> bool
    where
        F: Fn(&mut HookContext) -> Result<(), PipelineError> + Send + Sync + 'static,
    {
        let name = name.into();
        let key = (stage, hook_point.into(), timing);
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let seq = table.next_seq;
        let slot = table.entries.entry(key).or_default();
        if slot.iter().any(|e| e.name == name) {
            return false;
        }
        let at = slot.partition_point(|e| (e.priority, e.seq) <= (priority, seq));
        slot.insert(at, HookEntry {
            name,
            priority,
            seq,
            handler: Arc::new(handler),
        });
        table.next_seq += 1;
        true
    }

    /// Register against the stage's own hook point.
    pub fn on<F>(
        &self,
        name: impl Into<String>,
        stage: StageKind,
        timing: HookTiming,
        priority: i32,
        handler: F,
    ) -> bool
    where
        F: Fn(&mut HookContext) -> Result<(), PipelineError> + Send + Sync + 'static,
    {
        self.register(name, stage, stage.hook_point(), timing, priority, handler)
    }

    /// Entries for one key in execution order, copied out of the table.
    #[must_use]
    pub fn snapshot(&self, stage: StageKind, hook_point: &str, timing: HookTiming) -> HookList {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let entries = table
            .entries
            .get(&(stage, hook_point.to_owned(), timing))
            .cloned()
            .unwrap_or_default();
        HookList { entries }
    }

    /// Hook names for one key in execution order.
    #[must_use]
    pub fn names(&self, stage: StageKind, hook_point: &str, timing: HookTiming) -> Vec<String> {
        self.snapshot(stage, hook_point, timing)
            .entries
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    /// Total number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.entries.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A frozen, ordered list of hooks for one stage run.
#[derive(Debug, Clone, Default)]
pub struct HookList {
    entries: Vec<HookEntry>,
}

impl HookList {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every hook in order, stopping at the first error.
    ///
    /// # Errors
    ///
    /// The first error a hook returns, unchanged.
    pub fn run(&self, ctx: &mut HookContext) -> Result<(), PipelineError> {
        for entry in &self.entries {
            if let Err(err) = (entry.handler)(ctx) {
                tracing::debug!(
                    target: TRACING_TARGET,
                    stage = %ctx.stage,
                    timing = %ctx.timing,
                    hook = %entry.name,
                    error = %err,
                    "Hook aborted stage"
                );
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Register the stock output checks and the debug logging hook.
///
/// Idempotent; each built-in is registered under a fixed name.
pub fn install_builtin_hooks(registry: &HookRegistry) {
    registry.on(
        "binary_line_art",
        StageKind::LineExtract,
        HookTiming::After,
        HookPriority::VALIDATION,
        check_binary_line_art,
    );
    for stage in [StageKind::Vectorize, StageKind::Optimize, StageKind::Hatch] {
        registry.on(
            "well_formed_paths",
            stage,
            HookTiming::After,
            HookPriority::VALIDATION,
            check_paths,
        );
    }
    for stage in [StageKind::Optimize, StageKind::Hatch] {
        registry.on(
            "canvas_fit",
            stage,
            HookTiming::After,
            HookPriority::VALIDATION + 1,
            check_canvas_fit,
        );
    }
    for stage in StageKind::ALL {
        registry.on(
            "log_output",
            stage,
            HookTiming::After,
            HookPriority::OBSERVE,
            log_output,
        );
    }
}

const CANVAS_EPSILON_MM: f64 = 1e-6;

fn check_binary_line_art(ctx: &mut HookContext) -> Result<(), PipelineError> {
    let Some(line_art) = ctx.output.as_ref().and_then(StagePayload::as_line_art) else {
        return Ok(());
    };
    match line_art.pixels().find(|p| p.0[0] != 0 && p.0[0] != 255) {
        Some(p) => Err(ctx.output_error(format!(
            "line raster must be two-level, found value {}",
            p.0[0]
        ))),
        None => Ok(()),
    }
}

fn check_paths(ctx: &mut HookContext) -> Result<(), PipelineError> {
    let Some(doc) = ctx.output.as_ref().and_then(StagePayload::as_document) else {
        return Ok(());
    };
    for (i, path) in doc.paths().iter().enumerate() {
        if path.len() < 2 {
            return Err(ctx.output_error(format!("path {i} has fewer than 2 points")));
        }
        if path.points().iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(ctx.output_error(format!("path {i} has a non-finite coordinate")));
        }
    }
    Ok(())
}

fn check_canvas_fit(ctx: &mut HookContext) -> Result<(), PipelineError> {
    let Some(doc) = ctx.output.as_ref().and_then(StagePayload::as_document) else {
        return Ok(());
    };
    let Some(placement) = doc.placement() else {
        return Err(ctx.output_error("document has no canvas placement"));
    };
    if let Some(bounds) = doc.bounding_box() {
        if !placement.canvas().contains(&bounds, CANVAS_EPSILON_MM) {
            return Err(ctx.output_error(format!(
                "document bounds {bounds:?} exceed the {}x{} mm canvas",
                placement.canvas_width_mm, placement.canvas_height_mm
            )));
        }
    }
    Ok(())
}

fn log_output(ctx: &mut HookContext) -> Result<(), PipelineError> {
    let Some(output) = ctx.output.as_ref() else {
        return Ok(());
    };
    let kind = output.kind_name();
    let paths = output.as_document().map(|d| d.len());
    if let Some(count) = paths {
        ctx.metadata
            .insert("path_count".to_owned(), serde_json::Value::from(count));
    }
    tracing::debug!(
        target: TRACING_TARGET,
        stage = %ctx.stage,
        provider = ctx.provider.unwrap_or("unknown"),
        output = kind,
        paths = ?paths,
        "Stage produced output"
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::types::{Dimensions, GrayImage, Placement, Point, Polyline, VectorDocument};

    fn ctx(stage: StageKind) -> HookContext {
        HookContext::new(
            stage,
            StagePayload::LineArt(GrayImage::new(1, 1)),
            ProcessingParams::new(100.0, 100.0, 0.3),
        )
    }

    type Handler = Box<dyn Fn(&mut HookContext) -> Result<(), PipelineError> + Send + Sync>;

    fn recorder(log: &Arc<Mutex<Vec<i32>>>, tag: i32) -> Handler {
        let log = Arc::clone(log);
        Box::new(move |_ctx: &mut HookContext| {
            log.lock().unwrap().push(tag);
            Ok(())
        })
    }

    #[test]
    fn runs_in_ascending_priority_regardless_of_registration_order() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for priority in [90, 5, 50] {
            registry.on(
                format!("p{priority}"),
                StageKind::Vectorize,
                HookTiming::Before,
                priority,
                recorder(&log, priority),
            );
        }
        let hooks = registry.snapshot(StageKind::Vectorize, "vectorize", HookTiming::Before);
        hooks.run(&mut ctx(StageKind::Vectorize)).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![5, 50, 90]);
    }

    #[test]
    fn equal_priorities_keep_registration_order() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in [3, 1, 2] {
            registry.on(
                format!("h{tag}"),
                StageKind::Export,
                HookTiming::After,
                HookPriority::DEFAULT,
                recorder(&log, tag),
            );
        }
        registry
            .snapshot(StageKind::Export, "export", HookTiming::After)
            .run(&mut ctx(StageKind::Export))
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec![3, 1, 2]);
    }

    #[test]
    fn registration_during_a_run_does_not_affect_it() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner = registry.clone();
        let late_log = Arc::clone(&log);
        registry.on("first", StageKind::Hatch, HookTiming::Before, 1, {
            let log = Arc::clone(&log);
            move |_ctx: &mut HookContext| {
                log.lock().unwrap().push(1);
                inner.on(
                    "late",
                    StageKind::Hatch,
                    HookTiming::Before,
                    2,
                    recorder(&late_log, 2),
                );
                Ok(())
            }
        });
        let hooks = registry.snapshot(StageKind::Hatch, "hatch", HookTiming::Before);
        hooks.run(&mut ctx(StageKind::Hatch)).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert_eq!(registry.len(), 2);

        registry
            .snapshot(StageKind::Hatch, "hatch", HookTiming::Before)
            .run(&mut ctx(StageKind::Hatch))
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 1, 2]);
    }

    #[test]
    fn first_error_stops_the_chain() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.on(
            "reject",
            StageKind::Preprocess,
            HookTiming::Before,
            10,
            |_ctx: &mut HookContext| {
                Err(PipelineError::validation("canvas_width_mm", "rejected by hook"))
            },
        );
        registry.on(
            "never",
            StageKind::Preprocess,
            HookTiming::Before,
            20,
            recorder(&log, 1),
        );
        let err = registry
            .snapshot(StageKind::Preprocess, "preprocess", HookTiming::Before)
            .run(&mut ctx(StageKind::Preprocess))
            .unwrap_err();
        assert_eq!(err, PipelineError::validation("canvas_width_mm", "rejected by hook"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn builtin_installation_is_idempotent() {
        let registry = HookRegistry::with_builtin_hooks();
        let count = registry.len();
        install_builtin_hooks(&registry);
        assert_eq!(registry.len(), count);
        assert_eq!(
            registry.names(StageKind::Optimize, "optimize", HookTiming::After),
            vec!["well_formed_paths", "canvas_fit", "log_output"]
        );
    }

    #[test]
    fn gray_line_art_is_rejected() {
        let registry = HookRegistry::with_builtin_hooks();
        let mut c = ctx(StageKind::LineExtract);
        c.timing = HookTiming::After;
        c.provider = Some("dog");
        c.output = Some(StagePayload::LineArt(GrayImage::from_pixel(
            2,
            2,
            image::Luma([128]),
        )));
        let err = registry
            .snapshot(StageKind::LineExtract, "extract", HookTiming::After)
            .run(&mut c)
            .unwrap_err();
        assert_eq!(err.provider(), Some("dog"));
    }

    #[test]
    fn out_of_canvas_document_is_rejected() {
        let placement = Placement {
            scale_x: 1.0,
            scale_y: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            canvas_width_mm: 10.0,
            canvas_height_mm: 10.0,
        };
        let path = Polyline::new(vec![Point::new(0.0, 0.0), Point::new(20.0, 5.0)]);
        let doc = VectorDocument::placed(
            vec![path],
            Dimensions {
                width: 20,
                height: 10,
            },
            placement,
        );
        let mut c = ctx(StageKind::Optimize);
        c.output = Some(StagePayload::Document(doc));
        c.provider = Some("native");
        let err = check_canvas_fit(&mut c).unwrap_err();
        assert_eq!(err.stage(), Some(StageKind::Optimize));
    }
}
