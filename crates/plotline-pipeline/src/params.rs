//! Processing parameters and their validation.
//!
//! [`ProcessingParams`] is a flat value object. The canvas size and line
//! width are required (no serde default, no `Default` impl); every other
//! knob defaults to a named `DEFAULT_*` constant. [`ProcessingParams::validate`]
//! runs once at submission and rejects, never coerces, bad values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::provider::StageKind;
use crate::types::ExportFormat;

/// Service-level limits that parameter validation and decoding enforce.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// Largest accepted canvas side, in millimetres.
    pub max_canvas_mm: f64,
    /// Largest accepted decoded image, in pixels.
    pub max_image_pixels: u64,
}

impl Limits {
    pub const DEFAULT_MAX_CANVAS_MM: f64 = 2000.0;
    pub const DEFAULT_MAX_IMAGE_PIXELS: u64 = 64_000_000;
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_canvas_mm: Self::DEFAULT_MAX_CANVAS_MM,
            max_image_pixels: Self::DEFAULT_MAX_IMAGE_PIXELS,
        }
    }
}

/// Provider preference lists, one per stage. Empty means registration
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderPreferences {
    pub preprocess: Vec<String>,
    pub line_extract: Vec<String>,
    pub vectorize: Vec<String>,
    pub optimize: Vec<String>,
    pub hatch: Vec<String>,
    pub export: Vec<String>,
}

impl ProviderPreferences {
    #[must_use]
    pub fn for_stage(&self, stage: StageKind) -> &[String] {
        match stage {
            StageKind::Preprocess => &self.preprocess,
            StageKind::LineExtract => &self.line_extract,
            StageKind::Vectorize => &self.vectorize,
            StageKind::Optimize => &self.optimize,
            StageKind::Hatch => &self.hatch,
            StageKind::Export => &self.export,
        }
    }
}

/// Named parameter bundles tuned for common subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Portrait,
    Animal,
}

impl Preset {
    pub const ALL: [Self; 2] = [Self::Portrait, Self::Animal];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Portrait => "portrait",
            Self::Animal => "animal",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| PipelineError::validation("preset", format!("unknown preset `{s}`")))
    }
}

/// Full configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingParams {
    /// Canvas width in millimetres. Required.
    pub canvas_width_mm: f64,
    /// Canvas height in millimetres. Required.
    pub canvas_height_mm: f64,
    /// Stroke width in millimetres. Required.
    pub line_width_mm: f64,

    /// Replace the background with white before line extraction.
    #[serde(default)]
    pub isolate_subject: bool,
    /// Long-axis size the source is downscaled to, in pixels.
    #[serde(default = "defaults::max_dimension")]
    pub max_dimension: u32,
    /// Per-channel color distance that still counts as background during
    /// subject isolation.
    #[serde(default = "defaults::segmentation_tolerance")]
    pub segmentation_tolerance: u8,

    /// Hysteresis low threshold, in `[0, 255]`.
    #[serde(default = "defaults::edge_low")]
    pub edge_low: f32,
    /// Hysteresis high threshold, in `[0, 255]`, above `edge_low`.
    #[serde(default = "defaults::edge_high")]
    pub edge_high: f32,
    /// Bilateral filter neighbourhood diameter in pixels.
    #[serde(default = "defaults::bilateral_diameter")]
    pub bilateral_diameter: u32,
    #[serde(default = "defaults::bilateral_sigma_color")]
    pub bilateral_sigma_color: f32,
    #[serde(default = "defaults::bilateral_sigma_space")]
    pub bilateral_sigma_space: f32,

    #[serde(default = "defaults::dog_sigma")]
    pub dog_sigma: f32,
    #[serde(default = "defaults::dog_k")]
    pub dog_k: f32,
    #[serde(default = "defaults::dog_tau")]
    pub dog_tau: f32,
    #[serde(default = "defaults::dog_epsilon")]
    pub dog_epsilon: f32,
    #[serde(default = "defaults::dog_phi")]
    pub dog_phi: f32,

    /// Traced paths shorter than this many pixels are discarded.
    #[serde(default = "defaults::pathomit")]
    pub pathomit: u32,

    /// Endpoint gap that still joins two paths, in millimetres.
    #[serde(default = "defaults::merge_tolerance_mm")]
    pub merge_tolerance_mm: f64,
    /// Maximum deviation removed by simplification, in millimetres.
    #[serde(default = "defaults::simplify_tolerance_mm")]
    pub simplify_tolerance_mm: f64,
    /// Distance under which two paths count as duplicates, in millimetres.
    #[serde(default = "defaults::dedupe_tolerance_mm")]
    pub dedupe_tolerance_mm: f64,
    /// Scale both axes by the same factor when fitting the canvas.
    #[serde(default = "defaults::preserve_aspect")]
    pub preserve_aspect: bool,

    #[serde(default)]
    pub hatching_enabled: bool,
    /// Hatch spacing as a multiple of the line width.
    #[serde(default = "defaults::hatch_density")]
    pub hatch_density: f64,
    /// Hatch direction in degrees, counter-clockwise from the +x axis.
    #[serde(default = "defaults::hatch_angle_deg")]
    pub hatch_angle_deg: f64,
    /// Gray level below which a region is hatched.
    #[serde(default = "defaults::darkness_threshold")]
    pub darkness_threshold: u8,
    /// Gray level below which a region is also cross-hatched. 0 disables.
    #[serde(default = "defaults::crosshatch_threshold")]
    pub crosshatch_threshold: u8,

    #[serde(default)]
    pub providers: ProviderPreferences,

    /// Formats produced by Export. SVG is always produced.
    #[serde(default = "defaults::export_formats")]
    pub export_formats: Vec<ExportFormat>,
    /// Pen-down feed rate in mm/min.
    #[serde(default = "defaults::gcode_feed_rate")]
    pub gcode_feed_rate: f64,
    #[serde(default = "defaults::gcode_z_up")]
    pub gcode_z_up: f64,
    #[serde(default = "defaults::gcode_z_down")]
    pub gcode_z_down: f64,
}

mod defaults {
    use super::ProcessingParams as P;
    use crate::types::ExportFormat;

    pub const fn max_dimension() -> u32 {
        P::DEFAULT_MAX_DIMENSION
    }
    pub const fn segmentation_tolerance() -> u8 {
        P::DEFAULT_SEGMENTATION_TOLERANCE
    }
    pub const fn edge_low() -> f32 {
        P::DEFAULT_EDGE_LOW
    }
    pub const fn edge_high() -> f32 {
        P::DEFAULT_EDGE_HIGH
    }
    pub const fn bilateral_diameter() -> u32 {
        P::DEFAULT_BILATERAL_DIAMETER
    }
    pub const fn bilateral_sigma_color() -> f32 {
        P::DEFAULT_BILATERAL_SIGMA_COLOR
    }
    pub const fn bilateral_sigma_space() -> f32 {
        P::DEFAULT_BILATERAL_SIGMA_SPACE
    }
    pub const fn dog_sigma() -> f32 {
        P::DEFAULT_DOG_SIGMA
    }
    pub const fn dog_k() -> f32 {
        P::DEFAULT_DOG_K
    }
    pub const fn dog_tau() -> f32 {
        P::DEFAULT_DOG_TAU
    }
    pub const fn dog_epsilon() -> f32 {
        P::DEFAULT_DOG_EPSILON
    }
    pub const fn dog_phi() -> f32 {
        P::DEFAULT_DOG_PHI
    }
    pub const fn pathomit() -> u32 {
        P::DEFAULT_PATHOMIT
    }
    pub const fn merge_tolerance_mm() -> f64 {
        P::DEFAULT_MERGE_TOLERANCE_MM
    }
    pub const fn simplify_tolerance_mm() -> f64 {
        P::DEFAULT_SIMPLIFY_TOLERANCE_MM
    }
    pub const fn dedupe_tolerance_mm() -> f64 {
        P::DEFAULT_DEDUPE_TOLERANCE_MM
    }
    pub const fn preserve_aspect() -> bool {
        true
    }
    pub const fn hatch_density() -> f64 {
        P::DEFAULT_HATCH_DENSITY
    }
    pub const fn hatch_angle_deg() -> f64 {
        P::DEFAULT_HATCH_ANGLE_DEG
    }
    pub const fn darkness_threshold() -> u8 {
        P::DEFAULT_DARKNESS_THRESHOLD
    }
    pub const fn crosshatch_threshold() -> u8 {
        P::DEFAULT_CROSSHATCH_THRESHOLD
    }
    pub fn export_formats() -> Vec<ExportFormat> {
        ExportFormat::ALL.to_vec()
    }
    pub const fn gcode_feed_rate() -> f64 {
        P::DEFAULT_GCODE_FEED_RATE
    }
    pub const fn gcode_z_up() -> f64 {
        P::DEFAULT_GCODE_Z_UP
    }
    pub const fn gcode_z_down() -> f64 {
        P::DEFAULT_GCODE_Z_DOWN
    }
}

/// Hatch lines closer than this would flood the plotter.
pub const MIN_HATCH_SPACING_MM: f64 = 0.05;

impl ProcessingParams {
    pub const DEFAULT_MAX_DIMENSION: u32 = 2048;
    pub const DEFAULT_SEGMENTATION_TOLERANCE: u8 = 32;
    pub const DEFAULT_EDGE_LOW: f32 = 50.0;
    pub const DEFAULT_EDGE_HIGH: f32 = 150.0;
    pub const DEFAULT_BILATERAL_DIAMETER: u32 = 9;
    pub const DEFAULT_BILATERAL_SIGMA_COLOR: f32 = 75.0;
    pub const DEFAULT_BILATERAL_SIGMA_SPACE: f32 = 75.0;
    pub const DEFAULT_DOG_SIGMA: f32 = 1.4;
    pub const DEFAULT_DOG_K: f32 = 1.6;
    pub const DEFAULT_DOG_TAU: f32 = 0.98;
    pub const DEFAULT_DOG_EPSILON: f32 = 0.0;
    pub const DEFAULT_DOG_PHI: f32 = 10.0;
    pub const DEFAULT_PATHOMIT: u32 = 8;
    pub const DEFAULT_MERGE_TOLERANCE_MM: f64 = 0.5;
    pub const DEFAULT_SIMPLIFY_TOLERANCE_MM: f64 = 0.2;
    pub const DEFAULT_DEDUPE_TOLERANCE_MM: f64 = 0.1;
    pub const DEFAULT_HATCH_DENSITY: f64 = 2.0;
    pub const DEFAULT_HATCH_ANGLE_DEG: f64 = 45.0;
    pub const DEFAULT_DARKNESS_THRESHOLD: u8 = 100;
    pub const DEFAULT_CROSSHATCH_THRESHOLD: u8 = 50;
    pub const DEFAULT_GCODE_FEED_RATE: f64 = 1000.0;
    pub const DEFAULT_GCODE_Z_UP: f64 = 5.0;
    pub const DEFAULT_GCODE_Z_DOWN: f64 = 0.0;

    /// Parameters with the required sizing values and every optional knob
    /// at its default. Call [`validate`](Self::validate) before use.
    #[must_use]
    pub fn new(canvas_width_mm: f64, canvas_height_mm: f64, line_width_mm: f64) -> Self {
        Self {
            canvas_width_mm,
            canvas_height_mm,
            line_width_mm,
            isolate_subject: false,
            max_dimension: Self::DEFAULT_MAX_DIMENSION,
            segmentation_tolerance: Self::DEFAULT_SEGMENTATION_TOLERANCE,
            edge_low: Self::DEFAULT_EDGE_LOW,
            edge_high: Self::DEFAULT_EDGE_HIGH,
            bilateral_diameter: Self::DEFAULT_BILATERAL_DIAMETER,
            bilateral_sigma_color: Self::DEFAULT_BILATERAL_SIGMA_COLOR,
            bilateral_sigma_space: Self::DEFAULT_BILATERAL_SIGMA_SPACE,
            dog_sigma: Self::DEFAULT_DOG_SIGMA,
            dog_k: Self::DEFAULT_DOG_K,
            dog_tau: Self::DEFAULT_DOG_TAU,
            dog_epsilon: Self::DEFAULT_DOG_EPSILON,
            dog_phi: Self::DEFAULT_DOG_PHI,
            pathomit: Self::DEFAULT_PATHOMIT,
            merge_tolerance_mm: Self::DEFAULT_MERGE_TOLERANCE_MM,
            simplify_tolerance_mm: Self::DEFAULT_SIMPLIFY_TOLERANCE_MM,
            dedupe_tolerance_mm: Self::DEFAULT_DEDUPE_TOLERANCE_MM,
            preserve_aspect: true,
            hatching_enabled: false,
            hatch_density: Self::DEFAULT_HATCH_DENSITY,
            hatch_angle_deg: Self::DEFAULT_HATCH_ANGLE_DEG,
            darkness_threshold: Self::DEFAULT_DARKNESS_THRESHOLD,
            crosshatch_threshold: Self::DEFAULT_CROSSHATCH_THRESHOLD,
            providers: ProviderPreferences::default(),
            export_formats: ExportFormat::ALL.to_vec(),
            gcode_feed_rate: Self::DEFAULT_GCODE_FEED_RATE,
            gcode_z_up: Self::DEFAULT_GCODE_Z_UP,
            gcode_z_down: Self::DEFAULT_GCODE_Z_DOWN,
        }
    }

    /// Parameters for a named preset at the given size.
    #[must_use]
    pub fn preset(
        preset: Preset,
        canvas_width_mm: f64,
        canvas_height_mm: f64,
        line_width_mm: f64,
    ) -> Self {
        let base = Self {
            isolate_subject: true,
            hatching_enabled: true,
            ..Self::new(canvas_width_mm, canvas_height_mm, line_width_mm)
        };
        match preset {
            Preset::Portrait => base,
            Preset::Animal => Self {
                edge_low: 30.0,
                edge_high: 120.0,
                merge_tolerance_mm: 0.3,
                simplify_tolerance_mm: 0.15,
                hatch_density: 1.5,
                darkness_threshold: 80,
                ..base
            },
        }
    }

    /// Hatch line spacing in millimetres.
    #[must_use]
    pub fn hatch_spacing_mm(&self) -> f64 {
        self.line_width_mm * self.hatch_density
    }

    /// Whether Export should emit `format`.
    #[must_use]
    pub fn wants_format(&self, format: ExportFormat) -> bool {
        format == ExportFormat::Svg || self.export_formats.contains(&format)
    }

    /// Check every value against its documented range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] naming the first offending
    /// field.
    pub fn validate(&self, limits: &Limits) -> Result<(), PipelineError> {
        for (field, value) in [
            ("canvas_width_mm", self.canvas_width_mm),
            ("canvas_height_mm", self.canvas_height_mm),
        ] {
            positive(field, value)?;
            if value > limits.max_canvas_mm {
                return Err(PipelineError::validation(
                    field,
                    format!("{value} exceeds the maximum of {} mm", limits.max_canvas_mm),
                ));
            }
        }
        positive("line_width_mm", self.line_width_mm)?;

        if self.max_dimension < 8 {
            return Err(PipelineError::validation(
                "max_dimension",
                "must be at least 8 pixels",
            ));
        }

        for (field, value) in [("edge_low", self.edge_low), ("edge_high", self.edge_high)] {
            if !value.is_finite() || !(0.0..=255.0).contains(&value) {
                return Err(PipelineError::validation(field, "must be within [0, 255]"));
            }
        }
        if self.edge_low >= self.edge_high {
            return Err(PipelineError::validation(
                "edge_low",
                format!(
                    "must be below edge_high ({} >= {})",
                    self.edge_low, self.edge_high
                ),
            ));
        }

        if !(1..=31).contains(&self.bilateral_diameter) {
            return Err(PipelineError::validation(
                "bilateral_diameter",
                "must be within [1, 31]",
            ));
        }
        for (field, value) in [
            ("bilateral_sigma_color", self.bilateral_sigma_color),
            ("bilateral_sigma_space", self.bilateral_sigma_space),
            ("dog_sigma", self.dog_sigma),
            ("dog_phi", self.dog_phi),
        ] {
            positive(field, f64::from(value))?;
        }
        if !self.dog_k.is_finite() || self.dog_k <= 1.0 {
            return Err(PipelineError::validation("dog_k", "must be greater than 1"));
        }
        for (field, value) in [("dog_tau", self.dog_tau), ("dog_epsilon", self.dog_epsilon)] {
            if !value.is_finite() {
                return Err(PipelineError::validation(field, "must be finite"));
            }
        }

        for (field, value) in [
            ("merge_tolerance_mm", self.merge_tolerance_mm),
            ("simplify_tolerance_mm", self.simplify_tolerance_mm),
            ("dedupe_tolerance_mm", self.dedupe_tolerance_mm),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PipelineError::validation(field, "must be finite and >= 0"));
            }
        }

        positive("hatch_density", self.hatch_density)?;
        if !self.hatch_angle_deg.is_finite() {
            return Err(PipelineError::validation("hatch_angle_deg", "must be finite"));
        }
        if self.crosshatch_threshold > self.darkness_threshold {
            return Err(PipelineError::validation(
                "crosshatch_threshold",
                format!(
                    "must not exceed darkness_threshold ({} > {})",
                    self.crosshatch_threshold, self.darkness_threshold
                ),
            ));
        }
        if self.hatching_enabled && self.hatch_spacing_mm() < MIN_HATCH_SPACING_MM {
            return Err(PipelineError::validation(
                "hatch_density",
                format!("hatch spacing must be at least {MIN_HATCH_SPACING_MM} mm"),
            ));
        }

        for stage in StageKind::ALL {
            if self.providers.for_stage(stage).iter().any(|n| n.trim().is_empty()) {
                return Err(PipelineError::validation(
                    format!("providers.{stage}"),
                    "provider names must not be empty",
                ));
            }
        }

        positive("gcode_feed_rate", self.gcode_feed_rate)?;
        for (field, value) in [
            ("gcode_z_up", self.gcode_z_up),
            ("gcode_z_down", self.gcode_z_down),
        ] {
            if !value.is_finite() {
                return Err(PipelineError::validation(field, "must be finite"));
            }
        }

        Ok(())
    }
}

fn positive(field: &str, value: f64) -> Result<(), PipelineError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PipelineError::validation(
            field,
            format!("must be a finite value > 0, got {value}"),
        ))
    }
}
