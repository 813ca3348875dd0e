//! The `scanline` Hatch provider.
//!
//! Fills dark regions of the tone map with parallel strokes. Works in
//! canvas millimetres: the grayscale raster recorded after Preprocess is
//! laid over the canvas through the document's [`Placement`], then swept
//! by evenly spaced scanlines. Each run of samples darker than the
//! threshold becomes one two-point path. A second sweep, rotated by 90
//! degrees against a lower threshold, adds the crosshatch.

use crate::dedupe::dedupe_paths;
use crate::error::ProviderError;
use crate::merge::merge_paths;
use crate::provider::{Provider, ProviderContext, StageKind, StagePayload};
use crate::types::{BoundingBox, GrayImage, Placement, Point, Polyline};

const TRACING_TARGET: &str = "plotline_pipeline::hatch";

/// One sweep of parallel scanlines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HatchPass {
    /// Distance between neighbouring lines, in millimetres.
    pub spacing: f64,
    /// Counter-clockwise from +x, in degrees, with y pointing down.
    pub angle_deg: f64,
    /// Samples strictly darker than this are covered.
    pub threshold: u8,
}

/// The canvas area the tone map covers.
fn coverage(gray: &GrayImage, placement: &Placement) -> Option<BoundingBox> {
    let a = placement.apply(Point::new(0.0, 0.0));
    let b = placement.apply(Point::new(
        f64::from(gray.width()),
        f64::from(gray.height()),
    ));
    let canvas = placement.canvas();
    let region = BoundingBox {
        min_x: a.x.min(b.x).max(canvas.min_x),
        min_y: a.y.min(b.y).max(canvas.min_y),
        max_x: a.x.max(b.x).min(canvas.max_x),
        max_y: a.y.max(b.y).min(canvas.max_y),
    };
    (region.width() > 0.0 && region.height() > 0.0).then_some(region)
}

fn inside(region: &BoundingBox, p: Point) -> bool {
    p.x >= region.min_x && p.x <= region.max_x && p.y >= region.min_y && p.y <= region.max_y
}

/// Tone under canvas point `p`; pixels on the far edge clamp inward.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn tone_at(gray: &GrayImage, placement: &Placement, p: Point) -> u8 {
    let px = placement.invert(p);
    let x = (px.x.floor().max(0.0) as u32).min(gray.width() - 1);
    let y = (px.y.floor().max(0.0) as u32).min(gray.height() - 1);
    gray.get_pixel(x, y).0[0]
}

/// Generate the strokes of one pass.
///
/// Scanline `k` passes through `k * spacing * n`, where `n` is the unit
/// normal of the stroke direction, so lines of the same angle line up
/// across calls. Samples along each line are at most half a pixel and
/// half a spacing apart.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn hatch_pass(gray: &GrayImage, placement: &Placement, pass: HatchPass) -> Vec<Polyline> {
    if gray.width() == 0 || gray.height() == 0 || pass.spacing <= 0.0 || pass.threshold == 0 {
        return Vec::new();
    }
    let Some(region) = coverage(gray, placement) else {
        return Vec::new();
    };

    let (sin, cos) = pass.angle_deg.to_radians().sin_cos();
    let dir = Point::new(cos, -sin);
    let normal = Point::new(sin, cos);
    let corners = [
        Point::new(region.min_x, region.min_y),
        Point::new(region.max_x, region.min_y),
        Point::new(region.min_x, region.max_y),
        Point::new(region.max_x, region.max_y),
    ];
    let project = |axis: Point| {
        corners.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
            let v = c.x.mul_add(axis.x, c.y * axis.y);
            (lo.min(v), hi.max(v))
        })
    };
    let (n_lo, n_hi) = project(normal);
    let (t_lo, t_hi) = project(dir);

    let pixel_mm = placement.scale_x.abs().min(placement.scale_y.abs());
    let step = (pixel_mm / 2.0).min(pass.spacing / 2.0);
    let samples = ((t_hi - t_lo) / step).ceil() as i64;
    let first_line = (n_lo / pass.spacing).ceil() as i64;
    let last_line = (n_hi / pass.spacing).floor() as i64;

    let mut strokes = Vec::new();
    for k in first_line..=last_line {
        #[allow(clippy::cast_precision_loss)]
        let offset = k as f64 * pass.spacing;
        let base = Point::new(normal.x * offset, normal.y * offset);
        let mut run: Option<(Point, Point)> = None;

        for i in 0..=samples {
            #[allow(clippy::cast_precision_loss)]
            let t = (i as f64).mul_add(step, t_lo).min(t_hi);
            let p = Point::new(dir.x.mul_add(t, base.x), dir.y.mul_add(t, base.y));
            let dark = inside(&region, p) && tone_at(gray, placement, p) < pass.threshold;
            run = match (run, dark) {
                (None, true) => Some((p, p)),
                (Some((start, _)), true) => Some((start, p)),
                (Some((start, end)), false) => {
                    if start != end {
                        strokes.push(Polyline::new(vec![start, end]));
                    }
                    None
                }
                (None, false) => None,
            };
        }
        if let Some((start, end)) = run {
            if start != end {
                strokes.push(Polyline::new(vec![start, end]));
            }
        }
    }
    strokes
}

/// Default Hatch provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanlineHatch;

impl Provider for ScanlineHatch {
    fn stage(&self) -> StageKind {
        StageKind::Hatch
    }

    fn name(&self) -> &'static str {
        "scanline"
    }

    fn execute(
        &self,
        input: StagePayload,
        ctx: &ProviderContext<'_>,
    ) -> Result<StagePayload, ProviderError> {
        let shading = input.into_shading()?;
        let doc = shading.document;
        let Some(placement) = doc.placement().copied() else {
            return Err(ProviderError::Failed(
                "hatching needs a document placed on the canvas".to_owned(),
            ));
        };
        let p = ctx.params;
        let spacing = p.hatch_spacing_mm();

        let mut strokes = hatch_pass(&shading.gray, &placement, HatchPass {
            spacing,
            angle_deg: p.hatch_angle_deg,
            threshold: p.darkness_threshold,
        });
        let primary = strokes.len();
        if p.crosshatch_threshold > 0 {
            strokes.extend(hatch_pass(&shading.gray, &placement, HatchPass {
                spacing,
                angle_deg: p.hatch_angle_deg + 90.0,
                threshold: p.crosshatch_threshold,
            }));
        }
        let cross = strokes.len() - primary;

        let mut paths = doc.paths().to_vec();
        paths.extend(strokes);
        let merged = merge_paths(paths, p.merge_tolerance_mm);
        let deduped = dedupe_paths(merged, p.dedupe_tolerance_mm);

        tracing::debug!(
            target: TRACING_TARGET,
            primary,
            cross,
            spacing,
            output = deduped.len(),
            "Hatched dark regions"
        );
        Ok(StagePayload::Document(doc.with_paths(deduped)))
    }
}
