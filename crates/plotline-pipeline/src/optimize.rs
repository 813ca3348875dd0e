//! The Optimize stage: merge, simplify, sort, reloop, dedupe, then fit.
//!
//! The steps always run in that order so that a second pass over the
//! result converges instead of oscillating. Tolerances are given in canvas
//! millimetres; the provider estimates the fit scale up front and works
//! in pixel units until the final fit.

use crate::dedupe::dedupe_paths;
use crate::error::ProviderError;
use crate::fit::{fit_to_canvas, placement_for};
use crate::merge::merge_paths;
use crate::provider::{Provider, ProviderContext, StageKind, StagePayload};
use crate::simplify::simplify_paths;
use crate::types::{Point, Polyline};

const TRACING_TARGET: &str = "plotline_pipeline::optimize";

/// Reorder and orient paths to shorten pen-up travel.
///
/// Greedy nearest neighbour: starting from `start`, repeatedly visits the
/// unvisited path with the closest endpoint, reversing it when its end is
/// the closer one. Ties go to the lower index and to the forward
/// direction, so the order is deterministic.
#[must_use = "returns the reordered paths"]
pub fn sort_paths(paths: Vec<Polyline>, start: Point) -> Vec<Polyline> {
    let mut remaining: Vec<Option<Polyline>> = paths
        .into_iter()
        .filter(|p| !p.is_empty())
        .map(Some)
        .collect();
    let mut result = Vec::with_capacity(remaining.len());
    let mut cursor = start;

    for _ in 0..remaining.len() {
        let mut best: Option<(usize, bool)> = None;
        let mut best_dist = f64::INFINITY;

        for (j, candidate) in remaining.iter().enumerate() {
            let Some(candidate) = candidate else {
                continue;
            };
            let (Some(&c_start), Some(&c_end)) = (candidate.first(), candidate.last()) else {
                continue;
            };

            let dist_forward = cursor.distance_squared(c_start);
            let dist_reverse = cursor.distance_squared(c_end);
            let (dist, reversed) = if dist_forward <= dist_reverse {
                (dist_forward, false)
            } else {
                (dist_reverse, true)
            };

            if dist < best_dist {
                best_dist = dist;
                best = Some((j, reversed));
            }
        }

        let Some((best_idx, best_reversed)) = best else {
            break;
        };
        let Some(mut next) = remaining[best_idx].take() else {
            break;
        };
        if best_reversed {
            next = next.reversed();
        }
        if let Some(&end) = next.last() {
            cursor = end;
        }
        result.push(next);
    }

    result
}

/// Move the seam of every closed path to cut pen-up travel.
///
/// Paths keep their order. Each closed path is rotated to start (and end)
/// at the vertex that minimises the distance from the previous pen
/// position plus the distance on to the next path's start. The current
/// seam wins ties, so [`travel_length`] never grows. Open paths are left
/// alone.
#[must_use = "returns the relooped paths"]
pub fn reloop_paths(mut paths: Vec<Polyline>, start: Point) -> Vec<Polyline> {
    let mut cursor = start;
    for i in 0..paths.len() {
        if paths[i].is_closed() {
            let next = paths.get(i + 1).and_then(|p| p.first().copied());
            let ring = &paths[i].points()[..paths[i].len() - 1];
            let cost = |v: Point| cursor.distance(v) + next.map_or(0.0, |n| v.distance(n));

            let mut seam = 0;
            let mut best = cost(ring[0]);
            for (k, &v) in ring.iter().enumerate().skip(1) {
                let c = cost(v);
                if c < best {
                    best = c;
                    seam = k;
                }
            }
            if seam != 0 {
                let mut points = Vec::with_capacity(ring.len() + 1);
                points.extend_from_slice(&ring[seam..]);
                points.extend_from_slice(&ring[..seam]);
                points.push(ring[seam]);
                paths[i] = Polyline::new(points);
            }
        }
        if let Some(&end) = paths[i].last() {
            cursor = end;
        }
    }
    paths
}

/// Total pen-up distance from `start` through every path in order.
#[must_use]
pub fn travel_length(paths: &[Polyline], start: Point) -> f64 {
    let mut cursor = start;
    let mut total = 0.0;
    for path in paths {
        if let (Some(&first), Some(&last)) = (path.first(), path.last()) {
            total += cursor.distance(first);
            cursor = last;
        }
    }
    total
}

/// Default Optimize provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeOptimize;

impl Provider for NativeOptimize {
    fn stage(&self) -> StageKind {
        StageKind::Optimize
    }

    fn name(&self) -> &'static str {
        "native"
    }

    fn execute(
        &self,
        input: StagePayload,
        ctx: &ProviderContext<'_>,
    ) -> Result<StagePayload, ProviderError> {
        let doc = input.into_document()?;
        let p = ctx.params;
        let source = doc.source();

        let estimate = doc.bounding_box().unwrap_or_else(|| source.frame());
        let placement = placement_for(
            estimate,
            p.canvas_width_mm,
            p.canvas_height_mm,
            p.preserve_aspect,
        );
        let scale = placement.scale_x.min(placement.scale_y);
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ProviderError::Failed(format!(
                "cannot derive a canvas scale from bounds {estimate:?}"
            )));
        }
        let to_px = |mm: f64| mm / scale;

        let input_count = doc.len();
        let merged = merge_paths(doc.into_paths(), to_px(p.merge_tolerance_mm));
        let simplified = simplify_paths(&merged, to_px(p.simplify_tolerance_mm));
        let sorted = sort_paths(simplified, Point::new(0.0, 0.0));
        let relooped = reloop_paths(sorted, Point::new(0.0, 0.0));
        let deduped = dedupe_paths(relooped, to_px(p.dedupe_tolerance_mm));

        tracing::debug!(
            target: TRACING_TARGET,
            input = input_count,
            merged = merged.len(),
            output = deduped.len(),
            px_per_mm = 1.0 / scale,
            "Optimized paths"
        );

        Ok(StagePayload::Document(fit_to_canvas(
            deduped,
            source,
            p.canvas_width_mm,
            p.canvas_height_mm,
            p.preserve_aspect,
        )))
    }
}
