//! Path simplification using the Ramer-Douglas-Peucker algorithm.
//!
//! Removes interior points that lie within `tolerance` of the chord
//! between their retained neighbours. Endpoints are always kept, so a
//! closed path stays closed and merged junctions stay joined.

use crate::types::{Point, Polyline};

/// Simplify a single polyline.
///
/// A tolerance of 0.0 preserves every point that deviates at all.
/// Polylines with fewer than 3 points are returned unchanged.
#[must_use = "returns the simplified polyline"]
pub fn simplify(polyline: &Polyline, tolerance: f64) -> Polyline {
    let points = polyline.points();
    if points.len() < 3 {
        return polyline.clone();
    }

    let last = points.len() - 1;
    let mut kept = vec![false; points.len()];
    kept[0] = true;
    kept[last] = true;

    // Explicit stack instead of recursion: traced outlines can run to
    // thousands of points.
    let mut spans = vec![(0, last)];
    while let Some((start, end)) = spans.pop() {
        if end <= start + 1 {
            continue;
        }
        let (max_idx, max_dist) = ((start + 1)..end)
            .map(|i| (i, perpendicular_distance(points[i], points[start], points[end])))
            .fold((start, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        if max_dist > tolerance {
            kept[max_idx] = true;
            spans.push((max_idx, end));
            spans.push((start, max_idx));
        }
    }

    Polyline::new(
        points
            .iter()
            .zip(&kept)
            .filter_map(|(&p, &k)| k.then_some(p))
            .collect(),
    )
}

/// Simplify every polyline independently.
#[must_use = "returns the simplified polylines"]
pub fn simplify_paths(polylines: &[Polyline], tolerance: f64) -> Vec<Polyline> {
    polylines.iter().map(|pl| simplify(pl, tolerance)).collect()
}

/// Distance from `p` to the infinite line through `a` and `b`, or to `a`
/// when the two coincide (the chord of a closed path).
fn perpendicular_distance(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx.mul_add(dx, dy * dy);

    if length_sq == 0.0 {
        return p.distance(a);
    }

    let cross = dx.mul_add(a.y - p.y, -(dy * (a.x - p.x)));
    cross.abs() / length_sq.sqrt()
}
