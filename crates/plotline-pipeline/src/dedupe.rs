//! Near-duplicate path removal.
//!
//! Two paths are duplicates when every vertex of each lies within the
//! tolerance of the other's polyline, regardless of direction. The first
//! occurrence is kept. Kept paths are indexed by their bounding boxes
//! grown by the tolerance, so each candidate is compared only against
//! paths that could possibly cover it.

use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};

use crate::types::{BoundingBox, Polyline};

const TRACING_TARGET: &str = "plotline_pipeline::dedupe";

type Footprint = GeomWithData<Rectangle<[f64; 2]>, usize>;

fn grown(b: BoundingBox, by: f64) -> ([f64; 2], [f64; 2]) {
    ([b.min_x - by, b.min_y - by], [b.max_x + by, b.max_y + by])
}

fn covers(a: &Polyline, b: &Polyline, tolerance: f64) -> bool {
    b.points().iter().all(|&p| a.distance_to(p) <= tolerance)
}

/// `true` when `a` and `b` trace the same stroke within `tolerance`.
#[must_use]
pub fn is_duplicate(a: &Polyline, b: &Polyline, tolerance: f64) -> bool {
    covers(a, b, tolerance) && covers(b, a, tolerance)
}

/// Drop every path that duplicates an earlier one.
#[must_use = "returns the deduplicated paths"]
pub fn dedupe_paths(paths: Vec<Polyline>, tolerance: f64) -> Vec<Polyline> {
    let input_count = paths.len();
    let mut kept: Vec<Polyline> = Vec::with_capacity(input_count);
    let mut index: RTree<Footprint> = RTree::new();

    for path in paths {
        let Some(bbox) = path.bounding_box() else {
            continue;
        };
        let (lo, hi) = grown(bbox, tolerance);
        let duplicate = index
            .locate_in_envelope_intersecting(&AABB::from_corners(lo, hi))
            .any(|f| is_duplicate(&kept[f.data], &path, tolerance));
        if duplicate {
            continue;
        }
        index.insert(GeomWithData::new(Rectangle::from_corners(lo, hi), kept.len()));
        kept.push(path);
    }

    tracing::debug!(
        target: TRACING_TARGET,
        input = input_count,
        removed = input_count - kept.len(),
        tolerance,
        "Removed duplicate paths"
    );
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    fn line(points: &[(f64, f64)]) -> Polyline {
        Polyline::new(points.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    #[test]
    fn reversed_copy_is_removed() {
        let a = line(&[(0.0, 0.0), (10.0, 0.0), (10.0, 5.0)]);
        let b = line(&[(10.0, 5.05), (10.0, 0.0), (0.05, 0.0)]);
        assert_eq!(dedupe_paths(vec![a.clone(), b], 0.1), vec![a]);
    }

    #[test]
    fn first_occurrence_is_kept() {
        let a = line(&[(0.0, 0.0), (10.0, 0.0)]);
        let b = line(&[(0.0, 0.02), (10.0, 0.02)]);
        let c = line(&[(0.0, 5.0), (10.0, 5.0)]);
        let result = dedupe_paths(vec![a.clone(), c.clone(), b], 0.1);
        assert_eq!(result, vec![a, c]);
    }

    #[test]
    fn partial_overlap_is_not_a_duplicate() {
        let long = line(&[(0.0, 0.0), (10.0, 0.0)]);
        let short = line(&[(2.0, 0.0), (4.0, 0.0)]);
        assert!(!is_duplicate(&long, &short, 0.1));
        assert_eq!(dedupe_paths(vec![long, short], 0.1).len(), 2);
    }

    #[test]
    fn zero_tolerance_removes_exact_copies_only() {
        let a = line(&[(0.0, 0.0), (3.0, 4.0)]);
        let b = line(&[(0.0, 0.0), (3.0, 4.001)]);
        assert_eq!(dedupe_paths(vec![a.clone(), a.clone(), b], 0.0).len(), 2);
    }

    #[test]
    fn dedupe_is_idempotent() {
        let paths = vec![
            line(&[(0.0, 0.0), (5.0, 0.0)]),
            line(&[(5.0, 0.0), (0.0, 0.0)]),
            line(&[(0.0, 1.0), (5.0, 1.0)]),
        ];
        let once = dedupe_paths(paths, 0.1);
        assert_eq!(dedupe_paths(once.clone(), 0.1), once);
    }
}
