//! Endpoint merging: join paths whose ends nearly touch.
//!
//! Paths are processed in order. Each open path first grows from its end,
//! then from its start, by absorbing the nearest unclaimed path whose
//! endpoint lies within the tolerance (reversing it when its far end is
//! the one that matched). A path whose own ends end up within tolerance is
//! closed. Endpoints live in an R-tree so each lookup is local.
//!
//! Running the merge on its own output changes nothing: every surviving
//! open end was checked against every later path, and closed paths are
//! left alone.

use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::types::{Point, Polyline};

const TRACING_TARGET: &str = "plotline_pipeline::merge";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PathEnd {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EndpointRef {
    path: usize,
    end: PathEnd,
}

type Endpoint = GeomWithData<[f64; 2], EndpointRef>;

fn endpoint(p: Point, path: usize, end: PathEnd) -> Endpoint {
    GeomWithData::new([p.x, p.y], EndpointRef { path, end })
}

/// Spatial index over the endpoints of every unclaimed open path.
struct Endpoints {
    tree: RTree<Endpoint>,
}

impl Endpoints {
    fn new(slots: &[Option<Vec<Point>>]) -> Self {
        let mut entries = Vec::new();
        for (i, slot) in slots.iter().enumerate() {
            let Some(points) = slot else { continue };
            if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
                entries.push(endpoint(first, i, PathEnd::Start));
                entries.push(endpoint(last, i, PathEnd::End));
            }
        }
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    fn remove_path(&mut self, path: usize, points: &[Point]) {
        if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
            self.tree.remove(&endpoint(first, path, PathEnd::Start));
            self.tree.remove(&endpoint(last, path, PathEnd::End));
        }
    }

    /// Closest endpoint within `tolerance` of `at`. Ties go to the lower
    /// path index, then to a start over an end.
    fn nearest(&self, at: Point, tolerance: f64) -> Option<EndpointRef> {
        self.tree
            .locate_within_distance([at.x, at.y], tolerance * tolerance)
            .map(|e| {
                let [x, y] = *e.geom();
                (at.distance_squared(Point::new(x, y)), e.data)
            })
            .min_by(|(da, a), (db, b)| {
                da.total_cmp(db)
                    .then(a.path.cmp(&b.path))
                    .then(a.end.cmp(&b.end))
            })
            .map(|(_, r)| r)
    }
}

/// Join `next` onto `tail`, dropping an exactly repeated junction point.
fn append(tail: &mut Vec<Point>, next: Vec<Point>) {
    let skip = usize::from(tail.last() == next.first());
    tail.extend(next.into_iter().skip(skip));
}

/// Grow `points` from its last point until no unclaimed endpoint is near.
fn extend_tail(
    points: &mut Vec<Point>,
    slots: &mut [Option<Vec<Point>>],
    endpoints: &mut Endpoints,
    tolerance: f64,
) -> usize {
    let mut absorbed = 0;
    while let Some(&tail) = points.last() {
        let Some(hit) = endpoints.nearest(tail, tolerance) else {
            break;
        };
        let Some(mut other) = slots[hit.path].take() else {
            break;
        };
        endpoints.remove_path(hit.path, &other);
        if hit.end == PathEnd::End {
            other.reverse();
        }
        append(points, other);
        absorbed += 1;
    }
    absorbed
}

/// Merge paths whose endpoints lie within `tolerance` of each other.
///
/// Closed paths and paths with fewer than two points pass through
/// untouched. Survivors keep their relative order.
#[must_use = "returns the merged paths"]
pub fn merge_paths(paths: Vec<Polyline>, tolerance: f64) -> Vec<Polyline> {
    let input_count = paths.len();
    let mut fixed: Vec<Option<Polyline>> = Vec::with_capacity(input_count);
    let mut slots: Vec<Option<Vec<Point>>> = Vec::with_capacity(input_count);
    for path in paths {
        if path.len() >= 2 && !path.is_closed() {
            fixed.push(None);
            slots.push(Some(path.into_points()));
        } else {
            fixed.push(Some(path));
            slots.push(None);
        }
    }

    let mut endpoints = Endpoints::new(&slots);
    let mut joins = 0;
    for i in 0..slots.len() {
        let Some(mut points) = slots[i].take() else {
            continue;
        };
        endpoints.remove_path(i, &points);

        joins += extend_tail(&mut points, &mut slots, &mut endpoints, tolerance);
        points.reverse();
        joins += extend_tail(&mut points, &mut slots, &mut endpoints, tolerance);
        points.reverse();

        if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
            if points.len() >= 3 && first != last && first.distance(last) <= tolerance {
                points.push(first);
            }
        }
        fixed[i] = Some(Polyline::new(points));
    }

    let merged: Vec<Polyline> = fixed.into_iter().flatten().collect();
    tracing::debug!(
        target: TRACING_TARGET,
        input = input_count,
        output = merged.len(),
        joins,
        tolerance,
        "Merged path endpoints"
    );
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(points: &[(f64, f64)]) -> Polyline {
        Polyline::new(points.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    #[test]
    fn four_edges_form_one_closed_loop() {
        let edges = vec![
            line(&[(0.0, 0.0), (10.0, 0.0)]),
            line(&[(10.0, 10.0), (10.2, 0.1)]),
            line(&[(10.1, 10.0), (0.0, 10.0)]),
            line(&[(0.1, 0.2), (0.0, 10.2)]),
        ];
        let merged = merge_paths(edges, 0.5);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].is_closed());
        assert_eq!(merged[0].first(), Some(&Point::new(0.0, 0.0)));
    }

    #[test]
    fn exact_junctions_are_not_duplicated() {
        let merged = merge_paths(
            vec![
                line(&[(0.0, 0.0), (5.0, 0.0)]),
                line(&[(5.0, 0.0), (9.0, 0.0)]),
            ],
            0.1,
        );
        assert_eq!(merged, vec![line(&[(0.0, 0.0), (5.0, 0.0), (9.0, 0.0)])]);
    }

    #[test]
    fn start_is_extended_after_end() {
        let merged = merge_paths(
            vec![
                line(&[(5.0, 0.0), (9.0, 0.0)]),
                line(&[(0.0, 0.0), (5.0, 0.0)]),
            ],
            0.1,
        );
        assert_eq!(merged, vec![line(&[(0.0, 0.0), (5.0, 0.0), (9.0, 0.0)])]);
    }

    #[test]
    fn distant_paths_are_untouched() {
        let paths = vec![
            line(&[(0.0, 0.0), (5.0, 0.0)]),
            line(&[(0.0, 5.0), (5.0, 5.0)]),
        ];
        assert_eq!(merge_paths(paths.clone(), 1.0), paths);
    }

    #[test]
    fn closed_paths_pass_through() {
        let ring = line(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 0.0)]);
        let tail = line(&[(0.0, 0.0), (-3.0, -3.0)]);
        let merged = merge_paths(vec![ring.clone(), tail.clone()], 0.5);
        assert_eq!(merged, vec![ring, tail]);
    }

    #[test]
    fn nearest_candidate_wins() {
        let merged = merge_paths(
            vec![
                line(&[(0.0, 0.0), (10.0, 0.0)]),
                line(&[(10.4, 0.0), (10.4, 8.0)]),
                line(&[(10.1, 0.0), (20.0, 0.0)]),
            ],
            0.5,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].last(), Some(&Point::new(20.0, 0.0)));
    }

    #[test]
    fn merge_is_idempotent() {
        let paths = vec![
            line(&[(0.0, 0.0), (3.0, 0.0)]),
            line(&[(3.2, 0.0), (6.0, 1.0)]),
            line(&[(20.0, 20.0), (25.0, 20.0)]),
            line(&[(6.1, 1.1), (6.0, 7.0), (0.0, 7.0), (0.1, 0.3)]),
            line(&[(25.3, 20.0), (30.0, 25.0)]),
            line(&[(50.0, 50.0), (51.0, 51.0)]),
        ];
        let once = merge_paths(paths, 0.5);
        let twice = merge_paths(once.clone(), 0.5);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
        assert!(once[0].is_closed());
    }

    #[test]
    fn zero_tolerance_joins_only_touching_ends() {
        let merged = merge_paths(
            vec![
                line(&[(0.0, 0.0), (1.0, 0.0)]),
                line(&[(1.0, 0.0), (2.0, 0.0)]),
                line(&[(2.001, 0.0), (3.0, 0.0)]),
            ],
            0.0,
        );
        assert_eq!(merged.len(), 2);
    }
}
