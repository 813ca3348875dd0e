//! Summary statistics attached to a finished job.

use plotline_pipeline::{BoundingBox, DocumentStats, Polyline};

/// Count, measure, and bound `paths` (canvas millimetres).
///
/// Travel is the pen-up distance between consecutive paths; the move to
/// the first path is not counted.
#[must_use]
pub fn document_stats(paths: &[Polyline]) -> DocumentStats {
    let bounds = paths
        .iter()
        .filter_map(Polyline::bounding_box)
        .reduce(BoundingBox::union);
    let travel_length_mm = paths
        .windows(2)
        .filter_map(|w| Some(w[0].last()?.distance(*w[1].first()?)))
        .sum();

    DocumentStats {
        path_count: paths.len(),
        point_count: paths.iter().map(Polyline::len).sum(),
        total_length_mm: paths.iter().map(Polyline::length).sum(),
        travel_length_mm,
        bounds,
        width_mm: bounds.map_or(0.0, |b| b.width()),
        height_mm: bounds.map_or(0.0, |b| b.height()),
    }
}

#[cfg(test)]
mod tests {
    use plotline_pipeline::Point;

    use super::*;

    fn line(points: &[(f64, f64)]) -> Polyline {
        Polyline::new(points.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    #[test]
    fn empty_document_has_zero_stats() {
        let stats = document_stats(&[]);
        assert_eq!(stats.path_count, 0);
        assert!(stats.bounds.is_none());
        assert!(stats.width_mm.abs() < f64::EPSILON);
    }

    #[test]
    fn lengths_and_travel_are_summed() {
        let stats = document_stats(&[
            line(&[(0.0, 0.0), (3.0, 4.0)]),
            line(&[(3.0, 8.0), (3.0, 10.0), (6.0, 10.0)]),
        ]);
        assert_eq!(stats.path_count, 2);
        assert_eq!(stats.point_count, 5);
        assert!((stats.total_length_mm - 10.0).abs() < 1e-12);
        assert!((stats.travel_length_mm - 4.0).abs() < 1e-12);
        assert!((stats.width_mm - 6.0).abs() < 1e-12);
        assert!((stats.height_mm - 10.0).abs() < 1e-12);
    }
}
