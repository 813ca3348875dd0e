//! Canvas fit: the final Optimize step.
//!
//! Maps pixel-space paths onto the canvas with one affine transform,
//! centred, uniform unless `preserve_aspect` is off.

use crate::types::{BoundingBox, Dimensions, Placement, Point, Polyline, VectorDocument};

const TRACING_TARGET: &str = "plotline_pipeline::fit";

/// Placement that maps `content` into a `canvas_width` x `canvas_height`
/// canvas.
///
/// A zero-extent axis borrows the other axis's scale; a single point gets
/// scale 1. Either way the content lands centred.
#[must_use]
pub fn placement_for(
    content: BoundingBox,
    canvas_width: f64,
    canvas_height: f64,
    preserve_aspect: bool,
) -> Placement {
    let (w, h) = (content.width(), content.height());
    let sx = (w > 0.0).then(|| canvas_width / w);
    let sy = (h > 0.0).then(|| canvas_height / h);

    let (scale_x, scale_y) = if preserve_aspect {
        let s = match (sx, sy) {
            (Some(a), Some(b)) => a.min(b),
            (Some(s), None) | (None, Some(s)) => s,
            (None, None) => 1.0,
        };
        (s, s)
    } else {
        (
            sx.or(sy).unwrap_or(1.0),
            sy.or(sx).unwrap_or(1.0),
        )
    };

    Placement {
        scale_x,
        scale_y,
        offset_x: w.mul_add(-scale_x, canvas_width) / 2.0 - content.min_x * scale_x,
        offset_y: h.mul_add(-scale_y, canvas_height) / 2.0 - content.min_y * scale_y,
        canvas_width_mm: canvas_width,
        canvas_height_mm: canvas_height,
    }
}

/// Fit `paths` (pixel space, traced from a `source` raster) onto the
/// canvas.
///
/// The transform is derived from the exact bounds of the paths, or from
/// the source frame when there are none. Every mapped point is clamped
/// into the canvas to absorb rounding.
#[must_use = "returns the placed document"]
pub fn fit_to_canvas(
    paths: Vec<Polyline>,
    source: Dimensions,
    canvas_width: f64,
    canvas_height: f64,
    preserve_aspect: bool,
) -> VectorDocument {
    let content = paths
        .iter()
        .filter_map(Polyline::bounding_box)
        .reduce(BoundingBox::union)
        .unwrap_or_else(|| source.frame());
    let placement = placement_for(content, canvas_width, canvas_height, preserve_aspect);

    let placed: Vec<Polyline> = paths
        .into_iter()
        .map(|path| {
            Polyline::new(
                path.points()
                    .iter()
                    .map(|&p| {
                        let mm = placement.apply(p);
                        Point::new(mm.x.clamp(0.0, canvas_width), mm.y.clamp(0.0, canvas_height))
                    })
                    .collect(),
            )
        })
        .collect();

    tracing::debug!(
        target: TRACING_TARGET,
        scale_x = placement.scale_x,
        scale_y = placement.scale_y,
        offset_x = placement.offset_x,
        offset_y = placement.offset_y,
        "Fitted document to canvas"
    );
    VectorDocument::placed(placed, source, placement)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SOURCE: Dimensions = Dimensions {
        width: 100,
        height: 100,
    };

    fn line(points: &[(f64, f64)]) -> Polyline {
        Polyline::new(points.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn square_fills_square_canvas() {
        let doc = fit_to_canvas(
            vec![line(&[(25.0, 25.0), (75.0, 25.0), (75.0, 75.0), (25.0, 75.0), (25.0, 25.0)])],
            SOURCE,
            50.0,
            50.0,
            true,
        );
        let bb = doc.bounding_box().unwrap();
        assert!(approx(bb.min_x, 0.0) && approx(bb.max_x, 50.0));
        assert!(approx(bb.min_y, 0.0) && approx(bb.max_y, 50.0));
        assert!(doc.placement().is_some());
    }

    #[test]
    fn aspect_is_preserved_and_centred() {
        let doc = fit_to_canvas(vec![line(&[(0.0, 0.0), (20.0, 10.0)])], SOURCE, 100.0, 100.0, true);
        let bb = doc.bounding_box().unwrap();
        assert!(approx(bb.width(), 100.0));
        assert!(approx(bb.height(), 50.0));
        assert!(approx(bb.min_y, 25.0));
    }

    #[test]
    fn independent_axes_stretch() {
        let doc = fit_to_canvas(vec![line(&[(0.0, 0.0), (20.0, 10.0)])], SOURCE, 100.0, 80.0, false);
        let bb = doc.bounding_box().unwrap();
        assert!(approx(bb.width(), 100.0));
        assert!(approx(bb.height(), 80.0));
    }

    #[test]
    fn horizontal_line_borrows_width_scale() {
        let p = placement_for(
            BoundingBox {
                min_x: 10.0,
                min_y: 5.0,
                max_x: 30.0,
                max_y: 5.0,
            },
            40.0,
            40.0,
            true,
        );
        assert!(approx(p.scale_x, 2.0) && approx(p.scale_y, 2.0));
        assert!(approx(p.apply(Point::new(10.0, 5.0)).y, 20.0));
    }

    #[test]
    fn empty_document_uses_source_frame() {
        let doc = fit_to_canvas(Vec::new(), SOURCE, 200.0, 100.0, true);
        assert!(doc.is_empty());
        let p = doc.placement().unwrap();
        assert!(approx(p.scale_x, 1.0));
        assert!(approx(p.offset_x, 50.0));
    }

    #[test]
    fn everything_lands_inside_canvas() {
        let doc = fit_to_canvas(
            vec![
                line(&[(3.0, 7.0), (91.5, 13.25)]),
                line(&[(40.0, 99.0), (2.0, 55.5), (77.7, 0.1)]),
            ],
            SOURCE,
            297.0,
            210.0,
            true,
        );
        let canvas = doc.placement().unwrap().canvas();
        assert!(canvas.contains(&doc.bounding_box().unwrap(), 0.0));
    }
}
