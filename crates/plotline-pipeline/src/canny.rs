//! Dual-threshold (Canny) edge detection.
//!
//! Derived from `imageproc::edges::canny` with three changes:
//!
//! 1. No internal Gaussian blur. Smoothing is the caller's choice (the
//!    default line extractor runs a bilateral filter first).
//! 2. Hysteresis visits all 8 neighbours and bounds-checks each one, so
//!    edges touching the image border cannot underflow a `u32`
//!    coordinate (<https://github.com/image-rs/imageproc/issues/705>).
//! 3. Pixel access is bounds-checked throughout.

use image::Luma;
use imageproc::definitions::Image;
use imageproc::filter::filter_clamped;
use imageproc::kernel;

use crate::types::GrayImage;

const EDGE: Luma<u8> = Luma([255]);

/// Run Sobel gradients, non-maximum suppression, and hysteresis.
///
/// Returns a binary image: 255 for edge pixels, 0 elsewhere. Images
/// narrower or shorter than 3 pixels have no interior and yield no edges.
/// `low_threshold` is clamped to at most `high_threshold`.
#[must_use = "returns the binary edge map"]
pub fn canny(image: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    let (w, h) = image.dimensions();
    if w < 3 || h < 3 {
        return GrayImage::new(w, h);
    }
    let low = low_threshold.min(high_threshold);

    let gx = filter_clamped(image, kernel::SOBEL_HORIZONTAL_3X3);
    let gy = filter_clamped(image, kernel::SOBEL_VERTICAL_3X3);
    let g: Image<Luma<f32>> = Image::from_fn(w, h, |x, y| {
        let h = f32::from(gx.get_pixel(x, y).0[0]);
        let v = f32::from(gy.get_pixel(x, y).0[0]);
        Luma([h.hypot(v)])
    });

    let thinned = non_maximum_suppression(&g, &gx, &gy);
    hysteresis(&thinned, low, high_threshold)
}

/// Keep only pixels that are local maxima across the gradient direction.
fn non_maximum_suppression(
    g: &Image<Luma<f32>>,
    gx: &Image<Luma<i16>>,
    gy: &Image<Luma<i16>>,
) -> Image<Luma<f32>> {
    let (w, h) = g.dimensions();
    let mut out = Image::from_pixel(w, h, Luma([0.0]));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let x_gradient = f32::from(gx.get_pixel(x, y).0[0]);
            let y_gradient = f32::from(gy.get_pixel(x, y).0[0]);
            let mut angle = y_gradient.atan2(x_gradient).to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }

            // The two neighbours across the edge, by quantized direction.
            let (a, b) = if (22.5..67.5).contains(&angle) {
                ((x + 1, y + 1), (x - 1, y - 1))
            } else if (67.5..112.5).contains(&angle) {
                ((x, y - 1), (x, y + 1))
            } else if (112.5..157.5).contains(&angle) {
                ((x - 1, y + 1), (x + 1, y - 1))
            } else {
                ((x - 1, y), (x + 1, y))
            };

            let pixel = g.get_pixel(x, y).0[0];
            if pixel >= g.get_pixel(a.0, a.1).0[0] && pixel >= g.get_pixel(b.0, b.1).0[0] {
                out.put_pixel(x, y, Luma([pixel]));
            }
        }
    }
    out
}

/// Promote pixels at or above `high` to edges, then grow each edge through
/// 8-connected pixels at or above `low`. Suppressed (zero) pixels never
/// qualify, whatever the thresholds. Non-recursive.
fn hysteresis(input: &Image<Luma<f32>>, low: f32, high: f32) -> GrayImage {
    let (w, h) = input.dimensions();
    let mut out = GrayImage::new(w, h);
    let mut stack = Vec::new();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let g = input.get_pixel(x, y).0[0];
            if g <= 0.0 || g < high || out.get_pixel(x, y).0[0] != 0 {
                continue;
            }
            out.put_pixel(x, y, EDGE);
            stack.push((x, y));
            while let Some((nx, ny)) = stack.pop() {
                for (dx, dy) in NEIGHBOURS {
                    let (Some(mx), Some(my)) =
                        (nx.checked_add_signed(dx), ny.checked_add_signed(dy))
                    else {
                        continue;
                    };
                    if mx >= w || my >= h {
                        continue;
                    }
                    let g = input.get_pixel(mx, my).0[0];
                    if g > 0.0 && g >= low && out.get_pixel(mx, my).0[0] == 0 {
                        out.put_pixel(mx, my, EDGE);
                        stack.push((mx, my));
                    }
                }
            }
        }
    }
    out
}

const NEIGHBOURS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];
