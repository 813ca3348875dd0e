//! Edge-preserving bilateral smoothing for line extraction.
//!
//! Each output pixel is a weighted mean over a circular window of
//! diameter `d`, weighted by both spatial distance and intensity
//! difference, so flat regions are smoothed while strong steps survive
//! for the Canny detector. Border pixels are clamped.

use image::Luma;

use crate::types::GrayImage;

/// Apply a bilateral filter to a grayscale image.
///
/// `diameter` is the window size in pixels (`radius = diameter / 2`).
/// A radius of zero, or a non-positive sigma, returns the image unchanged.
#[must_use = "returns the filtered image"]
pub fn bilateral_filter(
    image: &GrayImage,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> GrayImage {
    let radius = i64::from(diameter / 2);
    if radius == 0 || sigma_color <= 0.0 || sigma_space <= 0.0 {
        return image.clone();
    }

    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let color_coeff = -0.5 / (sigma_color * sigma_color);

    // Offsets inside the circular window, with their spatial weights.
    let mut window: Vec<(i64, i64, f32)> = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = dx * dx + dy * dy;
            if r2 > radius * radius {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let weight = (r2 as f32 * space_coeff).exp();
            window.push((dx, dy, weight));
        }
    }

    let color_lut: [f32; 256] = std::array::from_fn(|d| {
        #[allow(clippy::cast_precision_loss)]
        let d = d as f32;
        (d * d * color_coeff).exp()
    });

    let (w, h) = image.dimensions();
    let max_x = i64::from(w) - 1;
    let max_y = i64::from(h) - 1;
    let at = |x: i64, y: i64| {
        let x = u32::try_from(x.clamp(0, max_x)).unwrap_or(0);
        let y = u32::try_from(y.clamp(0, max_y)).unwrap_or(0);
        image.get_pixel(x, y).0[0]
    };

    GrayImage::from_fn(w, h, |x, y| {
        let (cx, cy) = (i64::from(x), i64::from(y));
        let center = image.get_pixel(x, y).0[0];
        let mut sum = 0.0_f32;
        let mut norm = 0.0_f32;
        for &(dx, dy, space) in &window {
            let value = at(cx + dx, cy + dy);
            let weight = space * color_lut[usize::from(value.abs_diff(center))];
            sum += weight * f32::from(value);
            norm += weight;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let out = (sum / norm).round().clamp(0.0, 255.0) as u8;
        Luma([out])
    })
}
