//! LineExtract providers.
//!
//! Both produce a two-level raster where 255 marks a line pixel and 0 the
//! background:
//!
//! - `bilateral_canny` (default): bilateral smoothing followed by Canny
//!   hysteresis between `edge_low` and `edge_high`.
//! - `dog`: extended difference of Gaussians, a stylized mode that yields
//!   thicker, ink-like strokes on dark detail.

use image::Luma;
use imageproc::definitions::Image;

use crate::bilateral::bilateral_filter;
use crate::error::ProviderError;
use crate::preprocess::luma;
use crate::provider::{Provider, ProviderContext, StageKind, StagePayload};
use crate::types::GrayImage;

const TRACING_TARGET: &str = "plotline_pipeline::edge";

/// Bilateral smoothing then Canny.
///
/// Thresholds are used as given. Pixels with no gradient are never edges,
/// so a low threshold of zero only admits weak edges next to strong ones.
#[must_use = "returns the binary edge map"]
pub fn bilateral_canny(
    gray: &GrayImage,
    low_threshold: f32,
    high_threshold: f32,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> GrayImage {
    let smoothed = bilateral_filter(gray, diameter, sigma_color, sigma_space);
    crate::canny::canny(&smoothed, low_threshold, high_threshold)
}

/// Knobs of the extended difference-of-Gaussians operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DogParams {
    pub sigma: f32,
    pub k: f32,
    pub tau: f32,
    pub epsilon: f32,
    pub phi: f32,
}

/// Extended difference of Gaussians, thresholded to two levels.
///
/// With intensities scaled to `[0, 1]`, `d = G(sigma) - tau * G(sigma * k)`.
/// The soft response is `1 + tanh(phi * d)` where `d < epsilon` and `1`
/// elsewhere; pixels whose response falls below one half are lines.
#[must_use = "returns the binary line map"]
pub fn xdog(gray: &GrayImage, params: DogParams) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 || params.sigma <= 0.0 {
        return GrayImage::new(w, h);
    }
    let unit: Image<Luma<f32>> =
        Image::from_fn(w, h, |x, y| Luma([f32::from(gray.get_pixel(x, y).0[0]) / 255.0]));
    let g1 = imageproc::filter::gaussian_blur_f32(&unit, params.sigma);
    let g2 = imageproc::filter::gaussian_blur_f32(&unit, params.sigma * params.k);

    let out = GrayImage::from_fn(w, h, |x, y| {
        let d = params.tau.mul_add(-g2.get_pixel(x, y).0[0], g1.get_pixel(x, y).0[0]);
        let response = if d < params.epsilon {
            1.0 + (params.phi * d).tanh()
        } else {
            1.0
        };
        Luma([if response < 0.5 { 255 } else { 0 }])
    });
    tracing::debug!(
        target: TRACING_TARGET,
        line_pixels = out.pixels().filter(|p| p.0[0] > 0).count(),
        "XDoG extraction complete"
    );
    out
}

/// Default LineExtract provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct BilateralCanny;

impl Provider for BilateralCanny {
    fn stage(&self) -> StageKind {
        StageKind::LineExtract
    }

    fn name(&self) -> &'static str {
        "bilateral_canny"
    }

    fn execute(
        &self,
        input: StagePayload,
        ctx: &ProviderContext<'_>,
    ) -> Result<StagePayload, ProviderError> {
        let raster = input.into_raster()?;
        let p = ctx.params;
        let edges = bilateral_canny(
            &luma(&raster),
            p.edge_low,
            p.edge_high,
            p.bilateral_diameter,
            p.bilateral_sigma_color,
            p.bilateral_sigma_space,
        );
        tracing::debug!(
            target: TRACING_TARGET,
            edge_pixels = edges.pixels().filter(|px| px.0[0] > 0).count(),
            "Bilateral Canny complete"
        );
        Ok(StagePayload::LineArt(edges))
    }
}

/// Stylized LineExtract provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct DifferenceOfGaussians;

impl Provider for DifferenceOfGaussians {
    fn stage(&self) -> StageKind {
        StageKind::LineExtract
    }

    fn name(&self) -> &'static str {
        "dog"
    }

    fn execute(
        &self,
        input: StagePayload,
        ctx: &ProviderContext<'_>,
    ) -> Result<StagePayload, ProviderError> {
        let raster = input.into_raster()?;
        let p = ctx.params;
        Ok(StagePayload::LineArt(xdog(&luma(&raster), DogParams {
            sigma: p.dog_sigma,
            k: p.dog_k,
            tau: p.dog_tau,
            epsilon: p.dog_epsilon,
            phi: p.dog_phi,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ProcessingParams;

    fn dog_defaults() -> DogParams {
        DogParams {
            sigma: ProcessingParams::DEFAULT_DOG_SIGMA,
            k: ProcessingParams::DEFAULT_DOG_K,
            tau: ProcessingParams::DEFAULT_DOG_TAU,
            epsilon: ProcessingParams::DEFAULT_DOG_EPSILON,
            phi: ProcessingParams::DEFAULT_DOG_PHI,
        }
    }

    fn edge_count(img: &GrayImage) -> usize {
        img.pixels().filter(|p| p.0[0] > 0).count()
    }

    #[test]
    fn blank_image_produces_no_edges() {
        let img = GrayImage::from_pixel(20, 20, Luma([128]));
        let edges = bilateral_canny(&img, 50.0, 150.0, 9, 75.0, 75.0);
        assert_eq!(edges.dimensions(), (20, 20));
        assert_eq!(edge_count(&edges), 0);
    }

    #[test]
    fn zero_thresholds_leave_flat_images_empty() {
        let img = GrayImage::from_pixel(20, 20, Luma([128]));
        let edges = bilateral_canny(&img, 0.0, 0.0, 9, 75.0, 75.0);
        assert_eq!(edge_count(&edges), 0);
    }

    #[test]
    fn zero_low_threshold_is_used_as_given() {
        let img = GrayImage::from_fn(40, 40, |x, y| {
            let inside = (10..30).contains(&x) && (10..30).contains(&y);
            Luma([if inside { 40 } else { 200 + u8::try_from((x * 3 + y) % 7).unwrap_or(0) }])
        });
        let strict = bilateral_canny(&img, 50.0, 150.0, 5, 75.0, 75.0);
        let loose = bilateral_canny(&img, 0.0, 150.0, 5, 75.0, 75.0);
        for (x, y, p) in strict.enumerate_pixels() {
            if p.0[0] > 0 {
                assert_eq!(loose.get_pixel(x, y).0[0], 255, "({x}, {y}) lost");
            }
        }
        assert!(edge_count(&loose) >= edge_count(&strict));
        assert_eq!(loose.get_pixel(20, 20).0[0], 0);
    }

    #[test]
    fn square_outline_is_detected() {
        let img = GrayImage::from_fn(40, 40, |x, y| {
            if (10..30).contains(&x) && (10..30).contains(&y) {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        let edges = bilateral_canny(&img, 50.0, 150.0, 9, 75.0, 75.0);
        assert!(edge_count(&edges) >= 4 * 18);
        assert_eq!(edges.get_pixel(20, 20).0[0], 0);
        assert_eq!(edges.get_pixel(2, 2).0[0], 0);
    }

    #[test]
    fn xdog_marks_dark_side_of_a_step() {
        let img = GrayImage::from_fn(40, 20, |x, _| if x < 20 { Luma([30]) } else { Luma([220]) });
        let lines = xdog(&img, dog_defaults());
        assert!(lines.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert!(edge_count(&lines) > 0);
        assert_eq!(lines.get_pixel(35, 10).0[0], 0);
        assert_eq!(lines.get_pixel(2, 10).0[0], 0);
    }

    #[test]
    fn xdog_on_flat_image_is_empty() {
        let img = GrayImage::from_pixel(16, 16, Luma([200]));
        assert_eq!(edge_count(&xdog(&img, dog_defaults())), 0);
    }
}
