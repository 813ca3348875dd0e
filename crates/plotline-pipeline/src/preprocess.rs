//! Decoding, normalization, and subject isolation.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces an RGB
//! raster whose long axis is at most `max_dimension` pixels. Transparent
//! pixels are composited onto white so cut-out subjects stay cut out.

use std::collections::VecDeque;
use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Rgb};

use crate::error::ProviderError;
use crate::params::Limits;
use crate::provider::{Provider, ProviderContext, StageKind, StagePayload};
use crate::types::{GrayImage, RgbImage};

const TRACING_TARGET: &str = "plotline_pipeline::preprocess";

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Decode `bytes` into a normalized RGB raster.
///
/// # Errors
///
/// - [`ProviderError::UnsupportedFormat`] for empty, unrecognized, or
///   corrupt input
/// - [`ProviderError::PayloadTooLarge`] when the header declares more than
///   `limits.max_image_pixels` pixels; checked before decoding the body
pub fn decode(bytes: &[u8], max_dimension: u32, limits: &Limits) -> Result<RgbImage, ProviderError> {
    if bytes.is_empty() {
        return Err(ProviderError::UnsupportedFormat("input is empty".into()));
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ProviderError::UnsupportedFormat(e.to_string()))?;
    if reader.format().is_none() {
        return Err(ProviderError::UnsupportedFormat(
            "unrecognized image signature".into(),
        ));
    }
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ProviderError::UnsupportedFormat(e.to_string()))?;
    let pixels = u64::from(width) * u64::from(height);
    if pixels > limits.max_image_pixels {
        return Err(ProviderError::PayloadTooLarge(format!(
            "{width}x{height} image has {pixels} pixels, limit is {}",
            limits.max_image_pixels
        )));
    }

    let image = image::load_from_memory(bytes)
        .map_err(|e| ProviderError::UnsupportedFormat(e.to_string()))?;
    let image = downsample(image, max_dimension);
    tracing::debug!(
        target: TRACING_TARGET,
        source_width = width,
        source_height = height,
        width = image.width(),
        height = image.height(),
        "Decoded source image"
    );
    Ok(flatten(&image))
}

/// Shrink so the long axis is at most `max_dimension`; smaller images are
/// returned unchanged.
fn downsample(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    if image.width().max(image.height()) <= max_dimension {
        return image;
    }
    image.resize(max_dimension, max_dimension, FilterType::Triangle)
}

/// Composite onto white and drop alpha.
fn flatten(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let over = |c: u8| {
            let blended = (u16::from(c) * alpha + 255 * (255 - alpha) + 127) / 255;
            u8::try_from(blended).unwrap_or(u8::MAX)
        };
        Rgb([over(r), over(g), over(b)])
    })
}

/// ITU-R BT.601 luma, the tone map used by line extraction and hatching.
#[must_use]
pub fn luma(raster: &RgbImage) -> GrayImage {
    DynamicImage::ImageRgb8(raster.clone()).to_luma8()
}

/// Replace the background with white.
///
/// The background is everything 4-connected to the image border whose
/// color is within `tolerance` (per channel) of the mean border color.
#[must_use]
pub fn isolate_subject(raster: &RgbImage, tolerance: u8) -> RgbImage {
    let (w, h) = raster.dimensions();
    if w == 0 || h == 0 {
        return raster.clone();
    }
    let reference = mean_border_color(raster);
    let close = |p: &Rgb<u8>| {
        p.0.iter()
            .zip(reference.iter())
            .all(|(&c, &r)| c.abs_diff(r) <= tolerance)
    };

    let mut background = vec![false; (w as usize) * (h as usize)];
    let index = |x: u32, y: u32| (y as usize) * (w as usize) + x as usize;
    let mut queue = VecDeque::new();
    for (x, y) in border(w, h) {
        if !background[index(x, y)] && close(raster.get_pixel(x, y)) {
            background[index(x, y)] = true;
            queue.push_back((x, y));
        }
    }
    while let Some((x, y)) = queue.pop_front() {
        let neighbours = [
            (x.checked_sub(1), Some(y)),
            (Some(x + 1).filter(|&nx| nx < w), Some(y)),
            (Some(x), y.checked_sub(1)),
            (Some(x), Some(y + 1).filter(|&ny| ny < h)),
        ];
        for (nx, ny) in neighbours {
            let (Some(nx), Some(ny)) = (nx, ny) else {
                continue;
            };
            let i = index(nx, ny);
            if !background[i] && close(raster.get_pixel(nx, ny)) {
                background[i] = true;
                queue.push_back((nx, ny));
            }
        }
    }

    let removed = background.iter().filter(|&&b| b).count();
    tracing::debug!(
        target: TRACING_TARGET,
        removed,
        total = background.len(),
        "Isolated subject"
    );
    RgbImage::from_fn(w, h, |x, y| {
        if background[index(x, y)] {
            WHITE
        } else {
            *raster.get_pixel(x, y)
        }
    })
}

fn border(w: u32, h: u32) -> impl Iterator<Item = (u32, u32)> {
    let horizontal = (0..w).flat_map(move |x| [(x, 0), (x, h - 1)]);
    let vertical = (0..h).flat_map(move |y| [(0, y), (w - 1, y)]);
    horizontal.chain(vertical)
}

fn mean_border_color(raster: &RgbImage) -> [u8; 3] {
    let (w, h) = raster.dimensions();
    let mut sum = [0_u64; 3];
    let mut count = 0_u64;
    for (x, y) in border(w, h) {
        for (s, &c) in sum.iter_mut().zip(raster.get_pixel(x, y).0.iter()) {
            *s += u64::from(c);
        }
        count += 1;
    }
    sum.map(|s| u8::try_from((s + count / 2) / count.max(1)).unwrap_or(u8::MAX))
}

fn decode_input(input: StagePayload, ctx: &ProviderContext<'_>) -> Result<RgbImage, ProviderError> {
    let bytes = input.into_encoded()?;
    decode(&bytes, ctx.params.max_dimension, ctx.limits)
}

/// Decode and normalize only.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassicalPreprocess;

impl Provider for ClassicalPreprocess {
    fn stage(&self) -> StageKind {
        StageKind::Preprocess
    }

    fn name(&self) -> &'static str {
        "classical"
    }

    fn execute(
        &self,
        input: StagePayload,
        ctx: &ProviderContext<'_>,
    ) -> Result<StagePayload, ProviderError> {
        if ctx.params.isolate_subject {
            return Err(ProviderError::Failed(
                "subject isolation requested but this provider does not segment".into(),
            ));
        }
        decode_input(input, ctx).map(StagePayload::Raster)
    }
}

/// Decode, normalize, and whiten the border-connected background.
#[derive(Debug, Default, Clone, Copy)]
pub struct BorderSegmentation;

impl Provider for BorderSegmentation {
    fn stage(&self) -> StageKind {
        StageKind::Preprocess
    }

    fn name(&self) -> &'static str {
        "border_segmentation"
    }

    fn execute(
        &self,
        input: StagePayload,
        ctx: &ProviderContext<'_>,
    ) -> Result<StagePayload, ProviderError> {
        let raster = decode_input(input, ctx)?;
        if !ctx.params.isolate_subject {
            return Ok(StagePayload::Raster(raster));
        }
        Ok(StagePayload::Raster(isolate_subject(
            &raster,
            ctx.params.segmentation_tolerance,
        )))
    }
}
