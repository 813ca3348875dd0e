//! Full pipeline runs with the real Export provider.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::io::Cursor;
use std::sync::Arc;

use image::{GrayImage, ImageFormat, Luma};
use plotline_pipeline::{
    Device, ExportFormat, HookRegistry, Limits, NoopObserver, Pipeline, PipelineError,
    ProcessingParams, ProviderRegistry,
};

fn pipeline() -> Pipeline {
    let registry = ProviderRegistry::discover(&[plotline_pipeline::providers, plotline_export::providers]);
    Pipeline::new(
        Arc::new(registry),
        HookRegistry::with_builtin_hooks(),
        Device::Cpu,
        Limits::default(),
    )
}

fn encode(img: &GrayImage) -> Arc<[u8]> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner().into()
}

/// A black 50x50 square centred on a white 100x100 field.
fn square_png() -> Arc<[u8]> {
    encode(&GrayImage::from_fn(100, 100, |x, y| {
        if (25..75).contains(&x) && (25..75).contains(&y) {
            Luma([0])
        } else {
            Luma([255])
        }
    }))
}

#[test]
fn square_exports_one_closed_path_in_every_format() {
    let params = ProcessingParams::new(50.0, 50.0, 0.3);
    let out = pipeline().run(square_png(), &params, &NoopObserver).unwrap();
    let bundle = &out.bundle;

    assert_eq!(bundle.stats.path_count, 1);
    assert!((bundle.stats.width_mm - 50.0).abs() < 0.5);
    assert!((bundle.stats.height_mm - 50.0).abs() < 0.5);
    assert!(bundle.stats.travel_length_mm.abs() < f64::EPSILON);

    let svg = bundle.get(ExportFormat::Svg).unwrap();
    assert_eq!(svg.matches("<path").count(), 1);
    assert!(svg.contains(r#"width="50mm""#));

    let hpgl = bundle.get(ExportFormat::Hpgl).unwrap();
    assert_eq!(hpgl.matches("PD").count(), 1);

    let gcode = bundle.get(ExportFormat::Gcode).unwrap();
    assert_eq!(gcode.matches("G1 Z0.000").count(), 1);
    assert!(gcode.trim_end().ends_with("M2"));
}

#[test]
fn identical_inputs_give_identical_outputs() {
    let params = ProcessingParams::new(120.0, 80.0, 0.5);
    let a = pipeline().run(square_png(), &params, &NoopObserver).unwrap();
    let b = pipeline().run(square_png(), &params, &NoopObserver).unwrap();
    assert_eq!(a.bundle, b.bundle);
}

#[test]
fn blank_image_exports_an_empty_drawing() {
    let params = ProcessingParams::new(50.0, 50.0, 0.3);
    let blank = encode(&GrayImage::from_pixel(64, 64, Luma([255])));
    let out = pipeline().run(blank, &params, &NoopObserver).unwrap();
    assert!(out.document.is_empty());
    assert_eq!(out.bundle.stats.path_count, 0);
    assert!(!out.bundle.get(ExportFormat::Svg).unwrap().contains("<path"));
}

#[test]
fn hatching_fills_the_square() {
    let params = ProcessingParams {
        hatching_enabled: true,
        ..ProcessingParams::new(50.0, 50.0, 0.3)
    };
    let out = pipeline().run(square_png(), &params, &NoopObserver).unwrap();
    assert!(out.bundle.stats.path_count > 10);
    assert_eq!(out.diagnostics.stages.len(), 6);
}

#[test]
fn unknown_provider_preference_falls_through_to_default() {
    let mut params = ProcessingParams::new(50.0, 50.0, 0.3);
    params.providers.export = vec!["missing".to_owned()];
    let out = pipeline().run(square_png(), &params, &NoopObserver).unwrap();
    let export = out.diagnostics.stages.last().unwrap();
    assert_eq!(export.provider, "native");
}

#[test]
fn oversized_canvas_is_rejected() {
    let params = ProcessingParams::new(5000.0, 50.0, 0.3);
    let err = pipeline().run(square_png(), &params, &NoopObserver).unwrap_err();
    assert!(matches!(err, PipelineError::Validation { ref field, .. } if field == "canvas_width_mm"));
}
