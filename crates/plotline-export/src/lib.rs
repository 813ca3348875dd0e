//! plotline-export: serializers for plotter output formats (sans-IO).
//!
//! Turns a placed [`VectorDocument`](plotline_pipeline::VectorDocument)
//! into SVG, HP-GL, and G-code strings, and registers the `native`
//! Export stage provider that bundles them with summary statistics.

use std::sync::Arc;

use plotline_pipeline::Provider;

pub mod gcode;
pub mod hpgl;
pub mod provider;
pub mod stats;
pub mod svg;

pub use gcode::{GcodeSettings, to_gcode};
pub use hpgl::to_hpgl;
pub use provider::NativeExportProvider;
pub use stats::document_stats;
pub use svg::{SvgMetadata, build_path_data, to_svg};

/// Registration table for the providers this crate ships.
#[must_use]
pub fn providers() -> Vec<Arc<dyn Provider>> {
    vec![Arc::new(NativeExportProvider)]
}
