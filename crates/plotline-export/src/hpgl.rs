//! HP-GL export serializer.
//!
//! Emits the plotter command subset every HP-GL device understands:
//!
//! ```text
//! IN;
//! SP1;
//! PU x,y;
//! PD x,y,x,y,...;
//! PU;
//! SP0;
//! ```
//!
//! Coordinates are integer plotter units, 40 per millimetre. HP-GL puts
//! the origin at the bottom-left with y pointing up, so the canvas y axis
//! is flipped against `canvas_height_mm`.

use std::fmt::Write;

use plotline_pipeline::{Point, Polyline};

/// Plotter units per millimetre.
pub const UNITS_PER_MM: f64 = 40.0;

#[allow(clippy::cast_possible_truncation)]
fn to_units(p: Point, canvas_height_mm: f64) -> (i64, i64) {
    (
        (p.x * UNITS_PER_MM).round() as i64,
        ((canvas_height_mm - p.y) * UNITS_PER_MM).round() as i64,
    )
}

/// Serialize canvas-space paths into an HP-GL program.
#[must_use]
pub fn to_hpgl(paths: &[Polyline], canvas_height_mm: f64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "IN;");
    let _ = writeln!(out, "SP1;");

    for path in paths {
        let [first, rest @ ..] = path.points() else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let (x, y) = to_units(*first, canvas_height_mm);
        let _ = writeln!(out, "PU{x},{y};");
        let coords: Vec<String> = rest
            .iter()
            .map(|&p| {
                let (x, y) = to_units(p, canvas_height_mm);
                format!("{x},{y}")
            })
            .collect();
        let _ = writeln!(out, "PD{};", coords.join(","));
    }

    let _ = writeln!(out, "PU;");
    let _ = writeln!(out, "SP0;");
    out
}
