//! G-code export serializer.
//!
//! Drives a pen (or laser, or drag knife) on the Z axis:
//!
//! - header: `G21` (millimetres), `G90` (absolute), pen up, home, feed
//! - per path: pen up, rapid to the start, pen down, linear moves
//! - footer: pen up, home, `M2`
//!
//! Coordinates carry three decimals. Machine origins sit at the
//! bottom-left, so the canvas y axis is flipped against its height.

use std::fmt::Write;

use plotline_pipeline::{Point, Polyline, ProcessingParams};

/// Machine settings for one program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcodeSettings {
    /// Drawing feed rate, millimetres per minute.
    pub feed_rate: f64,
    /// Z height with the pen lifted.
    pub z_up: f64,
    /// Z height with the pen on the paper.
    pub z_down: f64,
}

impl GcodeSettings {
    #[must_use]
    pub const fn from_params(params: &ProcessingParams) -> Self {
        Self {
            feed_rate: params.gcode_feed_rate,
            z_up: params.gcode_z_up,
            z_down: params.gcode_z_down,
        }
    }
}

impl Default for GcodeSettings {
    fn default() -> Self {
        Self {
            feed_rate: ProcessingParams::DEFAULT_GCODE_FEED_RATE,
            z_up: ProcessingParams::DEFAULT_GCODE_Z_UP,
            z_down: ProcessingParams::DEFAULT_GCODE_Z_DOWN,
        }
    }
}

/// Serialize canvas-space paths into a G-code program.
#[must_use]
pub fn to_gcode(paths: &[Polyline], canvas_height_mm: f64, settings: &GcodeSettings) -> String {
    let flip = |p: Point| (p.x, canvas_height_mm - p.y);
    let mut out = String::new();

    let _ = writeln!(out, "; plotline");
    let _ = writeln!(out, "G21");
    let _ = writeln!(out, "G90");
    let _ = writeln!(out, "G0 Z{:.3}", settings.z_up);
    let _ = writeln!(out, "G0 X0.000 Y0.000");
    let _ = writeln!(out, "G1 F{:.3}", settings.feed_rate);

    for path in paths {
        let [first, rest @ ..] = path.points() else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let (x, y) = flip(*first);
        let _ = writeln!(out, "G0 Z{:.3}", settings.z_up);
        let _ = writeln!(out, "G0 X{x:.3} Y{y:.3}");
        let _ = writeln!(out, "G1 Z{:.3}", settings.z_down);
        for &p in rest {
            let (x, y) = flip(p);
            let _ = writeln!(out, "G1 X{x:.3} Y{y:.3}");
        }
    }

    let _ = writeln!(out, "G0 Z{:.3}", settings.z_up);
    let _ = writeln!(out, "G0 X0.000 Y0.000");
    let _ = writeln!(out, "M2");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(points: &[(f64, f64)]) -> Polyline {
        Polyline::new(points.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    #[test]
    fn header_and_footer_frame_the_program() {
        let g = to_gcode(&[], 50.0, &GcodeSettings::default());
        let lines: Vec<&str> = g.lines().collect();
        assert_eq!(&lines[1..3], &["G21", "G90"]);
        assert_eq!(lines.last(), Some(&"M2"));
        assert!(g.contains("G1 F1000.000"));
    }

    #[test]
    fn path_moves_are_flipped_with_three_decimals() {
        let g = to_gcode(
            &[line(&[(1.0, 2.0), (3.25, 50.0)])],
            50.0,
            &GcodeSettings {
                feed_rate: 800.0,
                z_up: 4.0,
                z_down: -0.5,
            },
        );
        assert!(g.contains("G0 X1.000 Y48.000\nG1 Z-0.500\nG1 X3.250 Y0.000\n"));
        assert!(g.contains("G1 F800.000"));
    }

    #[test]
    fn pen_lifts_before_every_path() {
        let g = to_gcode(
            &[line(&[(0.0, 0.0), (1.0, 0.0)]), line(&[(5.0, 5.0), (6.0, 5.0)])],
            10.0,
            &GcodeSettings::default(),
        );
        assert_eq!(g.matches("G1 Z0.000").count(), 2);
        assert_eq!(g.matches("G0 Z5.000").count(), 4);
    }
}
