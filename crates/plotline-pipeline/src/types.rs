//! Shared geometry and document types for the plotline pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

/// Re-export `GrayImage` so downstream crates can reference single-channel
/// image buffers without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can reference the normalized
/// preprocess output without depending on `image` directly.
pub use image::RgbImage;

/// A 2D point.
///
/// Before the Optimize stage coordinates are working-raster pixels
/// (`x` right, `y` down). After it they are canvas millimetres with the
/// same axis orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Distance from this point to the segment `a`-`b`.
    #[must_use]
    pub fn distance_to_segment(self, a: Self, b: Self) -> f64 {
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let length_sq = dx.mul_add(dx, dy * dy);
        if length_sq == 0.0 {
            return self.distance(a);
        }
        let t = ((self.x - a.x).mul_add(dx, (self.y - a.y) * dy) / length_sq).clamp(0.0, 1.0);
        self.distance(Self::new(t.mul_add(dx, a.x), t.mul_add(dy, a.y)))
    }
}

/// A Path: an ordered, directed sequence of connected points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline(Vec<Point>);

impl Polyline {
    /// Create a new polyline from a vector of points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the polyline has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the polyline.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the first point, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Point> {
        self.0.first()
    }

    /// Returns the last point, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Point> {
        self.0.last()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Consumes the polyline and returns the underlying vector of points.
    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.0
    }

    /// The same path walked in the opposite direction.
    #[must_use]
    pub fn reversed(&self) -> Self {
        let mut points = self.0.clone();
        points.reverse();
        Self(points)
    }

    /// `true` when the path ends exactly where it starts.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.len() >= 3 && self.0.first() == self.0.last()
    }

    /// Sum of segment lengths.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.0.windows(2).map(|w| w[0].distance(w[1])).sum()
    }

    /// Axis-aligned bounds, `None` for an empty polyline.
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::of_points(&self.0)
    }

    /// Shortest distance from `point` to any segment of this polyline.
    ///
    /// A single-point polyline degenerates to point distance; an empty
    /// one is infinitely far away.
    #[must_use]
    pub fn distance_to(&self, point: Point) -> f64 {
        match self.0.as_slice() {
            [] => f64::INFINITY,
            [only] => point.distance(*only),
            points => points
                .windows(2)
                .map(|w| point.distance_to_segment(w[0], w[1]))
                .fold(f64::INFINITY, f64::min),
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Bounds of a point set, `None` when empty.
    #[must_use]
    pub fn of_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let init = Self {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        Some(points.iter().fold(init, |b, p| Self {
            min_x: b.min_x.min(p.x),
            min_y: b.min_y.min(p.y),
            max_x: b.max_x.max(p.x),
            max_y: b.max_y.max(p.y),
        }))
    }

    /// Smallest box containing both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// `true` when `other` lies inside this box, allowing `epsilon` slack.
    #[must_use]
    pub fn contains(&self, other: &Self, epsilon: f64) -> bool {
        other.min_x >= self.min_x - epsilon
            && other.min_y >= self.min_y - epsilon
            && other.max_x <= self.max_x + epsilon
            && other.max_y <= self.max_y + epsilon
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// The raster frame `[0, width] x [0, height]` as a bounding box.
    #[must_use]
    pub fn frame(self) -> BoundingBox {
        BoundingBox {
            min_x: 0.0,
            min_y: 0.0,
            max_x: f64::from(self.width),
            max_y: f64::from(self.height),
        }
    }
}

/// Coordinate system a [`VectorDocument`] is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Units {
    /// Working-raster pixels, before the Optimize stage.
    Pixels,
    /// Canvas millimetres, after the Optimize stage.
    Millimetres,
}

/// Affine map from working-raster pixels onto the canvas.
///
/// `mm = px * scale + offset`, per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub scale_x: f64,
    pub scale_y: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub canvas_width_mm: f64,
    pub canvas_height_mm: f64,
}

impl Placement {
    /// Map a pixel-space point onto the canvas.
    #[must_use]
    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            p.x.mul_add(self.scale_x, self.offset_x),
            p.y.mul_add(self.scale_y, self.offset_y),
        )
    }

    /// Map a canvas point back into pixel space.
    #[must_use]
    pub fn invert(&self, p: Point) -> Point {
        Point::new(
            (p.x - self.offset_x) / self.scale_x,
            (p.y - self.offset_y) / self.scale_y,
        )
    }

    /// The canvas rectangle.
    #[must_use]
    pub const fn canvas(&self) -> BoundingBox {
        BoundingBox {
            min_x: 0.0,
            min_y: 0.0,
            max_x: self.canvas_width_mm,
            max_y: self.canvas_height_mm,
        }
    }
}

/// An ordered collection of Paths.
///
/// Paths with fewer than two points are never stored, including when a
/// document is deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DocumentRepr")]
pub struct VectorDocument {
    paths: Vec<Polyline>,
    source: Dimensions,
    units: Units,
    placement: Option<Placement>,
}

impl VectorDocument {
    /// A pixel-space document traced from a raster of `source` size.
    #[must_use]
    pub fn traced(paths: Vec<Polyline>, source: Dimensions) -> Self {
        Self {
            paths: retain_drawable(paths),
            source,
            units: Units::Pixels,
            placement: None,
        }
    }

    /// A canvas-space document produced by fitting with `placement`.
    #[must_use]
    pub fn placed(paths: Vec<Polyline>, source: Dimensions, placement: Placement) -> Self {
        Self {
            paths: retain_drawable(paths),
            source,
            units: Units::Millimetres,
            placement: Some(placement),
        }
    }

    /// Same frame and units, different paths.
    #[must_use]
    pub fn with_paths(&self, paths: Vec<Polyline>) -> Self {
        Self {
            paths: retain_drawable(paths),
            source: self.source,
            units: self.units,
            placement: self.placement,
        }
    }

    #[must_use]
    pub fn paths(&self) -> &[Polyline] {
        &self.paths
    }

    #[must_use]
    pub fn into_paths(self) -> Vec<Polyline> {
        self.paths
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Dimensions of the raster the paths were traced from.
    #[must_use]
    pub const fn source(&self) -> Dimensions {
        self.source
    }

    #[must_use]
    pub const fn units(&self) -> Units {
        self.units
    }

    #[must_use]
    pub const fn placement(&self) -> Option<&Placement> {
        self.placement.as_ref()
    }

    /// Bounds over every path, `None` for an empty document.
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.paths
            .iter()
            .filter_map(Polyline::bounding_box)
            .reduce(BoundingBox::union)
    }

    /// Stable 64-bit fingerprint of the geometry.
    ///
    /// Hashes the bit patterns of every coordinate with fixed keys, so
    /// identical documents produce identical fingerprints across runs and
    /// processes.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = SipHasher13::new_with_keys(0, 0);
        hasher.write_u64(self.paths.len() as u64);
        for path in &self.paths {
            hasher.write_u64(path.len() as u64);
            for p in path.points() {
                hasher.write_u64(p.x.to_bits());
                hasher.write_u64(p.y.to_bits());
            }
        }
        hasher.finish()
    }
}

fn retain_drawable(paths: Vec<Polyline>) -> Vec<Polyline> {
    paths.into_iter().filter(|p| p.len() >= 2).collect()
}

/// Wire shape of a [`VectorDocument`], checked on the way in.
#[derive(Deserialize)]
struct DocumentRepr {
    paths: Vec<Polyline>,
    source: Dimensions,
    units: Units,
    #[serde(default)]
    placement: Option<Placement>,
}

impl TryFrom<DocumentRepr> for VectorDocument {
    type Error = String;

    fn try_from(repr: DocumentRepr) -> Result<Self, Self::Error> {
        match (repr.units, repr.placement) {
            (Units::Pixels, None) => Ok(Self::traced(repr.paths, repr.source)),
            (Units::Millimetres, Some(placement)) => {
                Ok(Self::placed(repr.paths, repr.source, placement))
            }
            (Units::Pixels, Some(_)) => Err("a pixel-space document has no placement".to_owned()),
            (Units::Millimetres, None) => {
                Err("a millimetre document needs its placement".to_owned())
            }
        }
    }
}

/// Input to the Hatch stage: the grayscale tone map recorded after
/// Preprocess, plus the optimized document it is drawn over.
#[derive(Debug, Clone)]
pub struct Shading {
    pub gray: GrayImage,
    pub document: VectorDocument,
}

/// Serialization targets of the Export stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// SVG vector markup. Always produced.
    Svg,
    /// HP-GL plotter command language.
    Hpgl,
    /// G-code machine-tool command language.
    Gcode,
}

impl ExportFormat {
    pub const ALL: [Self; 3] = [Self::Svg, Self::Hpgl, Self::Gcode];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Hpgl => "hpgl",
            Self::Gcode => "gcode",
        }
    }

    /// Conventional file extension.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Hpgl => "hpgl",
            Self::Gcode => "gcode",
        }
    }

    #[must_use]
    pub const fn media_type(self) -> &'static str {
        match self {
            Self::Svg => "image/svg+xml",
            Self::Hpgl => "application/vnd.hp-hpgl",
            Self::Gcode => "text/x-gcode",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "svg" => Ok(Self::Svg),
            "hpgl" | "plt" => Ok(Self::Hpgl),
            "gcode" | "g-code" | "nc" => Ok(Self::Gcode),
            other => Err(format!("unknown export format `{other}`")),
        }
    }
}

/// Summary statistics of a finished document, in millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub path_count: usize,
    pub point_count: usize,
    /// Total pen-down distance.
    pub total_length_mm: f64,
    /// Total pen-up distance between consecutive paths.
    pub travel_length_mm: f64,
    pub bounds: Option<BoundingBox>,
    pub width_mm: f64,
    pub height_mm: f64,
}

/// Output of the Export stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    /// Serialized documents keyed by format.
    pub outputs: BTreeMap<ExportFormat, String>,
    pub stats: DocumentStats,
    /// Stable handle derived from [`VectorDocument::fingerprint`].
    pub result_ref: String,
}

impl ExportBundle {
    #[must_use]
    pub fn get(&self, format: ExportFormat) -> Option<&str> {
        self.outputs.get(&format).map(String::as_str)
    }
}
