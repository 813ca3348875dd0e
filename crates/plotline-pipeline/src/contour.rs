//! Vectorize providers: trace a binary line raster into paths.
//!
//! - `skeleton_trace` (default) thins the raster to one-pixel strokes and
//!   walks each stroke once, producing centerlines. Closed strokes come
//!   back as closed paths.
//! - `contour_trace` follows the borders of every blob with
//!   `imageproc::contours::find_contours` (Suzuki-Abe). On thin strokes
//!   this doubles each line; it suits filled, stylized line art better.
//!
//! Both are deterministic: pixels are visited in raster order and
//! neighbours in a fixed order. Paths shorter than `pathomit` pixels are
//! dropped.

use crate::error::ProviderError;
use crate::provider::{Provider, ProviderContext, StageKind, StagePayload};
use crate::thinning::zhang_suen;
use crate::types::{Dimensions, GrayImage, Point, Polyline, VectorDocument};

const TRACING_TARGET: &str = "plotline_pipeline::contour";

/// Walk order: edge neighbours first so corners are not cut, then
/// diagonals.
const WALK_ORDER: [(i32, i32); 8] = [
    (1, 0),
    (0, 1),
    (-1, 0),
    (0, -1),
    (1, 1),
    (-1, 1),
    (-1, -1),
    (1, -1),
];

struct Grid {
    width: u32,
    height: u32,
    on: Vec<bool>,
    visited: Vec<bool>,
}

impl Grid {
    fn new(image: &GrayImage) -> Self {
        let on: Vec<bool> = image.pixels().map(|p| p.0[0] > 0).collect();
        let visited = vec![false; on.len()];
        Self {
            width: image.width(),
            height: image.height(),
            on,
            visited,
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    fn is_on(&self, x: u32, y: u32) -> bool {
        self.on[self.index(x, y)]
    }

    fn neighbours(&self, x: u32, y: u32) -> impl Iterator<Item = (u32, u32)> + '_ {
        WALK_ORDER.iter().filter_map(move |&(dx, dy)| {
            let nx = x.checked_add_signed(dx).filter(|&v| v < self.width)?;
            let ny = y.checked_add_signed(dy).filter(|&v| v < self.height)?;
            self.is_on(nx, ny).then_some((nx, ny))
        })
    }

    fn degree(&self, x: u32, y: u32) -> usize {
        self.neighbours(x, y).count()
    }

    /// Follow unvisited pixels from `start` until the stroke runs out.
    fn walk(&mut self, start: (u32, u32)) -> Vec<(u32, u32)> {
        let mut stroke = vec![start];
        let i = self.index(start.0, start.1);
        self.visited[i] = true;
        let mut current = start;
        loop {
            let next = self
                .neighbours(current.0, current.1)
                .find(|&(nx, ny)| !self.visited[self.index(nx, ny)]);
            let Some(next) = next else {
                break;
            };
            let i = self.index(next.0, next.1);
            self.visited[i] = true;
            stroke.push(next);
            current = next;
        }
        stroke
    }

    fn unvisited_on(&self, x: u32, y: u32) -> bool {
        let i = self.index(x, y);
        self.on[i] && !self.visited[i]
    }
}

fn to_point((x, y): (u32, u32)) -> Point {
    Point::new(f64::from(x), f64::from(y))
}

fn adjacent(a: (u32, u32), b: (u32, u32)) -> bool {
    a != b && a.0.abs_diff(b.0) <= 1 && a.1.abs_diff(b.1) <= 1
}

/// Trace the centerline of every stroke in a binary raster.
///
/// Open strokes are walked from their endpoints first; whatever remains
/// (closed loops) is walked from its first pixel in raster order and
/// closed when the walk ends beside its start.
#[must_use]
pub fn trace_skeleton(edges: &GrayImage) -> Vec<Polyline> {
    let skeleton = zhang_suen(edges);
    let mut grid = Grid::new(&skeleton);
    let (w, h) = (grid.width, grid.height);
    let mut paths = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if grid.unvisited_on(x, y) && grid.degree(x, y) == 1 {
                let stroke = grid.walk((x, y));
                paths.push(Polyline::new(stroke.into_iter().map(to_point).collect()));
            }
        }
    }

    for y in 0..h {
        for x in 0..w {
            if !grid.unvisited_on(x, y) {
                continue;
            }
            let mut stroke = grid.walk((x, y));
            if stroke.len() >= 3 && stroke.last().is_some_and(|&end| adjacent(end, (x, y))) {
                stroke.push((x, y));
            }
            paths.push(Polyline::new(stroke.into_iter().map(to_point).collect()));
        }
    }

    paths
}

/// Suzuki-Abe border following via `imageproc::contours::find_contours`.
///
/// Borders whose last point touches their first are closed explicitly.
#[must_use]
pub fn trace_borders(edges: &GrayImage) -> Vec<Polyline> {
    let contours: Vec<imageproc::contours::Contour<u32>> =
        imageproc::contours::find_contours(edges);

    contours
        .into_iter()
        .filter(|c| c.points.len() >= 2)
        .map(|c| {
            let mut stroke: Vec<(u32, u32)> = c.points.into_iter().map(|p| (p.x, p.y)).collect();
            if let (Some(&first), Some(&last)) = (stroke.first(), stroke.last()) {
                if stroke.len() >= 3 && adjacent(first, last) {
                    stroke.push(first);
                }
            }
            Polyline::new(stroke.into_iter().map(to_point).collect())
        })
        .collect()
}

/// Drop paths whose length is below `pathomit` pixels.
#[must_use]
pub fn omit_short(paths: Vec<Polyline>, pathomit: u32) -> Vec<Polyline> {
    let min = f64::from(pathomit);
    paths
        .into_iter()
        .filter(|p| p.len() >= 2 && p.length() >= min)
        .collect()
}

fn vectorize(
    input: StagePayload,
    ctx: &ProviderContext<'_>,
    trace: fn(&GrayImage) -> Vec<Polyline>,
) -> Result<StagePayload, ProviderError> {
    let edges = input.into_line_art()?;
    let source = Dimensions {
        width: edges.width(),
        height: edges.height(),
    };
    let traced = trace(&edges);
    let traced_count = traced.len();
    let paths = omit_short(traced, ctx.params.pathomit);
    tracing::debug!(
        target: TRACING_TARGET,
        traced = traced_count,
        kept = paths.len(),
        pathomit = ctx.params.pathomit,
        "Traced line raster"
    );
    Ok(StagePayload::Document(VectorDocument::traced(paths, source)))
}

/// Default Vectorize provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkeletonTrace;

impl Provider for SkeletonTrace {
    fn stage(&self) -> StageKind {
        StageKind::Vectorize
    }

    fn name(&self) -> &'static str {
        "skeleton_trace"
    }

    fn execute(
        &self,
        input: StagePayload,
        ctx: &ProviderContext<'_>,
    ) -> Result<StagePayload, ProviderError> {
        vectorize(input, ctx, trace_skeleton)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ContourTrace;

impl Provider for ContourTrace {
    fn stage(&self) -> StageKind {
        StageKind::Vectorize
    }

    fn name(&self) -> &'static str {
        "contour_trace"
    }

    fn execute(
        &self,
        input: StagePayload,
        ctx: &ProviderContext<'_>,
    ) -> Result<StagePayload, ProviderError> {
        vectorize(input, ctx, trace_borders)
    }
}
