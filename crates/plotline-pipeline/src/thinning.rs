//! Zhang-Suen skeletonization.
//!
//! Reduces every stroke of a binary raster to a one-pixel-wide,
//! 8-connected centerline so the tracer can follow it as a single path.
//! Canny often marks a step edge with a two-pixel band; thinning collapses
//! the band without breaking connectivity.

use image::Luma;

use crate::types::GrayImage;

/// Thin all nonzero pixels of `image`. Returns a 0/255 raster.
///
/// Pixels outside the image count as background.
#[must_use = "returns the skeleton"]
pub fn zhang_suen(image: &GrayImage) -> GrayImage {
    let (w, h) = image.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    let mut grid: Vec<bool> = image.pixels().map(|p| p.0[0] > 0).collect();

    let at = |grid: &[bool], x: usize, y: usize, dx: isize, dy: isize| -> bool {
        match (x.checked_add_signed(dx), y.checked_add_signed(dy)) {
            (Some(nx), Some(ny)) if nx < wu && ny < hu => grid[ny * wu + nx],
            _ => false,
        }
    };

    let mut removal = Vec::new();
    loop {
        let mut changed = false;
        for pass in 0..2 {
            removal.clear();
            for y in 0..hu {
                for x in 0..wu {
                    if !grid[y * wu + x] {
                        continue;
                    }
                    // P2..P9, clockwise from north.
                    let n = [
                        at(&grid, x, y, 0, -1),
                        at(&grid, x, y, 1, -1),
                        at(&grid, x, y, 1, 0),
                        at(&grid, x, y, 1, 1),
                        at(&grid, x, y, 0, 1),
                        at(&grid, x, y, -1, 1),
                        at(&grid, x, y, -1, 0),
                        at(&grid, x, y, -1, -1),
                    ];
                    let b = n.iter().filter(|&&v| v).count();
                    if !(2..=6).contains(&b) {
                        continue;
                    }
                    let a = (0..8).filter(|&i| !n[i] && n[(i + 1) % 8]).count();
                    if a != 1 {
                        continue;
                    }
                    let (p2, p4, p6, p8) = (n[0], n[2], n[4], n[6]);
                    let removable = if pass == 0 {
                        !(p2 && p4 && p6) && !(p4 && p6 && p8)
                    } else {
                        !(p2 && p4 && p8) && !(p2 && p6 && p8)
                    };
                    if removable {
                        removal.push(y * wu + x);
                    }
                }
            }
            for &i in &removal {
                grid[i] = false;
            }
            changed |= !removal.is_empty();
        }
        if !changed {
            break;
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        Luma([if grid[y as usize * wu + x as usize] { 255 } else { 0 }])
    })
}
