//! Tangent-space normal maps derived from a color image.
//!
//! Each pixel's 3x3 neighborhood is reduced to grayscale heights using the
//! (R, G, G) channel triple weighted 1/3 each, then a Sobel-like gradient
//! gives the x/y slope. Out-of-range neighbors clamp to the nearest edge
//! pixel. Slopes follow a bottom-up texture convention: `N` is the row
//! below in buffer order (`y + 1`), `S` the row above, `W` the column to
//! the left.
use image::{Rgba, RgbaImage};

const THIRD: f32 = 1.0 / 3.0;

fn height(pixel: &Rgba<u8>) -> f32 {
    let [r, g, _, _] = pixel.0;
    let (r, g) = (r as f32 / 255.0, g as f32 / 255.0);
    r * THIRD + g * THIRD + g * THIRD
}

/// Grayscale heights of the whole image, row-major.
fn heights(image: &RgbaImage) -> Vec<f32> {
    image.pixels().map(height).collect()
}

/// Unit normal for pixel `(x, y)` given row-major heights of a `width` x `height` image.
/// An empty image has no neighbors and yields the flat normal.
pub fn normal_at(heights: &[f32], width: u32, height: u32, x: u32, y: u32, strength: f32) -> [f32; 3] {
    if width == 0 || height == 0 {
        return [0.0, 0.0, 1.0];
    }
    let at = |dx: i64, dy: i64| -> f32 {
        let sx = (x as i64 + dx).clamp(0, width as i64 - 1) as usize;
        let sy = (y as i64 + dy).clamp(0, height as i64 - 1) as usize;
        heights[sy * width as usize + sx]
    };

    let (nw, n, ne) = (at(-1, 1), at(0, 1), at(1, 1));
    let (w, e) = (at(-1, 0), at(1, 0));
    let (sw, s, se) = (at(-1, -1), at(0, -1), at(1, -1));

    let edge_x = 0.25 * (nw - ne) + 0.5 * (w - e) + 0.25 * (sw - se);
    let edge_y = 0.25 * (nw - sw) + 0.5 * (n - s) + 0.25 * (ne - se);

    let (vx, vy, vz) = (edge_x * strength, edge_y * strength, 1.0f32);
    let len = (vx * vx + vy * vy + vz * vz).sqrt();
    [vx / len, vy / len, vz / len]
}

fn encode(component: f32) -> u8 {
    ((component * 0.5 + 0.5) * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Build a normal map of the same size as `image`.
///
/// Pure and deterministic: the same image and strength always produce the
/// same bytes. A constant-color input yields the flat normal (128, 128, 255).
pub fn synthesize(image: &RgbaImage, strength: f32) -> RgbaImage {
    let (width, height) = image.dimensions();
    let mut out = RgbaImage::new(width, height);
    if width == 0 || height == 0 {
        return out;
    }

    let heights = heights(image);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let [nx, ny, nz] = normal_at(&heights, width, height, x, y, strength);
        *pixel = Rgba([encode(nx), encode(ny), encode(nz), 255]);
    }
    out
}
