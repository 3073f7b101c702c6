//! Contrast-limited adaptive histogram equalization (CLAHE).
//!
//! The image is divided into a `grid x grid` layout of tiles. Each tile
//! gets its own equalization lookup table built from a histogram whose
//! bins are clipped at `clip_limit` times the uniform bin height, with the
//! clipped excess spread back over all bins. Every output pixel is a
//! bilinear blend of the lookup tables of the four nearest tile centers,
//! which hides the tile seams.
//!
//! When the image size is not a multiple of the grid, the tiling covers a
//! virtually padded image (mirrored borders) so that all tiles have the
//! same area.

use crate::border::reflect_101;
use crate::color::saturate_u8;
use crate::types::GrayImage;

const BINS: usize = 256;

/// Apply CLAHE to a single-channel image.
///
/// `grid` is the number of tiles along each axis. A `grid` of zero or an
/// empty image returns the input unchanged.
#[must_use = "returns the equalized image"]
pub fn clahe(image: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || grid == 0 {
        return image.clone();
    }

    let tile_w = w.div_ceil(grid);
    let tile_h = h.div_ceil(grid);
    let luts = tile_luts(image, grid, tile_w, tile_h, clip_limit);

    let inv_tw = 1.0 / f64::from(tile_w);
    let inv_th = 1.0 / f64::from(tile_h);
    let last = i64::from(grid) - 1;

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let fy = f64::from(y).mul_add(inv_th, -0.5);
        let (ty1, ty2, ya) = neighbors(fy, last);
        for x in 0..w {
            let fx = f64::from(x).mul_add(inv_tw, -0.5);
            let (tx1, tx2, xa) = neighbors(fx, last);
            let v = usize::from(image.get_pixel(x, y).0[0]);

            let lut = |tx: usize, ty: usize| f64::from(luts[ty * grid as usize + tx][v]);
            let top = lut(tx1, ty1).mul_add(1.0 - xa, lut(tx2, ty1) * xa);
            let bottom = lut(tx1, ty2).mul_add(1.0 - xa, lut(tx2, ty2) * xa);
            #[allow(clippy::cast_possible_truncation)]
            let blended = top.mul_add(1.0 - ya, bottom * ya) as f32;
            out.put_pixel(x, y, image::Luma([saturate_u8(blended)]));
        }
    }
    out
}

/// The two tile indices bracketing a fractional tile coordinate and the
/// blend weight of the second one.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn neighbors(f: f64, last: i64) -> (usize, usize, f64) {
    let floor = f.floor();
    let weight = f - floor;
    let first = floor as i64;
    let lo = first.clamp(0, last) as usize;
    let hi = (first + 1).clamp(0, last) as usize;
    (lo, hi, weight)
}

/// Build one clipped-histogram lookup table per tile, row-major.
fn tile_luts(
    image: &GrayImage,
    grid: u32,
    tile_w: u32,
    tile_h: u32,
    clip_limit: f32,
) -> Vec<[u8; BINS]> {
    let (w, h) = image.dimensions();
    let area = u64::from(tile_w) * u64::from(tile_h);
    let limit = clip_threshold(clip_limit, area);
    #[allow(clippy::cast_precision_loss)]
    let scale = 255.0 / area as f32;

    let mut luts = Vec::with_capacity((grid * grid) as usize);
    for ty in 0..grid {
        for tx in 0..grid {
            let mut hist = [0u64; BINS];
            for py in 0..tile_h {
                let sy = reflect_101(i64::from(ty * tile_h + py), h);
                for px in 0..tile_w {
                    let sx = reflect_101(i64::from(tx * tile_w + px), w);
                    hist[usize::from(image.get_pixel(sx, sy).0[0])] += 1;
                }
            }
            if let Some(limit) = limit {
                clip_histogram(&mut hist, limit);
            }
            luts.push(cumulative_lut(&hist, scale));
        }
    }
    luts
}

/// Absolute per-bin clip threshold, or `None` when clipping is disabled.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn clip_threshold(clip_limit: f32, area: u64) -> Option<u64> {
    if clip_limit <= 0.0 {
        return None;
    }
    let limit = (f64::from(clip_limit) * area as f64 / BINS as f64) as u64;
    Some(limit.max(1))
}

/// Clip every bin at `limit` and redistribute the excess.
///
/// The excess is spread evenly; whatever does not divide evenly is
/// handed out one count at a time at a regular stride across the bins.
fn clip_histogram(hist: &mut [u64; BINS], limit: u64) {
    let mut clipped = 0u64;
    for bin in hist.iter_mut() {
        if *bin > limit {
            clipped += *bin - limit;
            *bin = limit;
        }
    }

    let batch = clipped / BINS as u64;
    let mut residual = clipped - batch * BINS as u64;
    for bin in hist.iter_mut() {
        *bin += batch;
    }

    if residual > 0 {
        #[allow(clippy::cast_possible_truncation)]
        let step = (BINS / residual as usize).max(1);
        let mut i = 0;
        while i < BINS && residual > 0 {
            hist[i] += 1;
            residual -= 1;
            i += step;
        }
    }
}

/// Lookup table mapping each level to its scaled cumulative count.
fn cumulative_lut(hist: &[u64; BINS], scale: f32) -> [u8; BINS] {
    let mut lut = [0u8; BINS];
    let mut sum = 0u64;
    for (slot, count) in lut.iter_mut().zip(hist) {
        sum += count;
        #[allow(clippy::cast_precision_loss)]
        let mapped = sum as f32 * scale;
        *slot = saturate_u8(mapped);
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread(a: &GrayImage) -> u8 {
        let min = a.pixels().map(|p| p.0[0]).min().unwrap_or(0);
        let max = a.pixels().map(|p| p.0[0]).max().unwrap_or(0);
        max - min
    }

    #[test]
    fn preserves_dimensions() {
        let img = GrayImage::from_pixel(80, 60, image::Luma([128]));
        assert_eq!(clahe(&img, 2.0, 8).dimensions(), (80, 60));
    }

    #[test]
    fn uniform_image_stays_uniform() {
        let img = GrayImage::from_pixel(64, 64, image::Luma([128]));
        let out = clahe(&img, 2.0, 8);
        let first = out.get_pixel(0, 0).0[0];
        assert!(out.pixels().all(|p| p.0[0] == first));
    }

    #[test]
    fn zero_grid_returns_copy() {
        let img = GrayImage::from_fn(5, 5, |x, y| image::Luma([(x * 10 + y) as u8]));
        assert_eq!(clahe(&img, 2.0, 0), img);
    }

    #[test]
    fn stretches_low_contrast_region() {
        // Values confined to 100..=115 should spread out.
        let img = GrayImage::from_fn(64, 64, |x, y| image::Luma([100 + ((x + y) % 16) as u8]));
        let out = clahe(&img, 2.0, 8);
        assert!(
            spread(&out) > spread(&img),
            "expected spread to grow: {} -> {}",
            spread(&img),
            spread(&out),
        );
    }

    #[test]
    fn single_tile_is_monotonic() {
        // With one tile there is no blending, so the mapping is a plain
        // non-decreasing lookup table.
        let img = GrayImage::from_fn(64, 8, |x, _| image::Luma([(x * 2) as u8]));
        let out = clahe(&img, 2.0, 1);
        for x in 1..64 {
            assert!(
                out.get_pixel(x, 4).0[0] >= out.get_pixel(x - 1, 4).0[0],
                "non-monotonic at x={x}"
            );
        }
    }

    #[test]
    fn handles_images_smaller_than_grid() {
        let img = GrayImage::from_fn(3, 5, |x, y| image::Luma([(x * 40 + y * 5) as u8]));
        let out = clahe(&img, 2.0, 8);
        assert_eq!(out.dimensions(), (3, 5));
    }

    #[test]
    fn clip_histogram_conserves_total() {
        let mut hist = [0u64; BINS];
        hist[10] = 1000;
        hist[200] = 24;
        clip_histogram(&mut hist, 8);
        assert_eq!(hist.iter().sum::<u64>(), 1024);
        assert!(hist[10] <= 8 + 4);
    }

    #[test]
    fn clip_threshold_has_floor_of_one() {
        assert_eq!(clip_threshold(2.0, 10), Some(1));
        assert_eq!(clip_threshold(2.0, 64 * 64), Some(32));
        assert_eq!(clip_threshold(0.0, 64 * 64), None);
    }
}
