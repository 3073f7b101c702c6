//! Global histogram equalization of a single channel.

use crate::color::saturate_u8;
use crate::types::GrayImage;

/// Build the equalization lookup table for a 256-bin histogram.
///
/// Levels are mapped through the cumulative histogram rescaled so that
/// the darkest occupied level becomes 0 and the brightest becomes 255.
/// A histogram with a single occupied level maps that level to itself.
#[must_use]
pub fn equalization_lut(hist: &[u64; 256]) -> [u8; 256] {
    let total: u64 = hist.iter().sum();
    let Some(first) = hist.iter().position(|&count| count > 0) else {
        return identity_lut();
    };

    let first_count = hist[first];
    if first_count == total {
        let mut lut = [0u8; 256];
        #[allow(clippy::cast_possible_truncation)]
        {
            lut[first] = first as u8;
        }
        return lut;
    }

    #[allow(clippy::cast_precision_loss)]
    let scale = 255.0 / (total - first_count) as f32;
    let mut lut = [0u8; 256];
    let mut sum = 0u64;
    for level in (first + 1)..256 {
        sum += hist[level];
        #[allow(clippy::cast_precision_loss)]
        let mapped = sum as f32 * scale;
        lut[level] = saturate_u8(mapped);
    }
    lut
}

fn identity_lut() -> [u8; 256] {
    #[allow(clippy::cast_possible_truncation)]
    std::array::from_fn(|i| i as u8)
}

/// Equalize the histogram of a grayscale image.
#[must_use = "returns the equalized image"]
pub fn equalize_histogram(image: &GrayImage) -> GrayImage {
    let mut hist = [0u64; 256];
    for p in image.pixels() {
        hist[usize::from(p.0[0])] += 1;
    }
    let lut = equalization_lut(&hist);

    let mut out = image.clone();
    for p in out.pixels_mut() {
        p.0[0] = lut[usize::from(p.0[0])];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stretches_to_full_range() {
        let img = GrayImage::from_fn(16, 16, |x, _| image::Luma([100 + (x as u8)]));
        let out = equalize_histogram(&img);
        let min = out.pixels().map(|p| p.0[0]).min().unwrap_or(1);
        let max = out.pixels().map(|p| p.0[0]).max().unwrap_or(0);
        assert_eq!(min, 0);
        assert_eq!(max, 255);
    }

    #[test]
    fn uniform_image_is_unchanged() {
        let img = GrayImage::from_pixel(9, 9, image::Luma([42]));
        assert_eq!(equalize_histogram(&img), img);
    }

    #[test]
    fn empty_histogram_is_identity() {
        let lut = equalization_lut(&[0; 256]);
        assert_eq!(lut[0], 0);
        assert_eq!(lut[200], 200);
    }

    #[test]
    fn two_levels_map_to_extremes() {
        let mut hist = [0u64; 256];
        hist[60] = 10;
        hist[70] = 10;
        let lut = equalization_lut(&hist);
        assert_eq!(lut[60], 0);
        assert_eq!(lut[70], 255);
    }

    #[test]
    fn lut_is_monotonic() {
        let mut hist = [0u64; 256];
        for (i, slot) in hist.iter_mut().enumerate() {
            *slot = (i as u64 * 7) % 13;
        }
        let lut = equalization_lut(&hist);
        let first = hist.iter().position(|&c| c > 0).unwrap_or(0);
        for i in (first + 1)..256 {
            assert!(lut[i] >= lut[i - 1], "lut decreases at {i}");
        }
    }
}
