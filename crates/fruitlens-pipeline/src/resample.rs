//! Resizing: the downscale guard and the classifier input resize.
//!
//! [`downscale_to_fit`] bounds the cost of the enhancement filters by
//! shrinking images whose longer side exceeds a cap. [`resize_exact`]
//! produces the fixed square classifier input (resize, not crop).

use std::fmt;

use image::imageops;
use serde::{Deserialize, Serialize};

use crate::types::RgbImage;

/// Resampling filter.
///
/// Ordered from fastest/lowest-quality to slowest/highest-quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResampleFilter {
    /// Nearest-neighbor: fastest, blocky artifacts.
    Nearest,
    /// Bilinear interpolation: fast, decent quality.
    #[default]
    Triangle,
    /// Bicubic (Catmull-Rom): moderate speed, good quality.
    CatmullRom,
    /// Gaussian: moderate speed, smooth output.
    Gaussian,
    /// Lanczos with 3 lobes: slowest, sharpest/best for photos.
    Lanczos3,
}

impl ResampleFilter {
    /// Convert to the `image` crate's `FilterType`.
    const fn to_image_filter(self) -> imageops::FilterType {
        match self {
            Self::Nearest => imageops::FilterType::Nearest,
            Self::Triangle => imageops::FilterType::Triangle,
            Self::CatmullRom => imageops::FilterType::CatmullRom,
            Self::Gaussian => imageops::FilterType::Gaussian,
            Self::Lanczos3 => imageops::FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for ResampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => f.write_str("Nearest"),
            Self::Triangle => f.write_str("Triangle"),
            Self::CatmullRom => f.write_str("CatmullRom"),
            Self::Gaussian => f.write_str("Gaussian"),
            Self::Lanczos3 => f.write_str("Lanczos3"),
        }
    }
}

/// Target size that scales `(width, height)` uniformly so the longer
/// side equals `max_dimension`.
///
/// The shorter side is rounded to the nearest pixel and never drops
/// below 1.
#[must_use]
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let long = width.max(height);
    if long <= max_dimension || long == 0 {
        return (width, height);
    }

    let scale = f64::from(max_dimension) / f64::from(long);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let shrink = |side: u32| -> u32 {
        if side == long {
            max_dimension
        } else {
            ((f64::from(side) * scale).round() as u32).max(1)
        }
    };
    (shrink(width), shrink(height))
}

/// Downscale an image so its longer side is at most `max_dimension`
/// pixels, preserving aspect ratio.
///
/// Returns the (possibly unchanged) image and whether downscaling was
/// actually applied.
#[must_use]
pub fn downscale_to_fit(
    image: &RgbImage,
    max_dimension: u32,
    filter: ResampleFilter,
) -> (RgbImage, bool) {
    let (w, h) = image.dimensions();
    let (nw, nh) = fit_within(w, h, max_dimension);
    if (nw, nh) == (w, h) {
        return (image.clone(), false);
    }

    let resized = imageops::resize(image, nw, nh, filter.to_image_filter());
    (resized, true)
}

/// Resize an image to exactly `width` x `height`, ignoring aspect ratio.
#[must_use = "returns the resized image"]
pub fn resize_exact(image: &RgbImage, width: u32, height: u32, filter: ResampleFilter) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, filter.to_image_filter())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, image::Rgb([128, 128, 128]))
    }

    #[test]
    fn default_filter_is_triangle() {
        assert_eq!(ResampleFilter::default(), ResampleFilter::Triangle);
    }

    #[test]
    fn no_downscale_when_already_small() {
        let img = test_image(100, 80);
        let (result, applied) = downscale_to_fit(&img, 1024, ResampleFilter::Triangle);
        assert!(!applied);
        assert_eq!(result.dimensions(), (100, 80));
    }

    #[test]
    fn no_downscale_when_exact_match() {
        let img = test_image(1024, 600);
        let (result, applied) = downscale_to_fit(&img, 1024, ResampleFilter::Triangle);
        assert!(!applied);
        assert_eq!(result.dimensions(), (1024, 600));
    }

    #[test]
    fn downscale_landscape() {
        let img = test_image(2000, 1000);
        let (result, applied) = downscale_to_fit(&img, 1024, ResampleFilter::Triangle);
        assert!(applied);
        assert_eq!(result.dimensions(), (1024, 512));
    }

    #[test]
    fn downscale_portrait() {
        let img = test_image(600, 1200);
        let (result, applied) = downscale_to_fit(&img, 256, ResampleFilter::Triangle);
        assert!(applied);
        assert_eq!(result.dimensions(), (128, 256));
    }

    #[test]
    fn downscale_square() {
        let img = test_image(1030, 1030);
        let (result, applied) = downscale_to_fit(&img, 1024, ResampleFilter::Triangle);
        assert!(applied);
        assert_eq!(result.dimensions(), (1024, 1024));
    }

    #[test]
    fn fit_within_rounds_short_side() {
        // 1500 * 1024 / 2048 = 750
        assert_eq!(fit_within(2048, 1500, 1024), (1024, 750));
        // 1001 * 1024 / 3000 = 341.67 -> 342
        assert_eq!(fit_within(3000, 1001, 1024), (1024, 342));
    }

    #[test]
    fn fit_within_keeps_sliver_visible() {
        assert_eq!(fit_within(5000, 1, 1024), (1024, 1));
    }

    #[test]
    fn resize_exact_ignores_aspect_ratio() {
        let img = test_image(640, 200);
        let result = resize_exact(&img, 300, 300, ResampleFilter::CatmullRom);
        assert_eq!(result.dimensions(), (300, 300));
    }

    #[test]
    fn resize_exact_upscales_small_images() {
        let img = test_image(3, 5);
        let result = resize_exact(&img, 300, 300, ResampleFilter::CatmullRom);
        assert_eq!(result.dimensions(), (300, 300));
        assert!(result.pixels().all(|p| p.0 == [128, 128, 128]));
    }
}
