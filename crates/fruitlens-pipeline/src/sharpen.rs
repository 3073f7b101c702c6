//! 3x3 convolution used for sharpening.
//!
//! Each RGB channel is convolved independently with the same kernel by
//! [`imageproc::filter::filter`], which clamps sample coordinates to the
//! image (replicate border). The `f32` sums are rounded half to even and
//! saturated to `u8`.

use imageproc::filter::filter;
use imageproc::kernel::Kernel;

use crate::color::saturate_u8;
use crate::types::RgbImage;

/// Convolve an RGB image with a row-major 3x3 kernel.
#[must_use = "returns the filtered image"]
pub fn filter3x3(image: &RgbImage, kernel: &[f32; 9]) -> RgbImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    filter(image, Kernel::new(kernel, 3, 3), saturate_u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EnhancementParameters;

    const IDENTITY: [f32; 9] = [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];

    #[test]
    fn identity_kernel_is_noop() {
        let img = RgbImage::from_fn(6, 4, |x, y| image::Rgb([x as u8 * 20, y as u8 * 30, 7]));
        assert_eq!(filter3x3(&img, &IDENTITY), img);
    }

    #[test]
    fn sharpen_kernel_halves_flat_regions() {
        // The product kernel sums to 0.5, so flat areas are halved.
        let img = RgbImage::from_pixel(5, 5, image::Rgb([100, 200, 40]));
        let out = filter3x3(&img, &EnhancementParameters::STANDARD.sharpen_kernel());
        assert!(out.pixels().all(|p| p.0 == [50, 100, 20]));
    }

    #[test]
    fn replicate_border_keeps_corners_flat() {
        // With replicated borders a flat image has no edge artifacts even
        // at the corners.
        let img = RgbImage::from_pixel(3, 3, image::Rgb([80, 80, 80]));
        let out = filter3x3(&img, &EnhancementParameters::STANDARD.sharpen_kernel());
        assert_eq!(out.get_pixel(0, 0).0, [40, 40, 40]);
        assert_eq!(out.get_pixel(2, 2).0, [40, 40, 40]);
    }

    #[test]
    fn sharpen_amplifies_isolated_peak() {
        let mut img = RgbImage::from_pixel(5, 5, image::Rgb([100, 100, 100]));
        img.put_pixel(2, 2, image::Rgb([140, 140, 140]));
        let out = filter3x3(&img, &EnhancementParameters::STANDARD.sharpen_kernel());
        // 2.5 * 140 - 0.25 * 8 * 100 = 150
        assert_eq!(out.get_pixel(2, 2).0, [150, 150, 150]);
        // Neighbor: 2.5 * 100 - 0.25 * (7 * 100 + 140) = 40
        assert_eq!(out.get_pixel(1, 2).0, [40, 40, 40]);
    }

    #[test]
    fn rounds_half_to_even() {
        // 0.5 * 5 = 2.5 and 0.5 * 7 = 3.5 on a flat image.
        let img = RgbImage::from_pixel(4, 4, image::Rgb([5, 7, 9]));
        let out = filter3x3(&img, &EnhancementParameters::STANDARD.sharpen_kernel());
        assert!(out.pixels().all(|p| p.0 == [2, 4, 4]));
    }

    #[test]
    fn edge_column_uses_replicated_neighbors() {
        // Left column 0, the rest 100. At x = 0 the replicated column is
        // also 0: 2.5 * 0 - 0.25 * (3 * 100 + 5 * 0) = -75, saturated to 0.
        // At x = 1: 2.5 * 100 - 0.25 * (3 * 0 + 5 * 100) = 125.
        let img = RgbImage::from_fn(4, 3, |x, _| {
            if x == 0 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([100, 100, 100])
            }
        });
        let out = filter3x3(&img, &EnhancementParameters::STANDARD.sharpen_kernel());
        assert_eq!(out.get_pixel(0, 1).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(1, 1).0, [125, 125, 125]);
    }

    #[test]
    fn empty_image_passes_through() {
        let img = RgbImage::new(0, 3);
        assert_eq!(filter3x3(&img, &IDENTITY).dimensions(), (0, 3));
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let mut img = RgbImage::from_pixel(3, 3, image::Rgb([0, 0, 0]));
        img.put_pixel(1, 1, image::Rgb([255, 255, 255]));
        let out = filter3x3(&img, &EnhancementParameters::STANDARD.sharpen_kernel());
        assert_eq!(out.get_pixel(1, 1).0, [255, 255, 255]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0]);
    }
}
