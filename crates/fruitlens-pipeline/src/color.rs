//! 8-bit color space conversions used by the enhancement chain.
//!
//! Images are split into three [`GrayImage`] planes so each transform can
//! touch a single channel and recombine. The encodings follow the usual
//! 8-bit conventions:
//!
//! - **Lab**: CIE L\*a\*b\* (D65, sRGB gamma). `L` is scaled to
//!   `[0, 255]`, `a` and `b` are offset by 128.
//! - **YUV**: analog YUV with luma `0.299 R + 0.587 G + 0.114 B` and
//!   chroma offset by 128.

use crate::enhance::EnhanceError;
use crate::types::{GrayImage, RgbImage};

/// Three equally sized single-channel planes.
pub type Planes = [GrayImage; 3];

/// Round half to even and saturate to `u8`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn saturate_u8(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round_ties_even().clamp(0.0, 255.0) as u8
}

/// Split an RGB image into planes after mapping every pixel through `f`.
fn split_with(image: &RgbImage, f: impl Fn([u8; 3]) -> [u8; 3]) -> Planes {
    let (w, h) = image.dimensions();
    let mut planes: Planes = std::array::from_fn(|_| GrayImage::new(w, h));
    for (x, y, pixel) in image.enumerate_pixels() {
        let mapped = f(pixel.0);
        for (plane, value) in planes.iter_mut().zip(mapped) {
            plane.put_pixel(x, y, image::Luma([value]));
        }
    }
    planes
}

/// Merge planes into an RGB image after mapping every pixel through `f`.
fn merge_with(planes: &Planes, f: impl Fn([u8; 3]) -> [u8; 3]) -> Result<RgbImage, EnhanceError> {
    let dims = planes[0].dimensions();
    if let Some(bad) = planes.iter().find(|p| p.dimensions() != dims) {
        return Err(EnhanceError::PlaneMismatch {
            expected: dims,
            actual: bad.dimensions(),
        });
    }
    let (w, h) = dims;
    Ok(RgbImage::from_fn(w, h, |x, y| {
        let px = [
            planes[0].get_pixel(x, y).0[0],
            planes[1].get_pixel(x, y).0[0],
            planes[2].get_pixel(x, y).0[0],
        ];
        image::Rgb(f(px))
    }))
}

// ───────────────────────────── Lab ──────────────────────────────────

const D65_XN: f32 = 0.950_456;
const D65_ZN: f32 = 1.088_754;
const LAB_EPSILON: f32 = 0.008_856;
const LAB_KAPPA: f32 = 903.3;

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055f32.mul_add(c.powf(1.0 / 2.4), -0.055)
    }
}

fn lab_f(t: f32) -> f32 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        7.787f32.mul_add(t, 16.0 / 116.0)
    }
}

fn lab_f_inv(f: f32) -> f32 {
    let cube = f * f * f;
    if cube > LAB_EPSILON {
        cube
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

fn rgb_pixel_to_lab([r, g, b]: [u8; 3]) -> [u8; 3] {
    let r = srgb_to_linear(f32::from(r) / 255.0);
    let g = srgb_to_linear(f32::from(g) / 255.0);
    let b = srgb_to_linear(f32::from(b) / 255.0);

    let x = 0.180_423f32.mul_add(b, 0.412_453f32.mul_add(r, 0.357_580 * g)) / D65_XN;
    let y = 0.072_169f32.mul_add(b, 0.212_671f32.mul_add(r, 0.715_160 * g));
    let z = 0.950_227f32.mul_add(b, 0.019_334f32.mul_add(r, 0.119_193 * g)) / D65_ZN;

    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    let l = if y > LAB_EPSILON {
        116.0f32.mul_add(fy, -16.0)
    } else {
        LAB_KAPPA * y
    };
    let a = 500.0 * (fx - fy);
    let bb = 200.0 * (fy - fz);

    [
        saturate_u8(l * 255.0 / 100.0),
        saturate_u8(a + 128.0),
        saturate_u8(bb + 128.0),
    ]
}

fn lab_pixel_to_rgb([l, a, b]: [u8; 3]) -> [u8; 3] {
    let l = f32::from(l) * 100.0 / 255.0;
    let a = f32::from(a) - 128.0;
    let b = f32::from(b) - 128.0;

    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let y = if l > LAB_KAPPA * LAB_EPSILON {
        fy * fy * fy
    } else {
        l / LAB_KAPPA
    };
    let x = lab_f_inv(fx) * D65_XN;
    let z = lab_f_inv(fz) * D65_ZN;

    let r = 3.240_479f32.mul_add(x, (-1.537_15f32).mul_add(y, -0.498_535 * z));
    let g = (-0.969_256f32).mul_add(x, 1.875_991f32.mul_add(y, 0.041_556 * z));
    let bl = 0.055_648f32.mul_add(x, (-0.204_043f32).mul_add(y, 1.057_311 * z));

    let encode = |c: f32| saturate_u8(linear_to_srgb(c.clamp(0.0, 1.0)) * 255.0);
    [encode(r), encode(g), encode(bl)]
}

/// Split an RGB image into 8-bit `L`, `a`, `b` planes.
#[must_use]
pub fn rgb_to_lab(image: &RgbImage) -> Planes {
    split_with(image, rgb_pixel_to_lab)
}

/// Recombine 8-bit `L`, `a`, `b` planes into an RGB image.
///
/// # Errors
///
/// Returns [`EnhanceError::PlaneMismatch`] if the planes differ in size.
pub fn lab_to_rgb(planes: &Planes) -> Result<RgbImage, EnhanceError> {
    merge_with(planes, lab_pixel_to_rgb)
}

// ───────────────────────────── YUV ──────────────────────────────────

fn rgb_pixel_to_yuv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let y = 0.114f32.mul_add(b, 0.299f32.mul_add(r, 0.587 * g));
    let u = 0.492f32.mul_add(b - y, 128.0);
    let v = 0.877f32.mul_add(r - y, 128.0);
    [saturate_u8(y), saturate_u8(u), saturate_u8(v)]
}

fn yuv_pixel_to_rgb([y, u, v]: [u8; 3]) -> [u8; 3] {
    let y = f32::from(y);
    let u = f32::from(u) - 128.0;
    let v = f32::from(v) - 128.0;
    let r = 1.140f32.mul_add(v, y);
    let g = (-0.581f32).mul_add(v, (-0.395f32).mul_add(u, y));
    let b = 2.032f32.mul_add(u, y);
    [saturate_u8(r), saturate_u8(g), saturate_u8(b)]
}

/// Split an RGB image into 8-bit `Y`, `U`, `V` planes.
#[must_use]
pub fn rgb_to_yuv(image: &RgbImage) -> Planes {
    split_with(image, rgb_pixel_to_yuv)
}

/// Recombine 8-bit `Y`, `U`, `V` planes into an RGB image.
///
/// # Errors
///
/// Returns [`EnhanceError::PlaneMismatch`] if the planes differ in size.
pub fn yuv_to_rgb(planes: &Planes) -> Result<RgbImage, EnhanceError> {
    merge_with(planes, yuv_pixel_to_rgb)
}
