//! Non-local-means denoising.
//!
//! Every pixel is replaced by a weighted average of the pixels in a
//! square search window around it. The weight of a candidate pixel
//! depends on how similar the template patch around it is to the patch
//! around the pixel being denoised, so flat areas get averaged while
//! edges (whose patches differ) are left alone.
//!
//! Patch distances are computed once per search offset over the whole
//! image and summed with an integral image, which makes the cost
//! independent of the template size.
//!
//! [`denoise_colored`] works in Lab: the lightness plane is filtered on
//! its own, and the two chroma planes are filtered together with a
//! separate strength.

use crate::border::reflect_101;
use crate::color::{self, saturate_u8};
use crate::enhance::EnhanceError;
use crate::types::{GrayImage, RgbImage};

/// Weights below this are treated as zero.
const MIN_WEIGHT: f64 = 0.001;

/// A plane with mirrored borders, addressable with signed coordinates.
struct Padded {
    data: Vec<u8>,
    stride: usize,
    pad: i64,
}

impl Padded {
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn new(plane: &GrayImage, pad: i64) -> Self {
        let (w, h) = plane.dimensions();
        let stride = (i64::from(w) + 2 * pad) as usize;
        let rows = (i64::from(h) + 2 * pad) as usize;
        let mut data = Vec::with_capacity(stride * rows);
        for y in -pad..i64::from(h) + pad {
            let sy = reflect_101(y, h);
            for x in -pad..i64::from(w) + pad {
                data.push(plane.get_pixel(reflect_101(x, w), sy).0[0]);
            }
        }
        Self { data, stride, pad }
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn at(&self, x: i64, y: i64) -> u8 {
        self.data[(y + self.pad) as usize * self.stride + (x + self.pad) as usize]
    }
}

/// Weight for every patch SSD that yields a weight of at least
/// [`MIN_WEIGHT`]; larger SSDs are outside the table.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn weight_table(strength: f32, area: u64, channels: usize) -> Vec<f32> {
    let denom = f64::from(strength).powi(2) * channels as f64 * area as f64;
    let max_ssd = (denom * (1.0 / MIN_WEIGHT).ln()).floor() as usize;
    (0..=max_ssd)
        .map(|ssd| (-(ssd as f64) / denom).exp() as f32)
        .collect()
}

/// Jointly denoise one or more equally sized planes.
///
/// Patch distances are summed over all planes, so the planes share one
/// set of weights. `strength` plays the role of the filter parameter `h`:
/// larger values smooth more. A non-positive strength returns the planes
/// unchanged.
///
/// # Errors
///
/// Returns [`EnhanceError::PlaneMismatch`] if the planes differ in size.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn nl_means(
    planes: &[&GrayImage],
    strength: f32,
    template_window: u32,
    search_window: u32,
) -> Result<Vec<GrayImage>, EnhanceError> {
    let Some(first) = planes.first() else {
        return Ok(Vec::new());
    };
    let dims = first.dimensions();
    if let Some(bad) = planes.iter().find(|p| p.dimensions() != dims) {
        return Err(EnhanceError::PlaneMismatch {
            expected: dims,
            actual: bad.dimensions(),
        });
    }
    let (w, h) = dims;
    if strength <= 0.0 || w == 0 || h == 0 {
        return Ok(planes.iter().map(|p| (*p).clone()).collect());
    }

    let tr = i64::from(template_window / 2);
    let sr = i64::from(search_window / 2);
    let padded: Vec<Padded> = planes.iter().map(|p| Padded::new(p, tr + sr)).collect();
    let side = (2 * tr + 1) as usize;
    let weights = weight_table(strength, (side * side) as u64, planes.len());

    let (wu, hu) = (w as usize, h as usize);
    let mut sums = vec![vec![0.0f32; wu * hu]; planes.len()];
    let mut weight_sum = vec![0.0f32; wu * hu];

    // Distance domain: the image grown by the template radius.
    let dw = wu + 2 * tr as usize;
    let dh = hu + 2 * tr as usize;
    let stride = dw + 1;
    let mut integral = vec![0u64; stride * (dh + 1)];

    for dy in -sr..=sr {
        for dx in -sr..=sr {
            for iy in 0..dh {
                let y = iy as i64 - tr;
                let mut row = 0u64;
                for ix in 0..dw {
                    let x = ix as i64 - tr;
                    for p in &padded {
                        let diff = i64::from(p.at(x, y)) - i64::from(p.at(x + dx, y + dy));
                        row += (diff * diff) as u64;
                    }
                    integral[(iy + 1) * stride + ix + 1] = integral[iy * stride + ix + 1] + row;
                }
            }

            for y in 0..hu {
                for x in 0..wu {
                    let (x1, y1) = (x + side, y + side);
                    let ssd = integral[y1 * stride + x1] + integral[y * stride + x]
                        - integral[y * stride + x1]
                        - integral[y1 * stride + x];
                    let Some(&weight) = weights.get(ssd as usize) else {
                        continue;
                    };
                    let i = y * wu + x;
                    weight_sum[i] += weight;
                    for (sum, p) in sums.iter_mut().zip(&padded) {
                        let v = p.at(x as i64 + dx, y as i64 + dy);
                        sum[i] = weight.mul_add(f32::from(v), sum[i]);
                    }
                }
            }
        }
    }

    Ok(sums
        .iter()
        .map(|sum| {
            GrayImage::from_fn(w, h, |x, y| {
                let i = y as usize * wu + x as usize;
                image::Luma([saturate_u8(sum[i] / weight_sum[i])])
            })
        })
        .collect())
}

/// Color-aware non-local-means denoising of an RGB image.
///
/// # Errors
///
/// Propagates [`EnhanceError`] from the Lab round trip.
pub fn denoise_colored(
    image: &RgbImage,
    luminance_strength: f32,
    color_strength: f32,
    template_window: u32,
    search_window: u32,
) -> Result<RgbImage, EnhanceError> {
    let [l, a, b] = color::rgb_to_lab(image);

    let mut l = nl_means(&[&l], luminance_strength, template_window, search_window)?;
    let mut ab = nl_means(&[&a, &b], color_strength, template_window, search_window)?.into_iter();

    match (l.pop(), ab.next(), ab.next()) {
        (Some(l), Some(a), Some(b)) => color::lab_to_rgb(&[l, a, b]),
        _ => Err(EnhanceError::Step {
            step: "denoise",
            reason: "filtering dropped a Lab plane".to_string(),
        }),
    }
}
