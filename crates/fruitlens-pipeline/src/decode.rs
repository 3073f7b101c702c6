//! Image decoding and RGB mode normalization.
//!
//! Accepts raw JPEG or PNG bytes and produces an 8-bit RGB image. Alpha
//! channels are dropped and greyscale inputs are expanded to three
//! identical channels, so every later stage can assume RGB.

use image::{DynamicImage, ImageFormat};

use crate::types::{PipelineError, RgbImage};

/// Decode raw image bytes, accepting only JPEG and PNG.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::UnsupportedFormat`] for recognized formats
/// other than JPEG and PNG.
/// Returns [`PipelineError::ImageDecode`] if the format is unrecognized
/// or the data is corrupt.
/// Returns [`PipelineError::EmptyImage`] if the decoded image has no
/// pixels.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let format = image::guess_format(bytes)?;
    if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg) {
        return Err(PipelineError::UnsupportedFormat(format!("{format:?}")));
    }

    let image = image::load_from_memory_with_format(bytes, format)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::EmptyImage);
    }
    Ok(image)
}

/// Convert any decoded image to 8-bit RGB.
///
/// Alpha is discarded rather than composited, matching a plain mode
/// conversion.
#[must_use = "returns the converted RGB image"]
pub fn to_rgb(image: &DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb.clone(),
        other => other.to_rgb8(),
    }
}
