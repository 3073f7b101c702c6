//! Classifier input preparation.
//!
//! [`Preprocessor::prepare`] turns a decoded image into the tensor the
//! classifier expects:
//!
//! 1. Convert to 8-bit RGB.
//! 2. Enhance (see [`crate::enhance`]).
//! 3. Resize to a fixed square input, ignoring aspect ratio.
//! 4. Apply random brightness and contrast jitter.
//! 5. Normalize values and add a batch dimension of 1.
//!
//! Step 4 makes repeated runs on the same image differ slightly. Use
//! [`Jitter::NONE`] or a seeded RNG where reproducibility matters.

use image::DynamicImage;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::color::saturate_u8;
use crate::decode;
use crate::diagnostics::{Clock, NullClock, PrepareDiagnostics, StageDiagnostics, StageMetrics};
use crate::enhance::{EnhanceError, EnhanceOutcome, ImageEnhancer};
use crate::resample;
use crate::types::{InputTensor, PipelineError, PreprocessConfig, RgbImage};

/// Brightness/contrast augmentation settings.
///
/// Both factors scale pixel values (`v' = |v * factor|`, saturated to
/// `u8`), brightness first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Jitter {
    /// Sample both factors independently and uniformly from `[min, max]`.
    Random {
        /// Lower bound (inclusive).
        min: f32,
        /// Upper bound (inclusive).
        max: f32,
    },
    /// Use the given factors.
    Fixed {
        /// Brightness factor.
        brightness: f32,
        /// Contrast factor.
        contrast: f32,
    },
}

impl Jitter {
    /// Light augmentation: both factors drawn from `[0.9, 1.1]`.
    pub const DEFAULT: Self = Self::Random { min: 0.9, max: 1.1 };

    /// No augmentation.
    pub const NONE: Self = Self::Fixed {
        brightness: 1.0,
        contrast: 1.0,
    };

    /// Check the factors are usable.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for non-finite or negative
    /// factors, or an inverted range.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let (a, b) = match *self {
            Self::Random { min, max } => {
                if min > max {
                    return Err(PipelineError::InvalidConfig(format!(
                        "jitter range is inverted: min {min} > max {max}"
                    )));
                }
                (min, max)
            }
            Self::Fixed {
                brightness,
                contrast,
            } => (brightness, contrast),
        };
        for factor in [a, b] {
            if !factor.is_finite() || factor < 0.0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "jitter factors must be finite and non-negative, got {factor}"
                )));
            }
        }
        Ok(())
    }

    /// Resolve the factors for one request.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if [`Jitter::validate`]
    /// fails. No random numbers are drawn in that case.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<AppliedJitter, PipelineError> {
        self.validate()?;
        Ok(match *self {
            Self::Random { min, max } => AppliedJitter {
                brightness: rng.gen_range(min..=max),
                contrast: rng.gen_range(min..=max),
            },
            Self::Fixed {
                brightness,
                contrast,
            } => AppliedJitter {
                brightness,
                contrast,
            },
        })
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The jitter factors actually applied to one request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AppliedJitter {
    /// Brightness factor.
    pub brightness: f32,
    /// Contrast factor.
    pub contrast: f32,
}

impl AppliedJitter {
    /// Factors that leave the image unchanged.
    pub const IDENTITY: Self = Self {
        brightness: 1.0,
        contrast: 1.0,
    };
}

/// Apply jitter factors to an image.
#[must_use = "returns the adjusted image"]
#[allow(clippy::float_cmp)]
pub fn apply_jitter(image: &RgbImage, jitter: AppliedJitter) -> RgbImage {
    let mut out = image.clone();
    for factor in [jitter.brightness, jitter.contrast] {
        if factor == 1.0 {
            continue;
        }
        for p in out.pixels_mut() {
            p.0 = p.0.map(|v| saturate_u8((f32::from(v) * factor).abs()));
        }
    }
    out
}

/// Value mapping applied to each channel before inference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputNormalization {
    /// Raw `[0, 255]` values; the model rescales internally
    /// (EfficientNetV2).
    #[default]
    Passthrough,
    /// `v / 255`, giving `[0, 1]`.
    UnitRange,
    /// `v / 127.5 - 1`, giving `[-1, 1]`.
    Symmetric,
    /// `(v / 255 - mean[c]) / std[c]`.
    MeanStd {
        /// Per-channel mean, RGB order.
        mean: [f32; 3],
        /// Per-channel standard deviation, RGB order.
        std: [f32; 3],
    },
}

impl InputNormalization {
    /// ImageNet statistics.
    pub const IMAGENET: Self = Self::MeanStd {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };

    /// Check the mapping is well defined.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if a standard deviation is
    /// zero or any statistic is non-finite.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if let Self::MeanStd { mean, std } = self {
            if mean.iter().chain(std).any(|v| !v.is_finite()) {
                return Err(PipelineError::InvalidConfig(
                    "normalization statistics must be finite".to_string(),
                ));
            }
            if std.contains(&0.0) {
                return Err(PipelineError::InvalidConfig(
                    "normalization std must be non-zero".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn apply(&self, value: u8, channel: usize) -> f32 {
        let v = f32::from(value);
        match self {
            Self::Passthrough => v,
            Self::UnitRange => v / 255.0,
            Self::Symmetric => v / 127.5 - 1.0,
            Self::MeanStd { mean, std } => (v / 255.0 - mean[channel]) / std[channel],
        }
    }
}

/// Axis order of the classifier input tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
    /// `[1, H, W, 3]` (channels last, Keras default).
    #[default]
    Nhwc,
    /// `[1, 3, H, W]` (channels first).
    Nchw,
}

/// Convert an image to a batched, normalized tensor.
///
/// # Errors
///
/// Returns [`PipelineError::Tensor`] if the buffer does not fit the
/// requested shape.
pub fn to_tensor(
    image: &RgbImage,
    normalization: &InputNormalization,
    layout: TensorLayout,
) -> Result<InputTensor, PipelineError> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let tensor = match layout {
        TensorLayout::Nhwc => {
            let data = image
                .pixels()
                .flat_map(|p| p.0.into_iter().enumerate())
                .map(|(c, v)| normalization.apply(v, c))
                .collect();
            InputTensor::from_shape_vec((1, h, w, 3), data)?
        }
        TensorLayout::Nchw => {
            let mut data = Vec::with_capacity(3 * w * h);
            for c in 0..3 {
                data.extend(image.pixels().map(|p| normalization.apply(p.0[c], c)));
            }
            InputTensor::from_shape_vec((1, 3, h, w), data)?
        }
    };
    Ok(tensor)
}

/// Everything [`Preprocessor::prepare`] produces.
#[derive(Debug, Clone)]
pub struct PreparedInput {
    /// Classifier input.
    pub tensor: InputTensor,
    /// Enhanced image resized to the input size, before jitter.
    pub resized: RgbImage,
    /// Enhanced image at working resolution.
    pub enhanced: RgbImage,
    /// Set when enhancement fell back to the original image.
    pub enhancement_warning: Option<EnhanceError>,
    /// Jitter factors applied to the tensor.
    pub jitter: AppliedJitter,
}

/// Prepares classifier input from decoded images.
#[derive(Debug, Default)]
pub struct Preprocessor {
    enhancer: ImageEnhancer,
    config: PreprocessConfig,
}

impl Preprocessor {
    /// A preprocessor with the standard enhancer.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `config` fails
    /// [`PreprocessConfig::validate`].
    pub fn new(config: PreprocessConfig) -> Result<Self, PipelineError> {
        Self::with_enhancer(ImageEnhancer::standard(), config)
    }

    /// A preprocessor with a custom enhancer.
    ///
    /// # Errors
    ///
    /// Same as [`Preprocessor::new`].
    pub fn with_enhancer(
        enhancer: ImageEnhancer,
        config: PreprocessConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { enhancer, config })
    }

    /// The enhancer used in step 2.
    #[must_use]
    pub const fn enhancer(&self) -> &ImageEnhancer {
        &self.enhancer
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Prepare an image using the thread-local RNG for jitter.
    ///
    /// # Errors
    ///
    /// See [`Preprocessor::prepare_with_rng`].
    pub fn prepare(&self, image: &DynamicImage) -> Result<PreparedInput, PipelineError> {
        self.prepare_with_rng(image, &mut rand::thread_rng())
    }

    /// Prepare an image, drawing jitter factors from `rng`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyImage`] for an image without pixels
    /// and [`PipelineError::Tensor`] if the tensor cannot be assembled.
    /// No partial output is returned on error.
    pub fn prepare_with_rng<R: Rng + ?Sized>(
        &self,
        image: &DynamicImage,
        rng: &mut R,
    ) -> Result<PreparedInput, PipelineError> {
        self.prepare_with_clock(image, &NullClock, rng).map(|(prepared, _)| prepared)
    }

    /// [`Preprocessor::prepare_with_rng`], timing each enhancement step
    /// and the tensor preparation with `clock`.
    ///
    /// # Errors
    ///
    /// See [`Preprocessor::prepare_with_rng`].
    pub fn prepare_with_clock<C: Clock, R: Rng + ?Sized>(
        &self,
        image: &DynamicImage,
        clock: &C,
        rng: &mut R,
    ) -> Result<(PreparedInput, PrepareDiagnostics), PipelineError> {
        let rgb = decode::to_rgb(image);
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(PipelineError::EmptyImage);
        }
        let (outcome, enhance) = self.enhancer.enhance_with_clock(&rgb, clock);

        let t = clock.now();
        let prepared = self.prepare_enhanced(outcome, rng)?;
        let preprocess = StageDiagnostics {
            duration: clock.elapsed(&t),
            metrics: StageMetrics::Preprocess {
                input_size: self.config.input_size,
                brightness: prepared.jitter.brightness,
                contrast: prepared.jitter.contrast,
                tensor_shape: prepared.tensor.shape().to_vec(),
            },
        };
        Ok((prepared, PrepareDiagnostics { enhance, preprocess }))
    }

    /// Steps 3 to 5 on an already enhanced image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for unusable jitter factors
    /// and [`PipelineError::Tensor`] if the tensor cannot be assembled.
    pub fn prepare_enhanced<R: Rng + ?Sized>(
        &self,
        outcome: EnhanceOutcome,
        rng: &mut R,
    ) -> Result<PreparedInput, PipelineError> {
        let size = self.config.input_size;
        let resized = resample::resize_exact(&outcome.image, size, size, self.config.resize_filter);

        let jitter = self.config.jitter.sample(rng)?;
        let jittered = apply_jitter(&resized, jitter);
        let tensor = to_tensor(&jittered, &self.config.normalization, self.config.layout)?;
        tracing::debug!(
            size,
            brightness = jitter.brightness,
            contrast = jitter.contrast,
            "prepared classifier input"
        );

        Ok(PreparedInput {
            tensor,
            resized,
            enhanced: outcome.image,
            enhancement_warning: outcome.warning,
            jitter,
        })
    }
}
