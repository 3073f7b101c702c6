//! Deterministic image enhancement ahead of classification.
//!
//! The standard chain runs five steps in a fixed order:
//!
//! 1. **Downscale guard**: shrink so the longer side is at most 1024 px.
//! 2. **Local contrast**: CLAHE on the Lab lightness plane.
//! 3. **Sharpen**: 3x3 kernel, replicate border.
//! 4. **Color balance**: histogram equalization of the YUV luma plane.
//! 5. **Denoise**: color non-local means.
//!
//! Enhancement never fails the request. If any step returns an error the
//! enhancer logs a warning and hands back the unmodified input together
//! with the error, so the caller can still classify the original.

use std::fmt;

use crate::diagnostics::{Clock, NullClock, StageDiagnostics, StageMetrics};
use crate::resample::{self, ResampleFilter};
use crate::types::{EnhancementParameters, RgbImage};
use crate::{clahe, color, denoise, equalize, sharpen};

/// Errors raised inside the enhancement chain.
///
/// These never abort a recognition request; they are reported through
/// [`EnhanceOutcome::warning`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnhanceError {
    /// The image has zero width or height.
    #[error("cannot enhance an image with no pixels")]
    EmptyImage,

    /// Color planes that should match in size do not.
    #[error("color plane size mismatch: expected {expected:?}, got {actual:?}")]
    PlaneMismatch {
        /// Size of the first plane.
        expected: (u32, u32),
        /// Size of the offending plane.
        actual: (u32, u32),
    },

    /// A step rejected its input or parameters.
    #[error("enhancement step `{step}` failed: {reason}")]
    Step {
        /// Name of the failing step.
        step: &'static str,
        /// What went wrong.
        reason: String,
    },
}

/// One step of the enhancement chain.
///
/// Implementations must be deterministic: the same image and parameters
/// always produce the same output.
pub trait Transform: fmt::Debug + Send + Sync {
    /// Short identifier used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Apply the step.
    ///
    /// # Errors
    ///
    /// Returns an [`EnhanceError`] if the step cannot process the image.
    fn apply(
        &self,
        image: &RgbImage,
        params: &EnhancementParameters,
    ) -> Result<RgbImage, EnhanceError>;
}

/// The built-in enhancement steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhanceStep {
    /// Bound the working resolution.
    DownscaleGuard,
    /// CLAHE on Lab lightness.
    LocalContrast,
    /// 3x3 sharpening convolution.
    Sharpen,
    /// Histogram equalization of YUV luma.
    ColorBalance,
    /// Color non-local-means denoising.
    Denoise,
}

impl EnhanceStep {
    /// The standard chain, in order.
    pub const STANDARD_CHAIN: [Self; 5] = [
        Self::DownscaleGuard,
        Self::LocalContrast,
        Self::Sharpen,
        Self::ColorBalance,
        Self::Denoise,
    ];
}

impl fmt::Display for EnhanceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Transform for EnhanceStep {
    fn name(&self) -> &'static str {
        match self {
            Self::DownscaleGuard => "downscale_guard",
            Self::LocalContrast => "local_contrast",
            Self::Sharpen => "sharpen",
            Self::ColorBalance => "color_balance",
            Self::Denoise => "denoise",
        }
    }

    fn apply(
        &self,
        image: &RgbImage,
        params: &EnhancementParameters,
    ) -> Result<RgbImage, EnhanceError> {
        match self {
            Self::DownscaleGuard => {
                let (out, _) =
                    resample::downscale_to_fit(image, params.max_dimension, ResampleFilter::Triangle);
                Ok(out)
            }
            Self::LocalContrast => {
                let [l, a, b] = color::rgb_to_lab(image);
                let l = clahe::clahe(&l, params.clahe_clip_limit, params.clahe_tile_grid);
                color::lab_to_rgb(&[l, a, b])
            }
            Self::Sharpen => Ok(sharpen::filter3x3(image, &params.sharpen_kernel())),
            Self::ColorBalance => {
                let [y, u, v] = color::rgb_to_yuv(image);
                let y = equalize::equalize_histogram(&y);
                color::yuv_to_rgb(&[y, u, v])
            }
            Self::Denoise => {
                for (what, size) in [
                    ("template", params.denoise_template_window),
                    ("search", params.denoise_search_window),
                ] {
                    if size % 2 == 0 {
                        return Err(EnhanceError::Step {
                            step: self.name(),
                            reason: format!("{what} window must be odd, got {size}"),
                        });
                    }
                }
                denoise::denoise_colored(
                    image,
                    params.denoise_luminance_strength,
                    params.denoise_color_strength,
                    params.denoise_template_window,
                    params.denoise_search_window,
                )
            }
        }
    }
}

/// Result of [`ImageEnhancer::enhance`].
#[derive(Debug, Clone)]
pub struct EnhanceOutcome {
    /// The enhanced image, or an unmodified copy of the input when
    /// `warning` is set.
    pub image: RgbImage,
    /// The error that made enhancement fall back to the input.
    pub warning: Option<EnhanceError>,
}

impl EnhanceOutcome {
    /// Returns `true` if enhancement fell back to the original image.
    #[must_use]
    pub const fn fell_back(&self) -> bool {
        self.warning.is_some()
    }
}

/// Runs the enhancement chain.
#[derive(Debug)]
pub struct ImageEnhancer {
    params: EnhancementParameters,
    steps: Vec<Box<dyn Transform>>,
}

impl Default for ImageEnhancer {
    fn default() -> Self {
        Self::standard()
    }
}

impl ImageEnhancer {
    /// The product enhancer: standard parameters and chain.
    #[must_use]
    pub fn standard() -> Self {
        Self::with_steps(
            EnhancementParameters::STANDARD,
            EnhanceStep::STANDARD_CHAIN
                .into_iter()
                .map(|step| Box::new(step) as Box<dyn Transform>)
                .collect(),
        )
    }

    /// An enhancer with a custom chain, mainly for tests and experiments.
    #[must_use]
    pub fn with_steps(params: EnhancementParameters, steps: Vec<Box<dyn Transform>>) -> Self {
        Self { params, steps }
    }

    /// The parameters passed to every step.
    #[must_use]
    pub const fn params(&self) -> &EnhancementParameters {
        &self.params
    }

    /// Names of the configured steps, in order.
    pub fn step_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps.iter().map(|s| s.name())
    }

    /// Enhance an image.
    ///
    /// Never fails: on error the input is returned unchanged and the
    /// error is reported in [`EnhanceOutcome::warning`].
    #[must_use]
    pub fn enhance(&self, image: &RgbImage) -> EnhanceOutcome {
        self.enhance_with_clock(image, &NullClock).0
    }

    /// Enhance an image and time each step with `clock`.
    ///
    /// The returned diagnostics cover the steps that ran, including the
    /// one that failed, if any.
    pub fn enhance_with_clock<C: Clock>(
        &self,
        image: &RgbImage,
        clock: &C,
    ) -> (EnhanceOutcome, Vec<StageDiagnostics>) {
        let mut diagnostics = Vec::with_capacity(self.steps.len());

        if image.width() == 0 || image.height() == 0 {
            return (fallback(image, EnhanceError::EmptyImage, "input"), diagnostics);
        }

        let mut current: Option<RgbImage> = None;
        for step in &self.steps {
            let input = current.as_ref().unwrap_or(image);
            let start = clock.now();
            let result = step.apply(input, &self.params);
            let duration = clock.elapsed(&start);

            let (width, height) = result
                .as_ref()
                .map_or_else(|_| input.dimensions(), RgbImage::dimensions);
            diagnostics.push(StageDiagnostics {
                duration,
                metrics: StageMetrics::Enhance {
                    step: step.name().to_string(),
                    width,
                    height,
                },
            });

            match result {
                Ok(out) => {
                    tracing::debug!(step = step.name(), width, height, "enhancement step done");
                    current = Some(out);
                }
                Err(e) => return (fallback(image, e, step.name()), diagnostics),
            }
        }

        let image = current.unwrap_or_else(|| image.clone());
        (
            EnhanceOutcome {
                image,
                warning: None,
            },
            diagnostics,
        )
    }
}

fn fallback(original: &RgbImage, error: EnhanceError, step: &'static str) -> EnhanceOutcome {
    tracing::warn!(step, error = %error, "image enhancement failed, using original image");
    EnhanceOutcome {
        image: original.clone(),
        warning: Some(error),
    }
}
