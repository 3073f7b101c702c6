//! Shared types for the fruitlens pipeline.

use serde::{Deserialize, Serialize};

use crate::aggregate::DedupPolicy;
use crate::enhance::EnhanceError;
use crate::preprocess::{AppliedJitter, InputNormalization, Jitter, TensorLayout};
use crate::resample::ResampleFilter;

/// Re-export `RgbImage` so downstream crates can hold pipeline images
/// without depending on `image` directly.
pub use image::RgbImage;

/// Re-export `GrayImage`, used for single color planes.
pub use image::GrayImage;

/// Classifier input tensor with a leading batch dimension of 1.
///
/// The remaining axes follow [`TensorLayout`]: `[1, H, W, 3]` for
/// [`TensorLayout::Nhwc`] or `[1, 3, H, W]` for [`TensorLayout::Nchw`].
pub type InputTensor = ndarray::Array4<f32>;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an RGB image.
    #[must_use]
    pub fn of(image: &RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }
}

/// Fixed numeric parameters of the enhancement chain.
///
/// These are constants of the product, not user configuration: they are
/// deliberately absent from [`PipelineConfig`] and carry no serde
/// implementation. [`EnhancementParameters::STANDARD`] is the only value
/// used outside tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnhancementParameters {
    /// Images whose longer side exceeds this are scaled down first.
    pub max_dimension: u32,
    /// CLAHE clip limit, relative to a uniform histogram.
    pub clahe_clip_limit: f32,
    /// CLAHE tile grid size (tiles per axis).
    pub clahe_tile_grid: u32,
    /// Sharpening kernel center weight, before scaling.
    pub sharpen_center: f32,
    /// Sharpening kernel weight of each of the 8 neighbors, before scaling.
    pub sharpen_neighbor: f32,
    /// Factor applied to the whole sharpening kernel.
    pub sharpen_scale: f32,
    /// Non-local-means filter strength for the lightness plane.
    pub denoise_luminance_strength: f32,
    /// Non-local-means filter strength for the two chroma planes.
    pub denoise_color_strength: f32,
    /// Side of the square patch compared by non-local means (odd).
    pub denoise_template_window: u32,
    /// Side of the square area searched for similar patches (odd).
    pub denoise_search_window: u32,
}

impl EnhancementParameters {
    /// The parameter set used by the product.
    pub const STANDARD: Self = Self {
        max_dimension: 1024,
        clahe_clip_limit: 2.0,
        clahe_tile_grid: 8,
        sharpen_center: 5.0,
        sharpen_neighbor: -0.5,
        sharpen_scale: 0.5,
        denoise_luminance_strength: 3.0,
        denoise_color_strength: 3.0,
        denoise_template_window: 7,
        denoise_search_window: 7,
    };

    /// The scaled 3x3 sharpening kernel in row-major order.
    #[must_use]
    pub fn sharpen_kernel(&self) -> [f32; 9] {
        let n = self.sharpen_neighbor * self.sharpen_scale;
        let c = self.sharpen_center * self.sharpen_scale;
        [n, n, n, n, c, n, n, n, n]
    }
}

impl Default for EnhancementParameters {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// One raw guess from the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationCandidate {
    /// Raw classifier label, e.g. `granny_smith`.
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

impl ClassificationCandidate {
    /// Create a new candidate.
    #[must_use]
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// A user-facing, deduplicated classification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    /// Human-formatted label, e.g. `Granny Smith`.
    pub display_label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Coarse grouping key used for deduplication.
    pub category: String,
}

/// Ranked results of one classification request.
///
/// Ordered by descending confidence, one entry per category, at most
/// [`AggregationConfig::max_results`] entries. An empty set means "no
/// confident detection" and is not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSet(Vec<RankedResult>);

impl ResultSet {
    /// A result set with no entries.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    pub(crate) const fn from_ranked(results: Vec<RankedResult>) -> Self {
        Self(results)
    }

    /// Returns `true` if nothing was detected with enough confidence.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of results.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// The most confident result, if any.
    #[must_use]
    pub fn top(&self) -> Option<&RankedResult> {
        self.0.first()
    }

    /// Iterate results from most to least confident.
    pub fn iter(&self) -> std::slice::Iter<'_, RankedResult> {
        self.0.iter()
    }

    /// Returns a slice of all results.
    #[must_use]
    pub fn as_slice(&self) -> &[RankedResult] {
        &self.0
    }

    /// Consumes the set and returns the underlying vector.
    #[must_use]
    pub fn into_vec(self) -> Vec<RankedResult> {
        self.0
    }
}

impl IntoIterator for ResultSet {
    type Item = RankedResult;
    type IntoIter = std::vec::IntoIter<RankedResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a RankedResult;
    type IntoIter = std::slice::Iter<'a, RankedResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Configuration of the classifier input preparation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Side of the square classifier input, in pixels.
    pub input_size: u32,
    /// Filter used to resize the enhanced image to `input_size`.
    pub resize_filter: ResampleFilter,
    /// Brightness/contrast augmentation applied after resizing.
    pub jitter: Jitter,
    /// Per-channel value mapping expected by the classifier.
    pub normalization: InputNormalization,
    /// Axis order of the produced tensor.
    pub layout: TensorLayout,
}

impl PreprocessConfig {
    /// Default classifier input side (EfficientNetV2-B3).
    pub const DEFAULT_INPUT_SIZE: u32 = 300;
    /// Default resize filter (bicubic).
    pub const DEFAULT_RESIZE_FILTER: ResampleFilter = ResampleFilter::CatmullRom;

    /// Check the input size, jitter and normalization.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.input_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "preprocess.input_size must be greater than zero".to_string(),
            ));
        }
        self.jitter.validate()?;
        self.normalization.validate()
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            input_size: Self::DEFAULT_INPUT_SIZE,
            resize_filter: Self::DEFAULT_RESIZE_FILTER,
            jitter: Jitter::DEFAULT,
            normalization: InputNormalization::default(),
            layout: TensorLayout::default(),
        }
    }
}

/// Configuration of the result ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Candidates at or below this confidence are discarded.
    pub min_confidence: f32,
    /// Maximum number of results returned.
    pub max_results: usize,
    /// Which candidate represents a category when several share it.
    pub dedup: DedupPolicy,
}

impl AggregationConfig {
    /// Default confidence threshold (exclusive).
    pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.10;
    /// Default result count cap.
    pub const DEFAULT_MAX_RESULTS: usize = 3;
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            min_confidence: Self::DEFAULT_MIN_CONFIDENCE,
            max_results: Self::DEFAULT_MAX_RESULTS,
            dedup: DedupPolicy::default(),
        }
    }
}

/// Configuration for the recognition pipeline.
///
/// Enhancement parameters are fixed (see [`EnhancementParameters`]) and
/// are not part of this struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Classifier input preparation.
    pub preprocess: PreprocessConfig,
    /// Result ranking.
    pub aggregation: AggregationConfig,
}

impl PipelineConfig {
    /// Check the configuration for values the pipeline cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.preprocess.validate()?;

        let min = self.aggregation.min_confidence;
        if !(0.0..=1.0).contains(&min) {
            return Err(PipelineError::InvalidConfig(format!(
                "aggregation.min_confidence must be within [0, 1], got {min}"
            )));
        }
        Ok(())
    }
}

/// Everything one recognition request hands to the presentation layer.
#[derive(Debug, Clone)]
pub struct Recognition {
    /// Enhanced image resized to the classifier input size (pre-jitter).
    pub resized: RgbImage,
    /// Enhanced image at working resolution.
    pub enhanced: RgbImage,
    /// Ranked, deduplicated classification results.
    pub results: ResultSet,
    /// Set when enhancement failed and `enhanced` is the unmodified input.
    pub enhancement_warning: Option<EnhanceError>,
    /// Jitter factors applied to the classifier input.
    pub jitter: AppliedJitter,
}

/// Errors that stop a recognition request.
///
/// Enhancement and classifier failures are recovered inside the pipeline
/// and never surface as a `PipelineError`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The input is a recognized image format other than JPEG or PNG.
    #[error("unsupported image format: {0} (expected JPEG or PNG)")]
    UnsupportedFormat(String),

    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The image has zero width or height.
    #[error("image has no pixels")]
    EmptyImage,

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The classifier input tensor could not be assembled.
    #[error("failed to build classifier input tensor: {0}")]
    Tensor(#[from] ndarray::ShapeError),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn standard_parameters_match_product_constants() {
        let p = EnhancementParameters::STANDARD;
        assert_eq!(p.max_dimension, 1024);
        assert!((p.clahe_clip_limit - 2.0).abs() < f32::EPSILON);
        assert_eq!(p.clahe_tile_grid, 8);
        assert!((p.denoise_luminance_strength - 3.0).abs() < f32::EPSILON);
        assert!((p.denoise_color_strength - 3.0).abs() < f32::EPSILON);
        assert_eq!(p.denoise_template_window, 7);
        assert_eq!(p.denoise_search_window, 7);
    }

    #[test]
    fn sharpen_kernel_is_scaled() {
        let k = EnhancementParameters::STANDARD.sharpen_kernel();
        assert!((k[4] - 2.5).abs() < f32::EPSILON);
        for (i, w) in k.iter().enumerate() {
            if i != 4 {
                assert!((w + 0.25).abs() < f32::EPSILON, "neighbor {i} = {w}");
            }
        }
        // Net gain of the kernel: 2.5 - 8 * 0.25.
        let sum: f32 = k.iter().sum();
        assert!((sum - 0.5).abs() < 1e-6);
    }

    #[test]
    fn config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.preprocess.input_size, 300);
        assert_eq!(config.preprocess.jitter, Jitter::DEFAULT);
        assert!((config.aggregation.min_confidence - 0.10).abs() < f32::EPSILON);
        assert_eq!(config.aggregation.max_results, 3);
        assert_eq!(config.aggregation.dedup, DedupPolicy::FirstSeen);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_input_size_is_invalid() {
        let mut config = PipelineConfig::default();
        config.preprocess.input_size = 0;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn out_of_range_threshold_is_invalid() {
        let mut config = PipelineConfig::default();
        config.aggregation.min_confidence = 1.5;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(ref s)) if s.contains("min_confidence")
        ));
    }

    #[test]
    fn pipeline_config_serde_round_trip() {
        let config = PipelineConfig {
            preprocess: PreprocessConfig {
                jitter: Jitter::NONE,
                normalization: InputNormalization::Symmetric,
                layout: TensorLayout::Nchw,
                ..PreprocessConfig::default()
            },
            aggregation: AggregationConfig {
                min_confidence: 0.2,
                max_results: 5,
                dedup: DedupPolicy::HighestConfidence,
            },
        };
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn result_set_serializes_as_array() {
        let set = ResultSet::from_ranked(vec![RankedResult {
            display_label: "Banana".to_string(),
            confidence: 0.5,
            category: "banana".to_string(),
        }]);
        let json = serde_json::to_value(&set).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["display_label"], "Banana");
        assert_eq!(json[0]["category"], "banana");
    }

    #[test]
    fn result_set_accessors() {
        let set = ResultSet::empty();
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
        assert!(set.top().is_none());
        assert!(set.iter().next().is_none());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            PipelineError::EmptyInput.to_string(),
            "input image data is empty"
        );
        assert_eq!(
            PipelineError::UnsupportedFormat("Bmp".to_string()).to_string(),
            "unsupported image format: Bmp (expected JPEG or PNG)"
        );
        assert_eq!(PipelineError::EmptyImage.to_string(), "image has no pixels");
    }
}
