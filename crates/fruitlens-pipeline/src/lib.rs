//! fruitlens-pipeline: fruit photo recognition core (sans-IO).
//!
//! Turns an uploaded photo into ranked fruit guesses through:
//! decode -> enhance -> preprocess -> classify -> aggregate.
//!
//! The classifier itself is external. The host loads a model once,
//! wraps it in a [`SharedClassifier`] and hands it to a [`Recognizer`],
//! which then serves any number of requests.
//!
//! This crate has **no I/O dependencies**. It operates on in-memory byte
//! slices and returns plain data (two images and a [`ResultSet`]) for a
//! presentation layer to render.

pub mod aggregate;
mod border;
pub mod clahe;
pub mod classifier;
pub mod color;
pub mod decode;
pub mod denoise;
pub mod diagnostics;
pub mod enhance;
pub mod equalize;
pub mod preprocess;
pub mod recognizer;
pub mod resample;
pub mod sharpen;
pub mod types;

pub use aggregate::{Categorizer, DedupPolicy, FirstToken, ResultAggregator};
pub use classifier::{
    Classifier, ClassifierError, LabelSet, ScoringClassifier, SharedClassifier, decode_predictions,
};
pub use enhance::{EnhanceError, EnhanceOutcome, EnhanceStep, ImageEnhancer, Transform};
pub use preprocess::{
    AppliedJitter, InputNormalization, Jitter, PreparedInput, Preprocessor, TensorLayout,
};
pub use recognizer::Recognizer;
pub use resample::ResampleFilter;
pub use types::{
    AggregationConfig, ClassificationCandidate, Dimensions, EnhancementParameters, InputTensor,
    PipelineConfig, PipelineError, PreprocessConfig, RankedResult, Recognition, ResultSet,
};

/// Run one recognition request end to end.
///
/// Convenience for one-off use. Services should build a [`Recognizer`]
/// once and reuse it.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an invalid `config`,
/// [`PipelineError::EmptyInput`] if `image_bytes` is empty, and
/// [`PipelineError::UnsupportedFormat`] or [`PipelineError::ImageDecode`]
/// if the bytes are not a decodable JPEG or PNG.
pub fn recognize(
    image_bytes: &[u8],
    classifier: SharedClassifier,
    config: &PipelineConfig,
) -> Result<Recognition, PipelineError> {
    Recognizer::new(classifier, config.clone())?.recognize(image_bytes)
}
