//! The recognition service.
//!
//! A [`Recognizer`] is built once at startup around an already loaded
//! classifier and then serves requests: raw image bytes in, presentation
//! images and ranked results out. It holds no per-request state, so one
//! instance can be shared by reference.

use std::fmt;

use rand::Rng;

use crate::aggregate::{Categorizer, ResultAggregator};
use crate::classifier::SharedClassifier;
use crate::diagnostics::{self, NullClock};
use crate::preprocess::{PreparedInput, Preprocessor};
use crate::types::{ClassificationCandidate, PipelineConfig, PipelineError, Recognition, ResultSet};

/// Decodes, enhances, classifies and ranks images.
pub struct Recognizer {
    classifier: SharedClassifier,
    preprocessor: Preprocessor,
    aggregator: ResultAggregator,
}

impl fmt::Debug for Recognizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recognizer")
            .field("preprocessor", &self.preprocessor)
            .field("aggregator", &self.aggregator)
            .finish_non_exhaustive()
    }
}

impl Recognizer {
    /// Build a recognizer with the standard enhancer and categorizer.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `config` fails
    /// [`PipelineConfig::validate`].
    pub fn new(classifier: SharedClassifier, config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self::from_parts(
            classifier,
            Preprocessor::new(config.preprocess)?,
            ResultAggregator::new(config.aggregation),
        ))
    }

    /// Assemble a recognizer from prebuilt parts.
    #[must_use]
    pub const fn from_parts(
        classifier: SharedClassifier,
        preprocessor: Preprocessor,
        aggregator: ResultAggregator,
    ) -> Self {
        Self {
            classifier,
            preprocessor,
            aggregator,
        }
    }

    /// Replace the categorizer used for deduplication.
    #[must_use]
    pub fn with_categorizer(self, categorizer: impl Categorizer + 'static) -> Self {
        let config = self.aggregator.config().clone();
        Self {
            aggregator: ResultAggregator::with_categorizer(config, categorizer),
            ..self
        }
    }

    /// The input preparation stage.
    #[must_use]
    pub const fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// The ranking stage.
    #[must_use]
    pub const fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    /// Decode and prepare an image without classifying it.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] if the bytes are not a decodable JPEG
    /// or PNG, or the tensor cannot be built.
    pub fn prepare(&self, bytes: &[u8]) -> Result<PreparedInput, PipelineError> {
        self.prepare_with_rng(bytes, &mut rand::thread_rng())
    }

    /// [`Recognizer::prepare`] with an explicit jitter RNG.
    ///
    /// # Errors
    ///
    /// See [`Recognizer::prepare`].
    pub fn prepare_with_rng<R: Rng + ?Sized>(
        &self,
        bytes: &[u8],
        rng: &mut R,
    ) -> Result<PreparedInput, PipelineError> {
        diagnostics::prepare_staged(self, bytes, &NullClock, rng).map(|(prepared, _)| prepared)
    }

    /// Run the classifier on a prepared input.
    ///
    /// A classifier error is logged and treated as "no guesses".
    #[must_use]
    pub fn infer(&self, prepared: &PreparedInput) -> Vec<ClassificationCandidate> {
        match self.classifier.infer(&prepared.tensor) {
            Ok(candidates) => {
                tracing::debug!(candidates = candidates.len(), "classifier returned");
                candidates
            }
            Err(e) => {
                tracing::warn!(error = %e, "classification failed, reporting no detection");
                Vec::new()
            }
        }
    }

    /// Classify a prepared input and rank the guesses.
    #[must_use]
    pub fn classify(&self, prepared: &PreparedInput) -> ResultSet {
        self.aggregator.aggregate(&self.infer(prepared))
    }

    /// Full request: decode, prepare, classify, rank.
    ///
    /// # Errors
    ///
    /// See [`Recognizer::prepare`].
    pub fn recognize(&self, bytes: &[u8]) -> Result<Recognition, PipelineError> {
        self.recognize_with_rng(bytes, &mut rand::thread_rng())
    }

    /// [`Recognizer::recognize`] with an explicit jitter RNG.
    ///
    /// # Errors
    ///
    /// See [`Recognizer::prepare`].
    pub fn recognize_with_rng<R: Rng + ?Sized>(
        &self,
        bytes: &[u8],
        rng: &mut R,
    ) -> Result<Recognition, PipelineError> {
        diagnostics::recognize_with_diagnostics(self, bytes, &NullClock, rng)
            .map(|(recognition, _)| recognition)
    }
}

/// Combine a prepared input with its results for the presentation layer.
pub(crate) fn into_recognition(prepared: PreparedInput, results: ResultSet) -> Recognition {
    Recognition {
        resized: prepared.resized,
        enhanced: prepared.enhanced,
        results,
        enhancement_warning: prepared.enhancement_warning,
        jitter: prepared.jitter,
    }
}
