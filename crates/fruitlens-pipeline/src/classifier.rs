//! The classifier boundary.
//!
//! The pipeline does not run a model itself. Anything that maps an
//! [`InputTensor`] to labelled confidences can be plugged in through the
//! [`Classifier`] trait. The model is loaded once by the host, wrapped in
//! a [`SharedClassifier`], and shared read-only across requests.
//!
//! Models that emit a raw score vector can be adapted with
//! [`ScoringClassifier`], which pairs the scores with a [`LabelSet`] and
//! keeps the top-K via [`decode_predictions`].

use std::fmt;
use std::sync::Arc;

use crate::types::{ClassificationCandidate, InputTensor};

/// Number of guesses kept from a raw score vector by default.
pub const DEFAULT_TOP_K: usize = 10;

/// Errors raised at the classifier boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifierError {
    /// The model failed to run.
    #[error("inference failed: {0}")]
    Inference(String),

    /// The score vector does not line up with the label set.
    #[error("model produced {scores} scores for {labels} labels")]
    LabelCountMismatch {
        /// Number of labels.
        labels: usize,
        /// Number of scores.
        scores: usize,
    },

    /// The label list is unusable.
    #[error("invalid label set: {0}")]
    InvalidLabels(String),
}

/// A pretrained image classifier.
///
/// Implementations must be safe for concurrent read-only use.
pub trait Classifier: Send + Sync {
    /// Classify one batched input tensor.
    ///
    /// Returns guesses sorted by descending confidence, at most a bounded
    /// top-K of them.
    ///
    /// # Errors
    ///
    /// Returns a [`ClassifierError`] if inference fails.
    fn infer(&self, input: &InputTensor) -> Result<Vec<ClassificationCandidate>, ClassifierError>;
}

/// A classifier handle shared across requests.
pub type SharedClassifier = Arc<dyn Classifier>;

/// Class names, indexed like the model's score vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    /// Build a label set from class names.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::InvalidLabels`] if `labels` is empty or
    /// contains a blank name.
    pub fn new(labels: Vec<String>) -> Result<Self, ClassifierError> {
        if labels.is_empty() {
            return Err(ClassifierError::InvalidLabels("no labels".to_string()));
        }
        if let Some(i) = labels.iter().position(|l| l.trim().is_empty()) {
            return Err(ClassifierError::InvalidLabels(format!("label {i} is blank")));
        }
        Ok(Self(labels))
    }

    /// Parse one label per line. Surrounding whitespace is trimmed and
    /// trailing blank lines are ignored.
    ///
    /// # Errors
    ///
    /// See [`LabelSet::new`].
    pub fn from_lines(text: &str) -> Result<Self, ClassifierError> {
        let mut labels: Vec<String> = text.lines().map(|l| l.trim().to_string()).collect();
        while labels.last().is_some_and(String::is_empty) {
            labels.pop();
        }
        Self::new(labels)
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false` for a constructed set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Name of class `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }
}

/// Pair a score vector with its labels and keep the `top_k` best,
/// most confident first.
///
/// Non-finite scores sort last. Ties keep label order.
///
/// # Errors
///
/// Returns [`ClassifierError::LabelCountMismatch`] if `scores` and
/// `labels` differ in length.
pub fn decode_predictions(
    scores: &[f32],
    labels: &LabelSet,
    top_k: usize,
) -> Result<Vec<ClassificationCandidate>, ClassifierError> {
    if scores.len() != labels.len() {
        return Err(ClassifierError::LabelCountMismatch {
            labels: labels.len(),
            scores: scores.len(),
        });
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        let key = |i: usize| if scores[i].is_finite() { scores[i] } else { f32::NEG_INFINITY };
        key(b).total_cmp(&key(a))
    });
    Ok(order
        .into_iter()
        .take(top_k)
        .map(|i| ClassificationCandidate::new(labels.0[i].clone(), scores[i]))
        .collect())
}

/// Adapts a score-vector model to [`Classifier`].
pub struct ScoringClassifier<F> {
    score: F,
    labels: LabelSet,
    top_k: usize,
}

impl<F> fmt::Debug for ScoringClassifier<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoringClassifier")
            .field("labels", &self.labels.len())
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl<F> ScoringClassifier<F>
where
    F: Fn(&InputTensor) -> Result<Vec<f32>, ClassifierError> + Send + Sync,
{
    /// Wrap `score`, keeping [`DEFAULT_TOP_K`] guesses.
    pub fn new(score: F, labels: LabelSet) -> Self {
        Self {
            score,
            labels,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Change how many guesses are kept.
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

impl<F> Classifier for ScoringClassifier<F>
where
    F: Fn(&InputTensor) -> Result<Vec<f32>, ClassifierError> + Send + Sync,
{
    fn infer(&self, input: &InputTensor) -> Result<Vec<ClassificationCandidate>, ClassifierError> {
        let scores = (self.score)(input)?;
        decode_predictions(&scores, &self.labels, self.top_k)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fruit() -> LabelSet {
        LabelSet::from_lines("banana\ngranny_smith\norange\nlemon\n\n").unwrap()
    }

    #[test]
    fn label_set_parsing() {
        let labels = fruit();
        assert_eq!(labels.len(), 4);
        assert_eq!(labels.get(1), Some("granny_smith"));
        assert!(LabelSet::from_lines("\n\n").is_err());
        assert!(LabelSet::from_lines("a\n\nb").is_err());
    }

    #[test]
    fn decode_sorts_and_truncates() {
        let out = decode_predictions(&[0.1, 0.6, 0.05, 0.25], &fruit(), 2).unwrap();
        assert_eq!(
            out,
            vec![
                ClassificationCandidate::new("granny_smith", 0.6),
                ClassificationCandidate::new("lemon", 0.25),
            ]
        );
    }

    #[test]
    fn decode_puts_nan_last() {
        let out = decode_predictions(&[f32::NAN, 0.2, 0.3, 0.1], &fruit(), 4).unwrap();
        assert_eq!(out[0].label, "orange");
        assert_eq!(out[3].label, "banana");
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        assert_eq!(
            decode_predictions(&[0.5], &fruit(), 3),
            Err(ClassifierError::LabelCountMismatch {
                labels: 4,
                scores: 1
            })
        );
    }

    #[test]
    fn scoring_classifier_uses_top_k() {
        let model = ScoringClassifier::new(|_: &InputTensor| Ok(vec![0.4, 0.3, 0.2, 0.1]), fruit())
            .with_top_k(3);
        let shared: SharedClassifier = Arc::new(model);
        let out = shared.infer(&InputTensor::zeros((1, 2, 2, 3))).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].label, "banana");
    }

    #[test]
    fn scoring_classifier_propagates_errors() {
        let model = ScoringClassifier::new(
            |_: &InputTensor| Err(ClassifierError::Inference("model not loaded".to_string())),
            fruit(),
        );
        assert!(matches!(
            model.infer(&InputTensor::zeros((1, 1, 1, 3))),
            Err(ClassifierError::Inference(_))
        ));
    }
}
