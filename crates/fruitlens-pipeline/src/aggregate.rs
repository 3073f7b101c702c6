//! Ranking raw classifier guesses into user-facing results.
//!
//! [`ResultAggregator::aggregate`] filters out low-confidence guesses,
//! keeps one guess per category, formats labels for display, sorts by
//! confidence and caps the result count.
//!
//! Categories come from a pluggable [`Categorizer`]. The default,
//! [`FirstToken`], uses everything before the first underscore of the raw
//! label, so `apple_golden` and `apple_red` share the category `apple`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{AggregationConfig, ClassificationCandidate, RankedResult, ResultSet};

/// Maps a raw classifier label to its deduplication key.
pub trait Categorizer: Send + Sync {
    /// The category of `label`.
    fn category(&self, label: &str) -> String;
}

/// Category = label up to (not including) the first underscore, or the
/// whole label if it has none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirstToken;

impl Categorizer for FirstToken {
    fn category(&self, label: &str) -> String {
        label.split('_').next().unwrap_or(label).to_string()
    }
}

impl<F> Categorizer for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn category(&self, label: &str) -> String {
        self(label)
    }
}

/// Which candidate represents a category when several share it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// The first surviving candidate in classifier order wins.
    #[default]
    FirstSeen,
    /// The most confident candidate wins regardless of order.
    HighestConfidence,
}

/// Turns classifier candidates into a [`ResultSet`].
pub struct ResultAggregator {
    config: AggregationConfig,
    categorizer: Box<dyn Categorizer>,
}

impl fmt::Debug for ResultAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultAggregator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new(AggregationConfig::default())
    }
}

impl ResultAggregator {
    /// An aggregator using [`FirstToken`] categories.
    #[must_use]
    pub fn new(config: AggregationConfig) -> Self {
        Self::with_categorizer(config, FirstToken)
    }

    /// An aggregator with a custom categorizer.
    #[must_use]
    pub fn with_categorizer(config: AggregationConfig, categorizer: impl Categorizer + 'static) -> Self {
        Self {
            config,
            categorizer: Box::new(categorizer),
        }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Rank `candidates`.
    ///
    /// Candidates with confidence at or below `min_confidence` (or a
    /// non-finite confidence) are dropped. An empty result is a normal
    /// outcome meaning "no confident detection".
    #[must_use]
    pub fn aggregate(&self, candidates: &[ClassificationCandidate]) -> ResultSet {
        let min = self.config.min_confidence;
        let mut kept: Vec<RankedResult> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for candidate in candidates {
            if !candidate.confidence.is_finite() || candidate.confidence <= min {
                continue;
            }
            let category = self.categorizer.category(&candidate.label);
            match index.get(&category) {
                Some(&i) => {
                    if self.config.dedup == DedupPolicy::HighestConfidence
                        && candidate.confidence > kept[i].confidence
                    {
                        kept[i] = rank(candidate, category);
                    }
                }
                None => {
                    index.insert(category.clone(), kept.len());
                    kept.push(rank(candidate, category));
                }
            }
        }

        kept.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        kept.truncate(self.config.max_results);

        tracing::debug!(
            candidates = candidates.len(),
            results = kept.len(),
            top = kept.first().map(|r| r.display_label.as_str()),
            "aggregated classifier candidates"
        );
        ResultSet::from_ranked(kept)
    }
}

/// Rank candidates with the default categorizer.
#[must_use]
pub fn aggregate(candidates: &[ClassificationCandidate], config: &AggregationConfig) -> ResultSet {
    ResultAggregator::new(config.clone()).aggregate(candidates)
}

fn rank(candidate: &ClassificationCandidate, category: String) -> RankedResult {
    RankedResult {
        display_label: display_label(&candidate.label),
        confidence: candidate.confidence,
        category,
    }
}

/// Format a raw label for display: underscores become spaces and every
/// word is title-cased (`granny_smith` becomes `Granny Smith`).
///
/// A letter is upper-cased when it follows a non-letter and lower-cased
/// otherwise, so `jack-o'-lantern` becomes `Jack-O'-Lantern`.
#[must_use]
pub fn display_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut after_letter = false;
    for ch in label.chars() {
        let ch = if ch == '_' { ' ' } else { ch };
        if ch.is_alphabetic() {
            if after_letter {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            after_letter = true;
        } else {
            out.push(ch);
            after_letter = false;
        }
    }
    out
}
