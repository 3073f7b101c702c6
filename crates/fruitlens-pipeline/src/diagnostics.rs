//! Recognition diagnostics: timing and metrics for each stage.
//!
//! [`recognize_with_diagnostics`] is the staged form of
//! [`Recognizer::recognize`](crate::Recognizer::recognize): the recognizer
//! calls it with a [`NullClock`] and drops the diagnostics. Time is read
//! through the [`Clock`] trait so the library does not pick a time source;
//! the bench binary plugs in `std::time::Instant`.
//!
//! Durations are serialized as fractional seconds (`f64`) because
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::decode;
use crate::preprocess::PreparedInput;
use crate::recognizer::{Recognizer, into_recognition};
use crate::types::{Dimensions, PipelineError, Recognition};

/// A monotonic time source.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// A clock that never advances. Every duration is zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullClock;

impl Clock for NullClock {
    type Instant = ();

    fn now(&self) {}

    fn elapsed(&self, _since: &()) -> Duration {
        Duration::ZERO
    }
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| serde::de::Error::custom("duration must be finite and non-negative seconds"))
    }
}

/// Diagnostics collected from a single recognition request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Decoding the input bytes.
    pub decode: StageDiagnostics,
    /// One entry per enhancement step that ran.
    pub enhance: Vec<StageDiagnostics>,
    /// Why enhancement fell back to the original image, if it did.
    pub enhancement_warning: Option<String>,
    /// Resize, jitter and tensor conversion.
    pub preprocess: StageDiagnostics,
    /// The classifier call.
    pub inference: StageDiagnostics,
    /// Ranking.
    pub aggregation: StageDiagnostics,
    /// Total wall-clock duration (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary across stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Timings from [`Preprocessor::prepare_with_clock`](crate::Preprocessor::prepare_with_clock).
#[derive(Debug, Clone)]
pub struct PrepareDiagnostics {
    /// One entry per enhancement step that ran.
    pub enhance: Vec<StageDiagnostics>,
    /// Resize, jitter and tensor conversion.
    pub preprocess: StageDiagnostics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Image decoding.
    Decode {
        /// Size of the input bytes.
        input_bytes: usize,
        /// Decoded width.
        width: u32,
        /// Decoded height.
        height: u32,
    },
    /// One enhancement step.
    Enhance {
        /// Step name.
        step: String,
        /// Output width.
        width: u32,
        /// Output height.
        height: u32,
    },
    /// Classifier input preparation.
    Preprocess {
        /// Square input side.
        input_size: u32,
        /// Applied brightness factor.
        brightness: f32,
        /// Applied contrast factor.
        contrast: f32,
        /// Tensor shape.
        tensor_shape: Vec<usize>,
    },
    /// Classifier call.
    Inference {
        /// Number of guesses returned.
        candidate_count: usize,
    },
    /// Ranking.
    Aggregation {
        /// Guesses in.
        candidates_in: usize,
        /// Results out.
        results_out: usize,
    },
}

/// High-level summary of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Decoded image size.
    pub source: Dimensions,
    /// Size after enhancement.
    pub working: Dimensions,
    /// Number of ranked results.
    pub result_count: usize,
    /// Best result label, if any.
    pub top_label: Option<String>,
    /// Best result confidence, if any.
    pub top_confidence: Option<f32>,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Recognition Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} -> working {}x{}",
            self.summary.source.width,
            self.summary.source.height,
            self.summary.working.width,
            self.summary.working.height,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        if let Some(ref warning) = self.enhancement_warning {
            lines.push(format!("Enhancement fell back to original: {warning}"));
        }
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        match (&self.summary.top_label, self.summary.top_confidence) {
            (Some(label), Some(confidence)) => lines.push(format!(
                "Results: {}  |  Top: {label} ({:.1}%)",
                self.summary.result_count,
                confidence * 100.0,
            )),
            _ => lines.push("Results: none (no confident detection)".to_string()),
        }

        lines.join("\n")
    }

    /// Every stage with a display name, in execution order.
    #[must_use]
    pub fn stages(&self) -> Vec<(String, &StageDiagnostics)> {
        let mut stages = vec![("Decode".to_string(), &self.decode)];
        for diag in &self.enhance {
            let name = match &diag.metrics {
                StageMetrics::Enhance { step, .. } => format!("Enhance/{step}"),
                _ => "Enhance".to_string(),
            };
            stages.push((name, diag));
        }
        stages.push(("Preprocess".to_string(), &self.preprocess));
        stages.push(("Inference".to_string(), &self.inference));
        stages.push(("Aggregation".to_string(), &self.aggregation));
        stages
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            width,
            height,
        } => format!("{input_bytes} bytes -> {width}x{height}"),
        StageMetrics::Enhance { width, height, .. } => format!("{width}x{height}"),
        StageMetrics::Preprocess {
            input_size,
            brightness,
            contrast,
            tensor_shape,
        } => format!(
            "{input_size}x{input_size} brightness={brightness:.3} contrast={contrast:.3} tensor={tensor_shape:?}"
        ),
        StageMetrics::Inference { candidate_count } => format!("{candidate_count} candidates"),
        StageMetrics::Aggregation {
            candidates_in,
            results_out,
        } => format!("{candidates_in} -> {results_out} results"),
    }
}

/// Everything recorded before inference.
pub(crate) struct PreparedStages {
    pub decode: StageDiagnostics,
    pub source: Dimensions,
    pub prepare: PrepareDiagnostics,
}

/// Decode and prepare an image, timing each stage.
pub(crate) fn prepare_staged<C: Clock, R: Rng + ?Sized>(
    recognizer: &Recognizer,
    bytes: &[u8],
    clock: &C,
    rng: &mut R,
) -> Result<(PreparedInput, PreparedStages), PipelineError> {
    let t = clock.now();
    let image = decode::decode(bytes)?;
    let source = Dimensions {
        width: image.width(),
        height: image.height(),
    };
    let decode = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: StageMetrics::Decode {
            input_bytes: bytes.len(),
            width: source.width,
            height: source.height,
        },
    };
    tracing::debug!(
        bytes = bytes.len(),
        width = source.width,
        height = source.height,
        "decoded input image"
    );

    let (prepared, prepare) = recognizer
        .preprocessor()
        .prepare_with_clock(&image, clock, rng)?;
    Ok((
        prepared,
        PreparedStages {
            decode,
            source,
            prepare,
        },
    ))
}

/// Run a full recognition and collect per-stage diagnostics.
///
/// # Errors
///
/// Same as [`Recognizer::recognize`].
pub fn recognize_with_diagnostics<C: Clock, R: Rng + ?Sized>(
    recognizer: &Recognizer,
    bytes: &[u8],
    clock: &C,
    rng: &mut R,
) -> Result<(Recognition, PipelineDiagnostics), PipelineError> {
    let start = clock.now();

    let (prepared, stages) = prepare_staged(recognizer, bytes, clock, rng)?;
    let enhancement_warning = prepared.enhancement_warning.as_ref().map(ToString::to_string);
    let working = Dimensions::of(&prepared.enhanced);

    let t = clock.now();
    let candidates = recognizer.infer(&prepared);
    let inference = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: StageMetrics::Inference {
            candidate_count: candidates.len(),
        },
    };

    let t = clock.now();
    let results = recognizer.aggregator().aggregate(&candidates);
    let aggregation = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: StageMetrics::Aggregation {
            candidates_in: candidates.len(),
            results_out: results.len(),
        },
    };

    let summary = PipelineSummary {
        source: stages.source,
        working,
        result_count: results.len(),
        top_label: results.top().map(|r| r.display_label.clone()),
        top_confidence: results.top().map(|r| r.confidence),
    };

    let diagnostics = PipelineDiagnostics {
        decode: stages.decode,
        enhance: stages.prepare.enhance,
        enhancement_warning,
        preprocess: stages.prepare.preprocess,
        inference,
        aggregation,
        total_duration: clock.elapsed(&start),
        summary,
    };
    Ok((into_recognition(prepared, results), diagnostics))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;
    use std::sync::Arc;

    use image::{DynamicImage, ImageFormat};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::classifier::{Classifier, ClassifierError};
    use crate::types::{ClassificationCandidate, InputTensor, PipelineConfig, RgbImage};

    /// Advances one millisecond per reading.
    #[derive(Default)]
    struct TickClock(Cell<u64>);

    impl Clock for TickClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.0.get();
            self.0.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.now() - since)
        }
    }

    struct Fixed;

    impl Classifier for Fixed {
        fn infer(&self, _: &InputTensor) -> Result<Vec<ClassificationCandidate>, ClassifierError> {
            Ok(vec![
                ClassificationCandidate::new("banana", 0.8),
                ClassificationCandidate::new("plantain", 0.05),
            ])
        }
    }

    fn png() -> Vec<u8> {
        let img = RgbImage::from_fn(20, 12, |x, y| image::Rgb([(x * 10) as u8, (y * 20) as u8, 5]));
        let mut buf = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn run() -> (Recognition, PipelineDiagnostics) {
        let recognizer = Recognizer::new(Arc::new(Fixed), PipelineConfig::default()).unwrap();
        recognize_with_diagnostics(
            &recognizer,
            &png(),
            &TickClock::default(),
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap()
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn collects_every_stage() {
        let (recognition, diag) = run();
        assert_eq!(diag.enhance.len(), 5);
        assert_eq!(diag.stages().len(), 9);
        assert_eq!(diag.summary.source, Dimensions { width: 20, height: 12 });
        assert_eq!(diag.summary.result_count, 1);
        assert_eq!(diag.summary.top_label.as_deref(), Some("Banana"));
        assert_eq!(recognition.results.len(), 1);
        assert!(diag.total_duration > diag.decode.duration);
        assert!(matches!(
            diag.inference.metrics,
            StageMetrics::Inference { candidate_count: 2 }
        ));
    }

    #[test]
    fn report_mentions_stages_and_result() {
        let (_, diag) = run();
        let report = diag.report();
        assert!(report.contains("Recognition Diagnostics Report"));
        assert!(report.contains("Enhance/local_contrast"));
        assert!(report.contains("Top: Banana (80.0%)"));
    }

    #[test]
    fn diagnostics_serialize_to_json() {
        let (_, diag) = run();
        let json = serde_json::to_value(&diag).unwrap();
        assert!(json["total_duration"].as_f64().unwrap() > 0.0);
        assert_eq!(json["summary"]["result_count"], 1);
        let back: PipelineDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.enhance.len(), 5);
    }

    #[test]
    fn staged_and_plain_recognition_agree() {
        let recognizer = Recognizer::new(Arc::new(Fixed), PipelineConfig::default()).unwrap();
        let bytes = png();
        let plain = recognizer
            .recognize_with_rng(&bytes, &mut StdRng::seed_from_u64(9))
            .unwrap();
        let (staged, _) = recognize_with_diagnostics(
            &recognizer,
            &bytes,
            &TickClock::default(),
            &mut StdRng::seed_from_u64(9),
        )
        .unwrap();
        assert_eq!(plain.results, staged.results);
        assert_eq!(plain.jitter, staged.jitter);
        assert_eq!(plain.resized, staged.resized);
        assert_eq!(plain.enhanced, staged.enhanced);
    }

    #[test]
    fn null_clock_reports_zero() {
        let clock = NullClock;
        assert_eq!(clock.elapsed(&clock.now()), Duration::ZERO);
    }
}
