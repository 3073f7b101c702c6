//! fruitlens-bench: CLI tool for running the recognition pipeline on files.
//!
//! Runs enhancement, preprocessing and ranking on a given image with
//! configurable parameters, printing per-stage diagnostics. The classifier
//! is replayed from files, so no model runtime is needed. Useful for:
//!
//! - Inspecting the enhanced and resized images the user would see
//! - Measuring per-stage durations (the denoise step dominates)
//! - Checking how thresholds and dedup policy change the ranked results
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin fruitlens-bench -- [OPTIONS] <IMAGE_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use fruitlens_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use fruitlens_pipeline::{
    AggregationConfig, ClassificationCandidate, Classifier, ClassifierError, DedupPolicy,
    InputNormalization, InputTensor, Jitter, LabelSet, PipelineConfig, PreprocessConfig,
    Recognizer, ResampleFilter, ScoringClassifier, SharedClassifier, TensorLayout,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing_subscriber::EnvFilter;

/// Run the fruitlens recognition pipeline on an image file.
///
/// Prints per-stage timing and metrics, the ranked results, and can
/// write the enhanced and resized images for inspection.
#[derive(Parser)]
#[command(name = "fruitlens-bench", version)]
struct Cli {
    /// Path to the input image (JPEG or PNG).
    image_path: PathBuf,

    /// Replay classifier output from a JSON array of
    /// `{"label": ..., "confidence": ...}` objects.
    #[arg(long, conflicts_with = "scores")]
    candidates: Option<PathBuf>,

    /// Replay a raw score vector (JSON array of numbers); needs `--labels`.
    #[arg(long, requires = "labels")]
    scores: Option<PathBuf>,

    /// Class names, one per line, in score order.
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Guesses kept from a raw score vector.
    #[arg(long, default_value_t = fruitlens_pipeline::classifier::DEFAULT_TOP_K)]
    top_k: usize,

    /// Side of the square classifier input in pixels.
    #[arg(long, default_value_t = PreprocessConfig::DEFAULT_INPUT_SIZE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    input_size: u32,

    /// Filter used to resize to the classifier input.
    #[arg(long, value_enum, default_value_t = Filter::CatmullRom)]
    resize_filter: Filter,

    /// Disable brightness/contrast jitter.
    #[arg(long)]
    no_jitter: bool,

    /// Seed for the jitter RNG (random when omitted).
    #[arg(long)]
    seed: Option<u64>,

    /// Classifier input value mapping.
    #[arg(long, value_enum, default_value_t = Normalization::Passthrough)]
    normalization: Normalization,

    /// Tensor axis order.
    #[arg(long, value_enum, default_value_t = Layout::Nhwc)]
    layout: Layout,

    /// Confidence threshold (exclusive).
    #[arg(long, default_value_t = AggregationConfig::DEFAULT_MIN_CONFIDENCE)]
    min_confidence: f32,

    /// Maximum number of ranked results.
    #[arg(long, default_value_t = AggregationConfig::DEFAULT_MAX_RESULTS)]
    max_results: usize,

    /// Which guess represents a category.
    #[arg(long, value_enum, default_value_t = Dedup::FirstSeen)]
    dedup: Dedup,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Write the enhanced image (PNG) to this path.
    #[arg(long)]
    enhanced_out: Option<PathBuf>,

    /// Write the resized, pre-jitter image (PNG) to this path.
    #[arg(long)]
    resized_out: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,
}

/// Resize filter selection.
#[derive(Clone, Copy, ValueEnum)]
enum Filter {
    /// Nearest-neighbor.
    Nearest,
    /// Bilinear.
    Triangle,
    /// Bicubic Catmull-Rom.
    CatmullRom,
    /// Gaussian.
    Gaussian,
    /// Lanczos with 3 lobes.
    Lanczos3,
}

/// Input normalization selection.
#[derive(Clone, Copy, ValueEnum)]
enum Normalization {
    /// Raw 0-255 values.
    Passthrough,
    /// 0-1.
    UnitRange,
    /// -1 to 1.
    Symmetric,
    /// ImageNet mean/std.
    Imagenet,
}

/// Tensor layout selection.
#[derive(Clone, Copy, ValueEnum)]
enum Layout {
    /// Channels last.
    Nhwc,
    /// Channels first.
    Nchw,
}

/// Dedup policy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Dedup {
    /// First guess in classifier order wins.
    FirstSeen,
    /// Most confident guess wins.
    HighestConfidence,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(PipelineConfig {
        preprocess: PreprocessConfig {
            input_size: cli.input_size,
            resize_filter: match cli.resize_filter {
                Filter::Nearest => ResampleFilter::Nearest,
                Filter::Triangle => ResampleFilter::Triangle,
                Filter::CatmullRom => ResampleFilter::CatmullRom,
                Filter::Gaussian => ResampleFilter::Gaussian,
                Filter::Lanczos3 => ResampleFilter::Lanczos3,
            },
            jitter: if cli.no_jitter {
                Jitter::NONE
            } else {
                Jitter::DEFAULT
            },
            normalization: match cli.normalization {
                Normalization::Passthrough => InputNormalization::Passthrough,
                Normalization::UnitRange => InputNormalization::UnitRange,
                Normalization::Symmetric => InputNormalization::Symmetric,
                Normalization::Imagenet => InputNormalization::IMAGENET,
            },
            layout: match cli.layout {
                Layout::Nhwc => TensorLayout::Nhwc,
                Layout::Nchw => TensorLayout::Nchw,
            },
        },
        aggregation: AggregationConfig {
            min_confidence: cli.min_confidence,
            max_results: cli.max_results,
            dedup: match cli.dedup {
                Dedup::FirstSeen => DedupPolicy::FirstSeen,
                Dedup::HighestConfidence => DedupPolicy::HighestConfidence,
            },
        },
    })
}

/// Classifier that returns a fixed list of guesses.
struct Replay(Vec<ClassificationCandidate>);

impl Classifier for Replay {
    fn infer(&self, _: &InputTensor) -> Result<Vec<ClassificationCandidate>, ClassifierError> {
        Ok(self.0.clone())
    }
}

fn read_to_string(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("Error reading {}: {e}", path.display()))
}

/// Build the replay classifier selected on the command line.
fn classifier_from_cli(cli: &Cli) -> Result<SharedClassifier, String> {
    if let Some(ref path) = cli.candidates {
        let candidates: Vec<ClassificationCandidate> = serde_json::from_str(&read_to_string(path)?)
            .map_err(|e| format!("Error parsing {}: {e}", path.display()))?;
        return Ok(Arc::new(Replay(candidates)));
    }

    if let (Some(scores_path), Some(labels_path)) = (&cli.scores, &cli.labels) {
        let scores: Vec<f32> = serde_json::from_str(&read_to_string(scores_path)?)
            .map_err(|e| format!("Error parsing {}: {e}", scores_path.display()))?;
        let labels = LabelSet::from_lines(&read_to_string(labels_path)?)
            .map_err(|e| format!("Error reading labels: {e}"))?;
        let model = ScoringClassifier::new(move |_: &InputTensor| Ok(scores.clone()), labels)
            .with_top_k(cli.top_k);
        return Ok(Arc::new(model));
    }

    tracing::warn!("no classifier output given, results will be empty");
    Ok(Arc::new(Replay(Vec::new())))
}

fn write_png(path: &Path, image: &image::RgbImage, what: &str) {
    match image.save_with_format(path, image::ImageFormat::Png) {
        Ok(()) => eprintln!("{what} image written to {}", path.display()),
        Err(e) => eprintln!("Error writing {what} image to {}: {e}", path.display()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let classifier = match classifier_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let recognizer = match Recognizer::new(classifier, config.clone()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Image: {} ({} bytes)",
        cli.image_path.display(),
        image_bytes.len(),
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut rng = cli
        .seed
        .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match fruitlens_pipeline::diagnostics::recognize_with_diagnostics(
            &recognizer,
            &image_bytes,
            &StdClock,
            &mut rng,
        ) {
            Ok((recognition, diagnostics)) => {
                if cli.json {
                    let out = serde_json::json!({
                        "results": recognition.results,
                        "jitter": recognition.jitter,
                        "diagnostics": diagnostics,
                    });
                    match serde_json::to_string_pretty(&out) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                    for (rank, result) in recognition.results.iter().enumerate() {
                        println!(
                            "  {}. {} ({:.1}%)  [{}]",
                            rank + 1,
                            result.display_label,
                            result.confidence * 100.0,
                            result.category,
                        );
                    }
                }

                // Write images on the first run only.
                if run == 0 {
                    if let Some(ref path) = cli.enhanced_out {
                        write_png(path, &recognition.enhanced, "Enhanced");
                    }
                    if let Some(ref path) = cli.resized_out {
                        write_png(path, &recognition.resized, "Resized");
                    }
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    let Some(first) = all_diagnostics.first() else {
        println!("Warning: no diagnostics to summarize");
        return;
    };

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    // Per-stage means. Every run has the same stages unless enhancement
    // failed part way, so match by name.
    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    for (name, _) in first.stages() {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(|d| {
                d.stages()
                    .into_iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, s)| s.duration.as_secs_f64() * 1000.0)
            })
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
