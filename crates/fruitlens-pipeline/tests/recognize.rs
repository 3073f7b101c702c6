//! Integration tests: the recognition contract as seen by a host application.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};

use fruitlens_pipeline::{
    AggregationConfig, ClassificationCandidate, Classifier, ClassifierError, EnhanceError,
    EnhanceStep, EnhancementParameters, ImageEnhancer, InputTensor, Jitter, PipelineConfig,
    PreprocessConfig, Preprocessor, Recognizer, ResultAggregator, Transform,
};
use image::{DynamicImage, ImageFormat, RgbImage};

/// Replays a fixed candidate list and keeps every tensor it was given.
#[derive(Default)]
struct Recording {
    candidates: Vec<ClassificationCandidate>,
    seen: Mutex<Vec<InputTensor>>,
}

impl Classifier for Recording {
    fn infer(&self, input: &InputTensor) -> Result<Vec<ClassificationCandidate>, ClassifierError> {
        self.seen.lock().unwrap().push(input.clone());
        Ok(self.candidates.clone())
    }
}

fn encode(img: RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

fn fruit_photo(width: u32, height: u32) -> RgbImage {
    let (cx, cy) = (width / 2, height / 2);
    let r2 = u64::from(width.min(height) / 3).pow(2);
    RgbImage::from_fn(width, height, |x, y| {
        let d2 = u64::from(x.abs_diff(cx)).pow(2) + u64::from(y.abs_diff(cy)).pow(2);
        if d2 < r2 {
            image::Rgb([230, (150 + x % 20) as u8, 30])
        } else {
            image::Rgb([(60 + y % 10) as u8, 90, 70])
        }
    })
}

fn candidates(pairs: &[(&str, f32)]) -> Vec<ClassificationCandidate> {
    pairs
        .iter()
        .map(|&(label, confidence)| ClassificationCandidate::new(label, confidence))
        .collect()
}

fn no_jitter() -> PipelineConfig {
    PipelineConfig {
        preprocess: PreprocessConfig {
            jitter: Jitter::NONE,
            ..PreprocessConfig::default()
        },
        ..PipelineConfig::default()
    }
}

#[test]
fn tensors_are_bit_identical_without_jitter() {
    let classifier = Arc::new(Recording::default());
    let recognizer = Recognizer::new(classifier.clone(), no_jitter()).unwrap();
    let bytes = encode(fruit_photo(90, 70), ImageFormat::Png);

    recognizer.recognize(&bytes).unwrap();
    recognizer.recognize(&bytes).unwrap();

    let seen = classifier.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);
}

#[test]
fn tensor_is_always_300_square_with_batch_of_one() {
    let preprocessor = Preprocessor::with_enhancer(
        ImageEnhancer::with_steps(EnhancementParameters::STANDARD, Vec::new()),
        PreprocessConfig::default(),
    )
    .unwrap();
    for (w, h) in [(1, 1), (299, 301), (1200, 300), (40, 900)] {
        let image = DynamicImage::ImageRgb8(fruit_photo(w, h));
        let prepared = preprocessor.prepare(&image).unwrap();
        assert_eq!(prepared.tensor.shape(), &[1, 300, 300, 3], "input {w}x{h}");
    }
}

#[test]
fn downscale_guard_bounds_long_side() {
    let enhancer = ImageEnhancer::with_steps(
        EnhancementParameters::STANDARD,
        vec![Box::new(EnhanceStep::DownscaleGuard)],
    );
    let out = enhancer.enhance(&fruit_photo(2000, 1000));
    let (w, h) = out.image.dimensions();
    assert_eq!(w.max(h), 1024);
    assert!(h.abs_diff(512) <= 1);
}

#[test]
fn dedup_example_from_product_docs() {
    let set = ResultAggregator::new(AggregationConfig::default()).aggregate(&candidates(&[
        ("apple_golden", 0.92),
        ("apple_red", 0.85),
        ("banana", 0.40),
        ("orange", 0.05),
    ]));
    let got: Vec<_> = set
        .iter()
        .map(|r| (r.display_label.as_str(), r.confidence))
        .collect();
    assert_eq!(got, [("Apple Golden", 0.92), ("Banana", 0.40)]);
}

#[test]
fn nothing_confident_means_empty_results() {
    let aggregator = ResultAggregator::default();
    assert!(aggregator.aggregate(&[]).is_empty());
    assert!(
        aggregator
            .aggregate(&candidates(&[("kiwi", 0.1), ("fig", 0.09)]))
            .is_empty()
    );
}

#[test]
fn at_most_three_results() {
    let set = ResultAggregator::default().aggregate(&candidates(&[
        ("cherry", 0.20),
        ("peach", 0.50),
        ("apricot", 0.25),
        ("grape", 0.90),
        ("melon", 0.30),
    ]));
    let got: Vec<_> = set.iter().map(|r| r.category.as_str()).collect();
    assert_eq!(got, ["grape", "peach", "melon"]);
}

#[derive(Debug)]
struct BrokenColorSpace;

impl Transform for BrokenColorSpace {
    fn name(&self) -> &'static str {
        "broken_color_space"
    }

    fn apply(
        &self,
        _: &RgbImage,
        _: &EnhancementParameters,
    ) -> Result<RgbImage, EnhanceError> {
        Err(EnhanceError::PlaneMismatch {
            expected: (4, 4),
            actual: (3, 4),
        })
    }
}

#[test]
fn failed_enhancement_still_recognizes_original() {
    let enhancer = ImageEnhancer::with_steps(
        EnhancementParameters::STANDARD,
        vec![
            Box::new(EnhanceStep::Sharpen),
            Box::new(BrokenColorSpace),
        ],
    );
    let classifier = Arc::new(Recording {
        candidates: candidates(&[("banana", 0.7)]),
        ..Recording::default()
    });
    let recognizer = Recognizer::from_parts(
        classifier,
        Preprocessor::with_enhancer(enhancer, no_jitter().preprocess).unwrap(),
        ResultAggregator::default(),
    );

    let original = fruit_photo(50, 30);
    let out = recognizer
        .recognize(&encode(original.clone(), ImageFormat::Png))
        .unwrap();

    assert_eq!(out.enhanced, original);
    assert!(matches!(
        out.enhancement_warning,
        Some(EnhanceError::PlaneMismatch { .. })
    ));
    assert_eq!(out.results.top().map(|r| r.display_label.as_str()), Some("Banana"));
}

#[test]
fn unsupported_formats_are_rejected() {
    let recognizer = Recognizer::new(Arc::new(Recording::default()), no_jitter()).unwrap();
    let mut bmp = b"BM".to_vec();
    bmp.resize(64, 0);
    let err = recognizer.recognize(&bmp).unwrap_err();
    assert!(err.to_string().contains("unsupported image format"), "{err}");
}

#[test]
fn unusable_preprocess_config_is_an_error_not_a_crash() {
    let enhancer = || ImageEnhancer::with_steps(EnhancementParameters::STANDARD, Vec::new());
    let inverted = PreprocessConfig {
        jitter: Jitter::Random { min: 1.1, max: 0.9 },
        ..PreprocessConfig::default()
    };
    let empty = PreprocessConfig {
        input_size: 0,
        ..PreprocessConfig::default()
    };
    for config in [inverted, empty] {
        let err = Preprocessor::with_enhancer(enhancer(), config).unwrap_err();
        assert!(err.to_string().contains("invalid"), "{err}");
    }
}

#[test]
fn config_round_trips_through_json() {
    let config = no_jitter();
    let json = serde_json::to_string_pretty(&config).unwrap();
    let back: PipelineConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}
