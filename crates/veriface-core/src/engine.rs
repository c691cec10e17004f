//! Enrollment, verification and pairwise comparison.
//!
//! `FaceEngine` wires the stages together: external detection, region
//! selection, the sharpness gate, augmentation, encoding, template
//! aggregation and matching. Every operation is a pure synchronous
//! computation over in-memory buffers — the engine holds no interior
//! mutability, so one instance can be shared across worker threads freely.

use crate::augment::augment;
use crate::config::EngineConfig;
use crate::detect::FaceDetector;
use crate::encoder::{self, encode};
use crate::matcher::{self, MatchError};
use crate::quality::{ensure_sharp, QualityError};
use crate::selector::{select_face, SelectError, SelectionMode};
use crate::types::{MatchResult, Template};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error(transparent)]
    Quality(#[from] QualityError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("not enough valid face images: {processed} processed, {required} required")]
    InsufficientSamples {
        processed: usize,
        required: usize,
        /// Per-image failure reasons, so the caller can report which
        /// captures to redo.
        failures: Vec<String>,
    },
    #[error("no images provided")]
    NoImages,
}

/// Outcome of a successful enrollment.
#[derive(Debug, Clone)]
pub struct Enrollment {
    /// Averaged template over every encoded sample.
    pub template: Template,
    /// Source images that survived selection and the quality gate.
    pub images_processed: usize,
    /// Source images supplied.
    pub total_images: usize,
    /// Encoded samples contributing to the template (processed × 7 variants).
    pub augmented_samples: usize,
    /// Per-image failure reasons for skipped images ("image N: …", 1-based).
    pub warnings: Vec<String>,
}

/// The face-matching engine.
pub struct FaceEngine {
    detector: Box<dyn FaceDetector>,
    config: EngineConfig,
}

impl FaceEngine {
    /// Build an engine over a detection backend, rejecting invalid
    /// configurations up front.
    pub fn new(
        detector: Box<dyn FaceDetector>,
        config: EngineConfig,
    ) -> Result<Self, crate::config::ConfigError> {
        config.validate()?;
        Ok(Self { detector, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Enroll from a batch of captures.
    ///
    /// Each image runs through detection, tolerant selection (largest face
    /// wins over background faces), the sharpness gate, and the 7-variant
    /// augmentation sequence; every variant is encoded. Per-image failures
    /// become warnings rather than aborting the batch — enrollment only
    /// fails when fewer than the configured minimum of source images
    /// survive.
    pub fn enroll(&self, images: &[RgbImage]) -> Result<Enrollment, EngineError> {
        if images.is_empty() {
            return Err(EngineError::NoImages);
        }

        let mut descriptors = Vec::new();
        let mut warnings = Vec::new();
        let mut processed = 0usize;

        for (idx, image) in images.iter().enumerate() {
            match self.canonical_crop(image, SelectionMode::Enrollment) {
                Ok(crop) => {
                    for variant in augment(&crop) {
                        descriptors.push(encode(&variant, &self.config.encoder));
                    }
                    processed += 1;
                }
                Err(err) => {
                    tracing::debug!(image = idx + 1, error = %err, "enrollment image skipped");
                    warnings.push(format!("image {}: {}", idx + 1, err));
                }
            }
        }

        let required = self.config.enrollment.min_processed_images;
        if processed < required {
            return Err(EngineError::InsufficientSamples {
                processed,
                required,
                failures: warnings,
            });
        }

        let template = Template::average(&descriptors).ok_or(EngineError::InsufficientSamples {
            processed,
            required,
            failures: Vec::new(),
        })?;

        tracing::info!(
            processed,
            total = images.len(),
            augmented = descriptors.len(),
            skipped = warnings.len(),
            "enrollment template built"
        );

        Ok(Enrollment {
            template,
            images_processed: processed,
            total_images: images.len(),
            augmented_samples: descriptors.len(),
            warnings,
        })
    }

    /// Verify a fresh capture against a stored template.
    ///
    /// Verification must be done alone in frame: more than one detected face
    /// is rejected outright. The probe is encoded without augmentation.
    pub fn verify(&self, image: &RgbImage, template: &Template) -> Result<MatchResult, EngineError> {
        let crop = self.canonical_crop(image, SelectionMode::Verification)?;
        let probe = encode(&crop, &self.config.encoder);
        let result = matcher::compare(&template.values, &probe.values, &self.config.matcher)?;
        tracing::debug!(
            matched = result.matched,
            combined = result.combined_similarity,
            distance = result.euclidean_distance,
            pixel = result.pixel_similarity,
            "verification scored"
        );
        Ok(result)
    }

    /// Compare two ad hoc captures directly.
    ///
    /// Both images run the full single-face pipeline independently before
    /// their descriptors are matched; the operation is symmetric.
    pub fn compare(
        &self,
        image_a: &RgbImage,
        image_b: &RgbImage,
    ) -> Result<MatchResult, EngineError> {
        let crop_a = self.canonical_crop(image_a, SelectionMode::Verification)?;
        let crop_b = self.canonical_crop(image_b, SelectionMode::Verification)?;
        let a = encode(&crop_a, &self.config.encoder);
        let b = encode(&crop_b, &self.config.encoder);
        Ok(matcher::compare(&a.values, &b.values, &self.config.matcher)?)
    }

    /// Detection → selection → sharpness gate, yielding the canonical crop.
    fn canonical_crop(
        &self,
        image: &RgbImage,
        mode: SelectionMode,
    ) -> Result<RgbImage, EngineError> {
        let gray = encoder::to_gray(image);
        let candidates = self
            .detector
            .detect(gray.as_raw(), gray.width(), gray.height());

        let crop = select_face(image, &candidates, mode, &self.config.selector)?;
        ensure_sharp(&encoder::to_gray(&crop), &self.config.quality)?;
        Ok(crop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::AUGMENTATION_COUNT;
    use crate::types::BoundingBox;
    use image::Rgb;

    const IMG_SIZE: u32 = 240;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9 }
    }

    /// Detector stub: one centered face, unless the frame is essentially black.
    struct OneFace;
    impl FaceDetector for OneFace {
        fn detect(&self, gray: &[u8], _w: u32, _h: u32) -> Vec<BoundingBox> {
            if gray.iter().all(|&v| v < 10) {
                return Vec::new();
            }
            vec![bbox(40.0, 40.0, 160.0, 160.0)]
        }
    }

    struct NoFace;
    impl FaceDetector for NoFace {
        fn detect(&self, _gray: &[u8], _w: u32, _h: u32) -> Vec<BoundingBox> {
            Vec::new()
        }
    }

    struct TwoFaces;
    impl FaceDetector for TwoFaces {
        fn detect(&self, _gray: &[u8], _w: u32, _h: u32) -> Vec<BoundingBox> {
            vec![bbox(10.0, 10.0, 100.0, 100.0), bbox(120.0, 60.0, 110.0, 110.0)]
        }
    }

    /// Smaller canonical crop keeps the Gabor convolutions cheap in tests.
    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.selector.crop_size = 96;
        config
    }

    /// Textured synthetic "face": smooth enough to survive augmentation,
    /// sharp enough to pass the quality gate.
    fn face_image(intensity_scale: f32) -> RgbImage {
        RgbImage::from_fn(IMG_SIZE, IMG_SIZE, |x, y| {
            let v = 127.5 + 100.0 * (x as f32 * 0.5).sin() * (y as f32 * 0.5).sin();
            let v = (v * intensity_scale).round().clamp(0.0, 255.0) as u8;
            Rgb([v, v, v])
        })
    }

    fn black_image() -> RgbImage {
        RgbImage::from_pixel(IMG_SIZE, IMG_SIZE, Rgb([0, 0, 0]))
    }

    fn engine(detector: Box<dyn FaceDetector>) -> FaceEngine {
        FaceEngine::new(detector, test_config()).unwrap()
    }

    #[test]
    fn test_enroll_full_batch() {
        let engine = engine(Box::new(OneFace));
        let images = vec![
            face_image(1.0),
            face_image(0.97),
            face_image(1.03),
            face_image(0.99),
            face_image(1.01),
        ];
        let enrollment = engine.enroll(&images).unwrap();

        assert_eq!(enrollment.images_processed, 5);
        assert_eq!(enrollment.total_images, 5);
        assert_eq!(enrollment.augmented_samples, 5 * AUGMENTATION_COUNT);
        assert!(enrollment.warnings.is_empty());
        assert_eq!(
            enrollment.template.len(),
            engine.config().encoder.descriptor_len()
        );
    }

    #[test]
    fn test_enroll_collects_per_image_warnings() {
        // Three usable captures plus two black frames the detector skips:
        // exactly the configured minimum survives.
        let engine = engine(Box::new(OneFace));
        let images = vec![
            face_image(1.0),
            face_image(0.98),
            face_image(1.02),
            black_image(),
            black_image(),
        ];
        let enrollment = engine.enroll(&images).unwrap();

        assert_eq!(enrollment.images_processed, 3);
        assert_eq!(enrollment.augmented_samples, 3 * AUGMENTATION_COUNT);
        assert_eq!(enrollment.warnings.len(), 2);
        assert!(enrollment.warnings[0].starts_with("image 4:"), "{:?}", enrollment.warnings);
        assert!(enrollment.warnings[1].starts_with("image 5:"), "{:?}", enrollment.warnings);
        assert!(enrollment.warnings[0].contains("no face detected"));
    }

    #[test]
    fn test_enroll_below_minimum_fails() {
        let engine = engine(Box::new(OneFace));
        let images = vec![face_image(1.0), face_image(0.98), black_image(), black_image()];
        let err = engine.enroll(&images).unwrap_err();
        match err {
            EngineError::InsufficientSamples { processed, required, failures } => {
                assert_eq!(processed, 2);
                assert_eq!(required, 3);
                assert_eq!(failures.len(), 2);
            }
            other => panic!("expected InsufficientSamples, got {other:?}"),
        }
    }

    #[test]
    fn test_enroll_no_faces_anywhere_fails() {
        let engine = engine(Box::new(NoFace));
        let images = vec![face_image(1.0), face_image(1.0), face_image(1.0)];
        let err = engine.enroll(&images).unwrap_err();
        match err {
            EngineError::InsufficientSamples { processed, failures, .. } => {
                assert_eq!(processed, 0);
                assert_eq!(failures.len(), 3);
            }
            other => panic!("expected InsufficientSamples, got {other:?}"),
        }
    }

    #[test]
    fn test_enroll_empty_batch_fails() {
        let engine = engine(Box::new(OneFace));
        assert!(matches!(engine.enroll(&[]), Err(EngineError::NoImages)));
    }

    #[test]
    fn test_verify_after_enroll_matches() {
        let engine = engine(Box::new(OneFace));
        let images = vec![face_image(1.0), face_image(0.98), face_image(1.02)];
        let enrollment = engine.enroll(&images).unwrap();

        let result = engine.verify(&face_image(1.0), &enrollment.template).unwrap();
        assert!(result.matched, "genuine probe rejected: {result:?}");
        assert!(result.combined_similarity > 0.92);
        assert!(result.confidence > 92.0);
    }

    #[test]
    fn test_verify_rejects_multiple_faces() {
        let engine = engine(Box::new(TwoFaces));
        let template = Template { values: vec![0.1; 1464] };
        let err = engine.verify(&face_image(1.0), &template).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Select(SelectError::MultipleFacesDetected { count: 2 })
        ));
    }

    #[test]
    fn test_enroll_tolerates_multiple_faces() {
        // Enrollment picks the largest candidate instead of failing.
        let engine = engine(Box::new(TwoFaces));
        let images = vec![face_image(1.0), face_image(0.99), face_image(1.01)];
        let enrollment = engine.enroll(&images).unwrap();
        assert_eq!(enrollment.images_processed, 3);
    }

    #[test]
    fn test_verify_dimension_mismatch_is_typed() {
        let engine = engine(Box::new(OneFace));
        let template = Template { values: vec![0.1; 10] };
        let err = engine.verify(&face_image(1.0), &template).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Match(MatchError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_blurry_capture_rejected() {
        let engine = engine(Box::new(OneFace));
        let flat = RgbImage::from_pixel(IMG_SIZE, IMG_SIZE, Rgb([128, 128, 128]));
        let template = Template { values: vec![0.1; 1464] };
        let err = engine.verify(&flat, &template).unwrap_err();
        assert!(matches!(err, EngineError::Quality(QualityError::TooBlurry { .. })));
    }

    #[test]
    fn test_compare_same_image_is_self_similar() {
        let engine = engine(Box::new(OneFace));
        let image = face_image(1.0);
        let result = engine.compare(&image, &image).unwrap();

        assert!(result.matched);
        assert!((result.combined_similarity - 1.0).abs() < 1e-4);
        assert!(result.euclidean_distance < 1e-4);
        assert!((result.confidence - 100.0).abs() < 0.1);
    }

    #[test]
    fn test_small_brightness_shift_keeps_pixel_similarity() {
        // Two captures differing by a 2% intensity scale must stay nearly
        // identical in the raw-pixel tail.
        let engine = engine(Box::new(OneFace));
        let result = engine.compare(&face_image(1.0), &face_image(1.02)).unwrap();
        assert!(
            result.pixel_similarity >= 0.95,
            "pixel similarity = {}",
            result.pixel_similarity
        );
    }
}
