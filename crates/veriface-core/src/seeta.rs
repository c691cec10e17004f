//! SeetaFace detector backend via the `rustface` crate.
//!
//! Loads a SeetaFace frontal-face model from disk and adapts it to the
//! [`FaceDetector`] trait. The `rustface` detector needs `&mut self`, so a
//! fresh detector is built from the cloned model per call, keeping this
//! backend `Send + Sync` like every other.

use crate::detect::FaceDetector;
use crate::types::BoundingBox;
use std::path::Path;
use thiserror::Error;

const SEETA_MIN_FACE_SIZE: u32 = 20;
const SEETA_SCORE_THRESHOLD: f64 = 2.0;
const SEETA_PYRAMID_SCALE: f32 = 0.8;
const SEETA_WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum SeetaError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("failed to load SeetaFace model: {0}")]
    Io(#[from] std::io::Error),
}

/// Face detector backed by the SeetaFace engine.
pub struct SeetaDetector {
    model: rustface::Model,
}

impl SeetaDetector {
    /// Load a SeetaFace model (e.g. `seeta_fd_frontal_v1.0.bin`) from disk.
    pub fn load(model_path: &str) -> Result<Self, SeetaError> {
        if !Path::new(model_path).exists() {
            return Err(SeetaError::ModelNotFound(model_path.to_string()));
        }
        let model = rustface::load_model(model_path)?;
        tracing::info!(path = model_path, "SeetaFace model loaded");
        Ok(Self { model })
    }
}

impl FaceDetector for SeetaDetector {
    fn detect(&self, gray: &[u8], width: u32, height: u32) -> Vec<BoundingBox> {
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(SEETA_MIN_FACE_SIZE);
        detector.set_score_thresh(SEETA_SCORE_THRESHOLD);
        detector.set_pyramid_scale_factor(SEETA_PYRAMID_SCALE);
        detector.set_slide_window_step(SEETA_WINDOW_STEP, SEETA_WINDOW_STEP);

        let faces = detector.detect(&rustface::ImageData::new(gray, width, height));

        faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                BoundingBox {
                    x: bbox.x() as f32,
                    y: bbox.y() as f32,
                    width: bbox.width() as f32,
                    height: bbox.height() as f32,
                    confidence: face.score() as f32,
                }
            })
            .collect()
    }
}
