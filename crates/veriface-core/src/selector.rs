//! Face region selection.
//!
//! Applies the candidate-box quality policy, pads and crops the winning
//! region, and resizes it to the canonical size every downstream stage
//! assumes. Enrollment and verification disagree on how to treat multiple
//! detected faces, so the policy is an explicit mode rather than two code
//! paths.

use crate::config::SelectorConfig;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SelectError {
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("{count} faces detected — verification requires exactly one face in frame")]
    MultipleFacesDetected { count: usize },
    #[error("detected face is too small: {width}x{height} px (minimum {min} px)")]
    FaceTooSmall { width: u32, height: u32, min: u32 },
}

/// How the selector treats more than one candidate box.
///
/// Enrollment tolerates background faces and keeps the largest (the primary
/// subject fills the most frame). Verification must be done alone in frame,
/// so any extra face is a hard rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Enrollment,
    Verification,
}

/// Pick one face region from the detector's candidates and return it as a
/// canonical `crop_size` × `crop_size` color crop.
pub fn select_face(
    image: &RgbImage,
    candidates: &[BoundingBox],
    mode: SelectionMode,
    config: &SelectorConfig,
) -> Result<RgbImage, SelectError> {
    let face = match candidates {
        [] => return Err(SelectError::NoFaceDetected),
        [only] => only,
        many => {
            if mode == SelectionMode::Verification {
                return Err(SelectError::MultipleFacesDetected { count: many.len() });
            }
            largest(many)
        }
    };

    let width = face.width.max(0.0) as u32;
    let height = face.height.max(0.0) as u32;
    if width < config.min_face_size || height < config.min_face_size {
        return Err(SelectError::FaceTooSmall {
            width,
            height,
            min: config.min_face_size,
        });
    }

    let region = padded_region(face, image.width(), image.height(), config.padding_ratio);
    tracing::debug!(
        x = region.0,
        y = region.1,
        width = region.2,
        height = region.3,
        candidates = candidates.len(),
        "face region selected"
    );

    let crop = imageops::crop_imm(image, region.0, region.1, region.2, region.3).to_image();
    Ok(imageops::resize(
        &crop,
        config.crop_size,
        config.crop_size,
        FilterType::Triangle,
    ))
}

fn largest(candidates: &[BoundingBox]) -> &BoundingBox {
    let mut best = &candidates[0];
    for candidate in &candidates[1..] {
        if candidate.area() > best.area() {
            best = candidate;
        }
    }
    best
}

/// Expand the box by `ratio` × min(w, h) on every side, clipped to the image.
fn padded_region(face: &BoundingBox, img_w: u32, img_h: u32, ratio: f32) -> (u32, u32, u32, u32) {
    let pad = ratio * face.width.min(face.height);

    let x0 = (face.x - pad).max(0.0);
    let y0 = (face.y - pad).max(0.0);
    let x1 = (face.x + face.width + pad).min(img_w as f32);
    let y1 = (face.y + face.height + pad).min(img_h as f32);

    let x = (x0 as u32).min(img_w - 1);
    let y = (y0 as u32).min(img_h - 1);
    let w = ((x1 - x0).max(1.0) as u32).min(img_w - x);
    let h = ((y1 - y0).max(1.0) as u32).min(img_h - y);
    (x, y, w, h)
}
