//! Blur rejection via variance of the Laplacian.
//!
//! Runs on the canonical grayscale crop, after resizing, so one threshold is
//! scale-consistent across source resolutions. A sharp image has strong
//! second derivatives around edges and texture; a defocused or motion-blurred
//! capture flattens them, collapsing the variance toward zero.

use crate::config::QualityConfig;
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QualityError {
    #[error("image too blurry: sharpness {sharpness:.2} below threshold {threshold:.2}")]
    TooBlurry { sharpness: f32, threshold: f32 },
}

/// Variance of the 4-neighbor Laplacian over interior pixels.
///
/// Returns 0.0 for images too small to have an interior.
pub fn sharpness(gray: &GrayImage) -> f32 {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    if w < 3 || h < 3 {
        return 0.0;
    }

    let pixels = gray.as_raw();
    let at = |x: usize, y: usize| f64::from(pixels[y * w + x]);

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let count = ((w - 2) * (h - 2)) as f64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let mean = sum / count;
    (sum_sq / count - mean * mean) as f32
}

/// Gate a crop on sharpness, returning the measured score on success.
pub fn ensure_sharp(gray: &GrayImage, config: &QualityConfig) -> Result<f32, QualityError> {
    let score = sharpness(gray);
    if score < config.min_sharpness {
        return Err(QualityError::TooBlurry {
            sharpness: score,
            threshold: config.min_sharpness,
        });
    }
    Ok(score)
}
