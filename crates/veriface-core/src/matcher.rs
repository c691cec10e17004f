//! Triple-gate descriptor comparison.
//!
//! Two descriptors are scored by three independent metrics — cosine
//! similarity of the engineered-feature segment, cosine similarity of the
//! raw-pixel tail, and Euclidean distance over the full vectors — and a match
//! requires all three gates to pass at once. Any single metric can be fooled
//! by lighting or pose; the conjunction biases decisions toward rejecting
//! borderline matches.

use crate::config::MatcherConfig;
use crate::encoder::NORM_EPSILON;
use crate::types::MatchResult;
use thiserror::Error;

/// Weighting of engineered features against the raw-pixel tail in the
/// combined score. Structural features dominate, but raw appearance keeps a
/// veto over near-duplicate-looking yet structurally different faces.
const FEATURE_WEIGHT: f32 = 0.6;
const PIXEL_WEIGHT: f32 = 0.4;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error(
        "descriptor length mismatch: {left} vs {right} — \
         enrollment and probe were produced by different encoder configurations"
    )]
    DimensionMismatch { left: usize, right: usize },
    #[error("descriptor of length {len} cannot contain a {tail}-value pixel tail")]
    DescriptorTooShort { len: usize, tail: usize },
}

/// Compare two descriptors (typically a stored template and a fresh sample).
pub fn compare(a: &[f32], b: &[f32], config: &MatcherConfig) -> Result<MatchResult, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::DimensionMismatch { left: a.len(), right: b.len() });
    }
    if a.len() <= config.pixel_tail_len {
        return Err(MatchError::DescriptorTooShort {
            len: a.len(),
            tail: config.pixel_tail_len,
        });
    }

    let split = a.len() - config.pixel_tail_len;
    let feature_similarity = cosine_similarity(&a[..split], &b[..split]);
    let pixel_similarity = cosine_similarity(&a[split..], &b[split..]);
    let combined_similarity = FEATURE_WEIGHT * feature_similarity + PIXEL_WEIGHT * pixel_similarity;

    let euclidean_distance = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(x - y);
            d * d
        })
        .sum::<f64>()
        .sqrt() as f32;

    let matched = combined_similarity >= config.similarity_threshold
        && euclidean_distance <= config.max_distance
        && pixel_similarity >= config.min_pixel_similarity;

    Ok(MatchResult {
        matched,
        combined_similarity,
        feature_similarity,
        pixel_similarity,
        euclidean_distance,
        confidence: (combined_similarity * 100.0).clamp(0.0, 100.0),
    })
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt() + f64::from(NORM_EPSILON))) as f32
}
