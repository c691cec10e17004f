//! Engine configuration.
//!
//! Every threshold and size the pipeline depends on lives here as an explicit,
//! documented value rather than hardcoded module state, so tests can run the
//! same code under different threshold regimes and deployments can tune the
//! acceptance gates without rebuilding.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Face region selection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Minimum acceptable detected face width/height in pixels.
    pub min_face_size: u32,
    /// Symmetric padding applied around the box, as a fraction of min(w, h).
    pub padding_ratio: f32,
    /// Canonical side length every crop is resized to before encoding.
    pub crop_size: u32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            min_face_size: 80,
            padding_ratio: 0.10,
            crop_size: 200,
        }
    }
}

/// Sharpness gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minimum variance of the Laplacian on the canonical grayscale crop.
    pub min_sharpness: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self { min_sharpness: 20.0 }
    }
}

/// Feature encoder layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Bins of the global equalized-intensity histogram.
    pub global_hist_bins: usize,
    /// Bins per spatial quadrant histogram (4 quadrants).
    pub quadrant_hist_bins: usize,
    /// Bins of the local-binary-pattern histogram.
    pub lbp_bins: usize,
    /// Cells per side of the statistics grid (mean/std/median per cell).
    pub grid_size: usize,
    /// Bins of the magnitude-weighted gradient orientation histogram.
    pub orientation_bins: usize,
    /// Side length of the downsampled raw-pixel tail.
    pub pixel_tail_size: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            global_hist_bins: 64,
            quadrant_hist_bins: 32,
            lbp_bins: 64,
            grid_size: 16,
            orientation_bins: 32,
            pixel_tail_size: 20,
        }
    }
}

impl EncoderConfig {
    /// Length of the raw-pixel tail segment.
    pub fn pixel_tail_len(&self) -> usize {
        self.pixel_tail_size * self.pixel_tail_size
    }

    /// Total descriptor dimension under this layout.
    pub fn descriptor_len(&self) -> usize {
        self.global_hist_bins
            + 4 * self.quadrant_hist_bins
            + self.lbp_bins
            + self.grid_size * self.grid_size * 3
            + self.orientation_bins
            + crate::encoder::GABOR_FEATURE_LEN
            + self.pixel_tail_len()
    }
}

/// Triple-gate match thresholds.
///
/// The decision rule is conjunctive: a probe matches only when the combined
/// similarity, the Euclidean distance and the pixel-tail similarity all pass
/// their gates at once. Raising `similarity_threshold` or
/// `min_pixel_similarity`, or lowering `max_distance`, can only reject more.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum combined (0.6 feature + 0.4 pixel) cosine similarity.
    pub similarity_threshold: f32,
    /// Maximum Euclidean distance over the full descriptors.
    pub max_distance: f32,
    /// Minimum cosine similarity of the raw-pixel tails.
    pub min_pixel_similarity: f32,
    /// Length of the raw-pixel tail segment at the end of each descriptor.
    /// Must equal `pixel_tail_size`² of the encoder that produced them.
    pub pixel_tail_len: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.92,
            max_distance: 0.35,
            min_pixel_similarity: 0.88,
            pixel_tail_len: 400,
        }
    }
}

/// Enrollment batch policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    /// Minimum number of source images that must survive selection and the
    /// quality gate for enrollment to succeed.
    pub min_processed_images: usize,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self { min_processed_images: 3 }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub selector: SelectorConfig,
    pub quality: QualityConfig,
    pub encoder: EncoderConfig,
    pub matcher: MatcherConfig,
    pub enrollment: EnrollmentConfig,
}

impl EngineConfig {
    /// Load a configuration from a TOML file and validate it.
    /// Missing sections and fields fall back to the documented defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "engine config loaded");
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run under.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.selector.crop_size < 32 {
            return invalid(format!(
                "crop_size must be at least 32, got {}",
                self.selector.crop_size
            ));
        }
        if self.selector.min_face_size == 0 {
            return invalid("min_face_size must be positive".into());
        }
        if !(0.0..=0.5).contains(&self.selector.padding_ratio) {
            return invalid(format!(
                "padding_ratio must be within [0.0, 0.5], got {}",
                self.selector.padding_ratio
            ));
        }
        if self.quality.min_sharpness < 0.0 {
            return invalid(format!(
                "min_sharpness must be non-negative, got {}",
                self.quality.min_sharpness
            ));
        }

        let enc = &self.encoder;
        let crop = self.selector.crop_size as usize;
        if enc.global_hist_bins == 0
            || enc.quadrant_hist_bins == 0
            || enc.lbp_bins == 0
            || enc.orientation_bins == 0
        {
            return invalid("histogram bin counts must be positive".into());
        }
        if enc.global_hist_bins > 256 || enc.quadrant_hist_bins > 256 || enc.lbp_bins > 256 {
            return invalid("intensity histogram bin counts cannot exceed 256".into());
        }
        if enc.grid_size == 0 || enc.grid_size > crop {
            return invalid(format!(
                "grid_size must be within [1, crop_size], got {}",
                enc.grid_size
            ));
        }
        if enc.pixel_tail_size == 0 || enc.pixel_tail_size > crop {
            return invalid(format!(
                "pixel_tail_size must be within [1, crop_size], got {}",
                enc.pixel_tail_size
            ));
        }

        let m = &self.matcher;
        for (name, value) in [
            ("similarity_threshold", m.similarity_threshold),
            ("min_pixel_similarity", m.min_pixel_similarity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be within [0.0, 1.0], got {value}"));
            }
        }
        if m.max_distance <= 0.0 {
            return invalid(format!(
                "max_distance must be positive, got {}",
                m.max_distance
            ));
        }
        if m.pixel_tail_len != enc.pixel_tail_len() {
            return invalid(format!(
                "matcher pixel_tail_len ({}) does not match encoder tail ({}²={}); \
                 templates and probes would split at different offsets",
                m.pixel_tail_len,
                enc.pixel_tail_size,
                enc.pixel_tail_len()
            ));
        }

        if self.enrollment.min_processed_images == 0 {
            return invalid("min_processed_images must be positive".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_default_descriptor_len() {
        // 64 + 4*32 + 64 + 16*16*3 + 32 + 8 + 400
        assert_eq!(EncoderConfig::default().descriptor_len(), 1464);
    }

    #[test]
    fn test_tail_mismatch_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.matcher.pixel_tail_len = 256;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "got {err:?}");
    }

    #[test]
    fn test_padding_out_of_range_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.selector.padding_ratio = 0.9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_negative_thresholds_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.matcher.similarity_threshold = -0.1;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.matcher.max_distance = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_toml_partial_sections_use_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            [matcher]
            similarity_threshold = 0.95

            [selector]
            min_face_size = 60
            "#,
        )
        .unwrap();
        assert!((cfg.matcher.similarity_threshold - 0.95).abs() < 1e-6);
        assert_eq!(cfg.selector.min_face_size, 60);
        // untouched sections keep defaults
        assert_eq!(cfg.selector.crop_size, 200);
        assert!((cfg.matcher.max_distance - 0.35).abs() < 1e-6);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_empty_toml_is_default() {
        let cfg: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.encoder.descriptor_len(), 1464);
        cfg.validate().unwrap();
    }
}
