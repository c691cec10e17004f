use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in source-image pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Box area in square pixels.
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Fixed-length face descriptor.
///
/// Produced once per face crop and immutable afterwards. The layout is a fixed
/// concatenation of feature segments ending in a raw-pixel tail (see
/// [`crate::encoder`]); two descriptors are only comparable when produced by
/// the same encoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Enrollment template: the element-wise mean of many descriptors.
///
/// The mean is deliberately not re-normalized — averaging smooths per-capture
/// noise while preserving the scale the matcher's distance gate relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub values: Vec<f32>,
}

impl Template {
    /// Average a non-empty set of equal-length descriptors.
    ///
    /// Every descriptor contributes equal weight, augmented variants
    /// included. Returns `None` on an empty input.
    pub fn average(descriptors: &[Descriptor]) -> Option<Self> {
        let first = descriptors.first()?;
        let dim = first.len();
        debug_assert!(
            descriptors.iter().all(|d| d.len() == dim),
            "descriptors from mixed encoder configurations"
        );

        let mut sums = vec![0.0f64; dim];
        for d in descriptors {
            for (s, v) in sums.iter_mut().zip(&d.values) {
                *s += f64::from(*v);
            }
        }

        let count = descriptors.len() as f64;
        Some(Self {
            values: sums.into_iter().map(|s| (s / count) as f32).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result of matching two descriptors (or a template against a probe).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    /// Positive only when all three metric gates hold simultaneously.
    pub matched: bool,
    /// 0.6 × feature similarity + 0.4 × pixel similarity.
    pub combined_similarity: f32,
    /// Cosine similarity of the engineered-feature segments.
    pub feature_similarity: f32,
    /// Cosine similarity of the raw-pixel tail segments.
    pub pixel_similarity: f32,
    /// L2 distance over the complete vectors.
    pub euclidean_distance: f32,
    /// Combined similarity expressed as a 0–100 percentage.
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(values: Vec<f32>) -> Descriptor {
        Descriptor { values }
    }

    #[test]
    fn test_bounding_box_area() {
        let b = BoundingBox { x: 0.0, y: 0.0, width: 20.0, height: 10.0, confidence: 1.0 };
        assert!((b.area() - 200.0).abs() < 1e-6);
    }

    #[test]
    fn test_average_single_descriptor_is_identity() {
        let d = desc(vec![0.5, -0.25, 1.0]);
        let t = Template::average(std::slice::from_ref(&d)).unwrap();
        assert_eq!(t.values, d.values);
    }

    #[test]
    fn test_average_is_element_wise_mean() {
        let a = desc(vec![1.0, 0.0, 2.0]);
        let b = desc(vec![3.0, 1.0, 0.0]);
        let t = Template::average(&[a, b]).unwrap();
        assert_eq!(t.values, vec![2.0, 0.5, 1.0]);
    }

    #[test]
    fn test_average_empty_is_none() {
        assert!(Template::average(&[]).is_none());
    }

    #[test]
    fn test_average_does_not_renormalize() {
        // Two unit vectors pointing apart: the mean has norm < 1 and must
        // keep it — the distance gate depends on the preserved scale.
        let a = desc(vec![1.0, 0.0]);
        let b = desc(vec![0.0, 1.0]);
        let t = Template::average(&[a, b]).unwrap();
        let norm: f32 = t.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - (0.5f32).sqrt()).abs() < 1e-6, "norm = {norm}");
    }
}
