//! Multi-family face feature encoder.
//!
//! One canonical crop becomes one fixed-length descriptor by concatenating,
//! in fixed order: a global equalized-intensity histogram, four spatial
//! quadrant histograms, a local-binary-pattern histogram, per-cell grid
//! statistics, a magnitude-weighted gradient orientation histogram, Gabor
//! texture responses, and a downsampled raw-pixel tail. The tail is always
//! the final segment — the matcher scores it separately from the engineered
//! features.
//!
//! The whole pipeline is pure and deterministic: identical pixels in,
//! bit-identical descriptor out.

use crate::config::EncoderConfig;
use crate::types::Descriptor;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage};

/// Additive epsilon in every normalization denominator, so degenerate
/// (all-zero) inputs produce a finite descriptor instead of a division by zero.
pub(crate) const NORM_EPSILON: f32 = 1e-7;

/// Values contributed by [`gabor_features`]: mean |response| and response
/// std for each of the four orientations.
pub const GABOR_FEATURE_LEN: usize = 8;

// Fixed Gabor bank parameters. The kernel is scaled by its absolute
// coefficient sum so responses to [0, 1] input stay within [-1, 1].
const GABOR_ORIENTATIONS_DEG: [f32; 4] = [0.0, 45.0, 90.0, 135.0];
const GABOR_RADIUS: i64 = 7;
const GABOR_SIGMA: f32 = 4.0;
const GABOR_WAVELENGTH: f32 = 10.0;
const GABOR_ASPECT_RATIO: f32 = 0.5;

/// Encode one canonical face crop into a descriptor.
pub fn encode(crop: &RgbImage, config: &EncoderConfig) -> Descriptor {
    let gray = to_gray(crop);
    let equalized = equalize_histogram(&gray);

    let mut values = Vec::with_capacity(config.descriptor_len());
    values.extend(global_histogram(&equalized, config.global_hist_bins));
    values.extend(quadrant_histograms(&gray, config.quadrant_hist_bins));
    values.extend(lbp_histogram(&gray, config.lbp_bins));
    values.extend(grid_statistics(&gray, config.grid_size));
    values.extend(orientation_histogram(&gray, config.orientation_bins));
    values.extend(gabor_features(&gray));
    values.extend(pixel_tail(&gray, config.pixel_tail_size));
    debug_assert_eq!(values.len(), config.descriptor_len());

    // L2-normalize the complete vector, raw-pixel tail included.
    let norm = values
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt() as f32;
    let denom = norm + NORM_EPSILON;
    for v in &mut values {
        *v /= denom;
    }

    Descriptor { values }
}

pub(crate) fn to_gray(img: &RgbImage) -> GrayImage {
    DynamicImage::ImageRgb8(img.clone()).into_luma8()
}

/// Global histogram equalization.
///
/// A constant image has a degenerate CDF (cdf_min == total) and is returned
/// unchanged.
fn equalize_histogram(gray: &GrayImage) -> GrayImage {
    let mut hist = [0u64; 256];
    for p in gray.as_raw() {
        hist[*p as usize] += 1;
    }

    let total = gray.as_raw().len() as u64;
    let cdf_min = hist
        .iter()
        .copied()
        .find(|&count| count > 0)
        .unwrap_or(0);
    if total == 0 || total == cdf_min {
        return gray.clone();
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u64;
    for (v, count) in hist.iter().enumerate() {
        cdf += count;
        let mapped = (cdf - cdf_min) as f64 / (total - cdf_min) as f64 * 255.0;
        lut[v] = mapped.round() as u8;
    }

    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        image::Luma([lut[gray.get_pixel(x, y)[0] as usize]])
    })
}

/// Intensity histogram over `bins`, normalized by pixel count.
fn global_histogram(gray: &GrayImage, bins: usize) -> Vec<f32> {
    let mut hist = vec![0.0f32; bins];
    for p in gray.as_raw() {
        hist[*p as usize * bins / 256] += 1.0;
    }
    let count = gray.as_raw().len() as f32;
    for bin in &mut hist {
        *bin /= count + NORM_EPSILON;
    }
    hist
}

/// Four quadrant histograms (top-left, top-right, bottom-left, bottom-right),
/// jointly re-normalized so the whole 4 × `bins` block sums to 1.
fn quadrant_histograms(gray: &GrayImage, bins: usize) -> Vec<f32> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let (mid_x, mid_y) = (w / 2, h / 2);
    let pixels = gray.as_raw();

    let mut hist = vec![0.0f32; 4 * bins];
    for y in 0..h {
        for x in 0..w {
            let quadrant = match (x < mid_x, y < mid_y) {
                (true, true) => 0,
                (false, true) => 1,
                (true, false) => 2,
                (false, false) => 3,
            };
            hist[quadrant * bins + pixels[y * w + x] as usize * bins / 256] += 1.0;
        }
    }

    let count = (w * h) as f32;
    for bin in &mut hist {
        *bin /= count + NORM_EPSILON;
    }
    hist
}

/// Local binary pattern histogram.
///
/// Every interior pixel gets an 8-bit code: bit k is set when neighbor k
/// (clockwise from top-left) is at least the center value. Codes are binned
/// over [0, 256) and normalized by the interior pixel count.
fn lbp_histogram(gray: &GrayImage, bins: usize) -> Vec<f32> {
    const NEIGHBORS: [(i64, i64); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
    ];

    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let pixels = gray.as_raw();
    let mut hist = vec![0.0f32; bins];
    if w < 3 || h < 3 {
        return hist;
    }

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = pixels[y * w + x];
            let mut code = 0usize;
            for (k, (dx, dy)) in NEIGHBORS.iter().enumerate() {
                let neighbor =
                    pixels[(y as i64 + dy) as usize * w + (x as i64 + dx) as usize];
                if neighbor >= center {
                    code |= 1 << k;
                }
            }
            hist[code * bins / 256] += 1.0;
        }
    }

    let count = ((w - 2) * (h - 2)) as f32;
    for bin in &mut hist {
        *bin /= count + NORM_EPSILON;
    }
    hist
}

/// Per-cell mean, standard deviation and median over a `grid` × `grid`
/// division of the crop, each scaled to [0, 1].
///
/// Cell bounds come from integer-scaled boundaries, so sizes that do not
/// divide evenly are still covered exactly once.
fn grid_statistics(gray: &GrayImage, grid: usize) -> Vec<f32> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let pixels = gray.as_raw();
    let mut stats = Vec::with_capacity(grid * grid * 3);

    for gy in 0..grid {
        for gx in 0..grid {
            let x0 = gx * w / grid;
            let x1 = ((gx + 1) * w / grid).max(x0 + 1).min(w);
            let y0 = gy * h / grid;
            let y1 = ((gy + 1) * h / grid).max(y0 + 1).min(h);

            let mut cell = Vec::with_capacity((x1 - x0) * (y1 - y0));
            for y in y0..y1 {
                cell.extend_from_slice(&pixels[y * w + x0..y * w + x1]);
            }

            let count = cell.len() as f64;
            let mean = cell.iter().map(|&v| f64::from(v)).sum::<f64>() / count;
            let variance = cell
                .iter()
                .map(|&v| (f64::from(v) - mean).powi(2))
                .sum::<f64>()
                / count;

            cell.sort_unstable();
            let median = if cell.len() % 2 == 1 {
                f64::from(cell[cell.len() / 2])
            } else {
                (f64::from(cell[cell.len() / 2 - 1]) + f64::from(cell[cell.len() / 2])) / 2.0
            };

            stats.push((mean / 255.0) as f32);
            stats.push((variance.sqrt() / 255.0) as f32);
            stats.push((median / 255.0) as f32);
        }
    }
    stats
}

/// Magnitude-weighted gradient orientation histogram over [−π, π].
fn orientation_histogram(gray: &GrayImage, bins: usize) -> Vec<f32> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let pixels = gray.as_raw();
    let mut hist = vec![0.0f32; bins];
    if w < 3 || h < 3 {
        return hist;
    }

    let at = |x: usize, y: usize| f32::from(pixels[y * w + x]);
    let mut total = 0.0f32;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            // 3x3 Sobel derivatives.
            let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));

            let magnitude = (gx * gx + gy * gy).sqrt();
            if magnitude == 0.0 {
                continue;
            }

            let theta = gy.atan2(gx);
            let bin = (((theta + std::f32::consts::PI)
                / (2.0 * std::f32::consts::PI))
                * bins as f32) as usize;
            hist[bin.min(bins - 1)] += magnitude;
            total += magnitude;
        }
    }

    for bin in &mut hist {
        *bin /= total + NORM_EPSILON;
    }
    hist
}

/// Mean absolute response and response std of four oriented Gabor filters.
fn gabor_features(gray: &GrayImage) -> [f32; GABOR_FEATURE_LEN] {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let input: Vec<f32> = gray.as_raw().iter().map(|&v| f32::from(v) / 255.0).collect();

    let mut features = [0.0f32; GABOR_FEATURE_LEN];
    for (i, &orientation) in GABOR_ORIENTATIONS_DEG.iter().enumerate() {
        let kernel = gabor_kernel(orientation.to_radians());

        let mut sum = 0.0f64;
        let mut sum_abs = 0.0f64;
        let mut sum_sq = 0.0f64;
        for y in 0..h {
            for x in 0..w {
                let response = convolve_at(&input, w, h, x as i64, y as i64, &kernel);
                sum += f64::from(response);
                sum_abs += f64::from(response.abs());
                sum_sq += f64::from(response) * f64::from(response);
            }
        }

        let count = (w * h) as f64;
        let mean = sum / count;
        let variance = (sum_sq / count - mean * mean).max(0.0);

        features[i * 2] = (sum_abs / count).clamp(0.0, 1.0) as f32;
        features[i * 2 + 1] = variance.sqrt().clamp(0.0, 1.0) as f32;
    }
    features
}

/// One oriented Gabor kernel, scaled by its absolute coefficient sum.
fn gabor_kernel(theta: f32) -> Vec<f32> {
    let side = (2 * GABOR_RADIUS + 1) as usize;
    let mut kernel = Vec::with_capacity(side * side);
    let (sin, cos) = theta.sin_cos();
    let two_sigma_sq = 2.0 * GABOR_SIGMA * GABOR_SIGMA;
    let gamma_sq = GABOR_ASPECT_RATIO * GABOR_ASPECT_RATIO;

    let mut abs_sum = 0.0f32;
    for dy in -GABOR_RADIUS..=GABOR_RADIUS {
        for dx in -GABOR_RADIUS..=GABOR_RADIUS {
            let x = dx as f32 * cos + dy as f32 * sin;
            let y = -(dx as f32) * sin + dy as f32 * cos;
            let envelope = (-(x * x + gamma_sq * y * y) / two_sigma_sq).exp();
            let carrier = (2.0 * std::f32::consts::PI * x / GABOR_WAVELENGTH).cos();
            let value = envelope * carrier;
            abs_sum += value.abs();
            kernel.push(value);
        }
    }

    for value in &mut kernel {
        *value /= abs_sum + NORM_EPSILON;
    }
    kernel
}

/// Kernel response at one pixel, replicating border pixels.
fn convolve_at(input: &[f32], w: usize, h: usize, cx: i64, cy: i64, kernel: &[f32]) -> f32 {
    let mut response = 0.0f32;
    let mut k = 0;
    for dy in -GABOR_RADIUS..=GABOR_RADIUS {
        let y = (cy + dy).clamp(0, h as i64 - 1) as usize;
        for dx in -GABOR_RADIUS..=GABOR_RADIUS {
            let x = (cx + dx).clamp(0, w as i64 - 1) as usize;
            response += input[y * w + x] * kernel[k];
            k += 1;
        }
    }
    response
}

/// Downsampled grayscale tail, flattened to [0, 1] values.
fn pixel_tail(gray: &GrayImage, size: usize) -> Vec<f32> {
    let small = imageops::resize(gray, size as u32, size as u32, FilterType::Triangle);
    small.as_raw().iter().map(|&v| f32::from(v) / 255.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn pattern(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            let v = 127.5 + 100.0 * (x as f32 * 0.5).sin() * (y as f32 * 0.5).sin();
            let v = v.round().clamp(0.0, 255.0) as u8;
            Rgb([v, v, v])
        })
    }

    fn segment_sum(values: &[f32]) -> f32 {
        values.iter().sum()
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let crop = pattern(200);
        let config = EncoderConfig::default();
        let a = encode(&crop, &config);
        let b = encode(&crop, &config);
        assert_eq!(a.values, b.values, "same pixels must encode bit-identically");
    }

    #[test]
    fn test_descriptor_has_configured_length() {
        let crop = pattern(200);
        let config = EncoderConfig::default();
        assert_eq!(encode(&crop, &config).len(), config.descriptor_len());

        let small = EncoderConfig {
            global_hist_bins: 32,
            quadrant_hist_bins: 16,
            lbp_bins: 32,
            grid_size: 8,
            orientation_bins: 16,
            pixel_tail_size: 10,
        };
        assert_eq!(encode(&crop, &small).len(), small.descriptor_len());
    }

    #[test]
    fn test_descriptor_is_unit_length() {
        let crop = pattern(200);
        let descriptor = encode(&crop, &EncoderConfig::default());
        let norm: f32 = descriptor.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3, "norm = {norm}");
    }

    #[test]
    fn test_all_black_input_is_finite() {
        let crop = RgbImage::from_pixel(200, 200, Rgb([0, 0, 0]));
        let descriptor = encode(&crop, &EncoderConfig::default());
        assert!(
            descriptor.values.iter().all(|v| v.is_finite()),
            "degenerate input must not produce NaN/inf"
        );
    }

    #[test]
    fn test_pixel_tail_is_final_segment() {
        // Uniform input: every tail entry is the same downsampled intensity.
        let crop = RgbImage::from_pixel(200, 200, Rgb([128, 128, 128]));
        let config = EncoderConfig::default();
        let descriptor = encode(&crop, &config);
        let tail = &descriptor.values[descriptor.len() - config.pixel_tail_len()..];
        assert_eq!(tail.len(), 400);
        assert!(tail.iter().all(|&v| v > 0.0));
        assert!(tail.iter().all(|&v| (v - tail[0]).abs() < 1e-6));
    }

    #[test]
    fn test_quadrant_segment_sums_to_one() {
        let gray = to_gray(&pattern(200));
        let hist = quadrant_histograms(&gray, 32);
        assert_eq!(hist.len(), 128);
        assert!((segment_sum(&hist) - 1.0).abs() < 1e-3, "sum = {}", segment_sum(&hist));
    }

    #[test]
    fn test_global_and_lbp_histograms_sum_to_one() {
        let gray = to_gray(&pattern(200));
        assert!((segment_sum(&global_histogram(&gray, 64)) - 1.0).abs() < 1e-3);
        assert!((segment_sum(&lbp_histogram(&gray, 64)) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_equalization_leaves_constant_image_unchanged() {
        let gray = GrayImage::from_pixel(50, 50, Luma([77]));
        let equalized = equalize_histogram(&gray);
        assert_eq!(equalized.as_raw(), gray.as_raw());
    }

    #[test]
    fn test_equalization_spreads_low_contrast_input() {
        let gray = GrayImage::from_fn(100, 100, |x, _| Luma([100 + (x % 40) as u8]));
        let equalized = equalize_histogram(&gray);
        let min = equalized.as_raw().iter().min().copied().unwrap();
        let max = equalized.as_raw().iter().max().copied().unwrap();
        assert_eq!(min, 0);
        assert_eq!(max, 255);
    }

    #[test]
    fn test_grid_statistics_of_uniform_image() {
        let gray = GrayImage::from_pixel(200, 200, Luma([102]));
        let stats = grid_statistics(&gray, 16);
        assert_eq!(stats.len(), 768);
        let expected = 102.0 / 255.0;
        for cell in stats.chunks(3) {
            assert!((cell[0] - expected).abs() < 1e-6, "mean off: {}", cell[0]);
            assert!(cell[1].abs() < 1e-6, "std of uniform cell must be 0");
            assert!((cell[2] - expected).abs() < 1e-6, "median off: {}", cell[2]);
        }
    }

    #[test]
    fn test_orientation_histogram_of_vertical_edges() {
        // Vertical stripes: gradients point along ±x, so the histogram mass
        // concentrates near theta = 0 and theta = ±pi.
        let gray = GrayImage::from_fn(100, 100, |x, _| {
            if (x / 10) % 2 == 0 { Luma([255]) } else { Luma([0]) }
        });
        let hist = orientation_histogram(&gray, 32);
        assert!((segment_sum(&hist) - 1.0).abs() < 1e-3);

        // theta = 0 falls in bin 16; theta = ±pi in bins 0 and 31.
        let horizontal_mass = hist[16] + hist[0] + hist[31];
        assert!(horizontal_mass > 0.9, "horizontal mass = {horizontal_mass}");
    }

    #[test]
    fn test_gabor_features_stay_in_unit_range() {
        let gray = to_gray(&pattern(100));
        let features = gabor_features(&gray);
        assert!(features.iter().all(|&f| (0.0..=1.0).contains(&f)), "{features:?}");
    }

    #[test]
    fn test_gabor_responds_more_to_texture_than_flat() {
        let textured = to_gray(&pattern(100));
        let flat = GrayImage::from_pixel(100, 100, Luma([128]));
        let textured_mean = gabor_features(&textured)[0];
        let flat_std = gabor_features(&flat)[1];
        assert!(flat_std.abs() < 1e-6, "flat input has no response variance");
        assert!(textured_mean > 0.0);
    }

    #[test]
    fn test_lbp_of_tiny_image_is_empty_histogram() {
        let gray = GrayImage::from_pixel(2, 2, Luma([10]));
        assert!(lbp_histogram(&gray, 64).iter().all(|&v| v == 0.0));
    }
}
