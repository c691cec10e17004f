//! Deterministic augmentation of a single face crop.
//!
//! One enrollment capture is expanded into seven weakly-correlated variants
//! (lighting, small rotations, contrast, mild blur), so the averaged template
//! behaves as if the user had re-captured under several real conditions.
//! The sequence is ordered, finite and fully deterministic.

use image::imageops;
use image::{Rgb, RgbImage};

/// Number of variants produced per crop, the original included.
pub const AUGMENTATION_COUNT: usize = 7;

const BRIGHTEN_SCALE: f32 = 1.2;
const BRIGHTEN_OFFSET: f32 = 10.0;
const DARKEN_SCALE: f32 = 0.8;
const DARKEN_OFFSET: f32 = -10.0;
const ROTATION_DEGREES: f32 = 3.0;
const BLUR_SIGMA: f32 = 1.0;
const CLAHE_TILES: usize = 8;
const CLAHE_CLIP_LIMIT: f64 = 2.0;

/// Produce the augmentation sequence for one canonical crop.
///
/// Yields exactly [`AUGMENTATION_COUNT`] variants, each with the input's
/// dimensions: original, brightened, darkened, rotated ±3°, locally
/// contrast-equalized, mildly blurred. Variants are computed lazily as the
/// iterator advances; it cannot be restarted.
pub fn augment(crop: &RgbImage) -> Augmentations<'_> {
    Augmentations { source: crop, index: 0 }
}

/// See [`augment`].
pub struct Augmentations<'a> {
    source: &'a RgbImage,
    index: usize,
}

impl Iterator for Augmentations<'_> {
    type Item = RgbImage;

    fn next(&mut self) -> Option<RgbImage> {
        let variant = match self.index {
            0 => self.source.clone(),
            1 => adjust_brightness(self.source, BRIGHTEN_SCALE, BRIGHTEN_OFFSET),
            2 => adjust_brightness(self.source, DARKEN_SCALE, DARKEN_OFFSET),
            3 => rotate_about_center(self.source, ROTATION_DEGREES),
            4 => rotate_about_center(self.source, -ROTATION_DEGREES),
            5 => equalize_local_contrast(self.source),
            6 => imageops::blur(self.source, BLUR_SIGMA),
            _ => return None,
        };
        self.index += 1;
        Some(variant)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = AUGMENTATION_COUNT - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Augmentations<'_> {}

/// Per-channel linear adjustment: `v' = v * scale + offset`, clamped to [0, 255].
fn adjust_brightness(img: &RgbImage, scale: f32, offset: f32) -> RgbImage {
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        Rgb([
            scale_channel(p[0], scale, offset),
            scale_channel(p[1], scale, offset),
            scale_channel(p[2], scale, offset),
        ])
    })
}

fn scale_channel(v: u8, scale: f32, offset: f32) -> u8 {
    (f32::from(v) * scale + offset).round().clamp(0.0, 255.0) as u8
}

/// Rotate around the crop center with bilinear sampling.
///
/// Out-of-bounds reads replicate the nearest border pixel so rotation never
/// introduces black corners into the descriptor.
fn rotate_about_center(img: &RgbImage, degrees: f32) -> RgbImage {
    let (w, h) = (img.width(), img.height());
    let cx = (w as f32 - 1.0) / 2.0;
    let cy = (h as f32 - 1.0) / 2.0;
    let (sin, cos) = degrees.to_radians().sin_cos();

    RgbImage::from_fn(w, h, |x, y| {
        // Inverse mapping: where in the source does this output pixel come from?
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = cos * dx + sin * dy + cx;
        let sy = -sin * dx + cos * dy + cy;
        sample_bilinear_replicate(img, sx, sy)
    })
}

fn sample_bilinear_replicate(img: &RgbImage, sx: f32, sy: f32) -> Rgb<u8> {
    let max_x = img.width() as i64 - 1;
    let max_y = img.height() as i64 - 1;

    let x0 = (sx.floor() as i64).clamp(0, max_x);
    let y0 = (sy.floor() as i64).clamp(0, max_y);
    let x1 = (x0 + 1).min(max_x);
    let y1 = (y0 + 1).min(max_y);
    let fx = (sx - sx.floor()).clamp(0.0, 1.0);
    let fy = (sy - sy.floor()).clamp(0.0, 1.0);

    let at = |x: i64, y: i64| *img.get_pixel(x as u32, y as u32);
    let (tl, tr, bl, br) = (at(x0, y0), at(x1, y0), at(x0, y1), at(x1, y1));

    let mut out = [0u8; 3];
    for c in 0..3 {
        let val = f32::from(tl[c]) * (1.0 - fx) * (1.0 - fy)
            + f32::from(tr[c]) * fx * (1.0 - fy)
            + f32::from(bl[c]) * (1.0 - fx) * fy
            + f32::from(br[c]) * fx * fy;
        out[c] = val.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Contrast-limited adaptive histogram equalization on the luma channel.
///
/// The crop is divided into an 8×8 tile grid; each tile gets a clipped,
/// redistributed equalization LUT, and every pixel's luma is remapped by
/// bilinear interpolation between the four nearest tile LUTs. Chroma is
/// carried through a BT.601 YCbCr round-trip.
fn equalize_local_contrast(img: &RgbImage) -> RgbImage {
    let (w, h) = (img.width() as usize, img.height() as usize);

    let luma: Vec<u8> = img
        .pixels()
        .map(|p| luma601(p[0], p[1], p[2]).round().clamp(0.0, 255.0) as u8)
        .collect();

    // One LUT per tile, tile bounds from integer-scaled boundaries.
    let mut luts = Vec::with_capacity(CLAHE_TILES * CLAHE_TILES);
    for ty in 0..CLAHE_TILES {
        for tx in 0..CLAHE_TILES {
            let x0 = tx * w / CLAHE_TILES;
            let x1 = (tx + 1) * w / CLAHE_TILES;
            let y0 = ty * h / CLAHE_TILES;
            let y1 = (ty + 1) * h / CLAHE_TILES;
            luts.push(tile_lut(&luma, w, (x0, x1), (y0, y1)));
        }
    }

    let tile_w = w as f32 / CLAHE_TILES as f32;
    let tile_h = h as f32 / CLAHE_TILES as f32;
    let last = (CLAHE_TILES - 1) as f32;

    RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let old = luma[y as usize * w + x as usize];

        // Continuous tile coordinates relative to tile centers.
        let gx = ((x as f32 + 0.5) / tile_w - 0.5).clamp(0.0, last);
        let gy = ((y as f32 + 0.5) / tile_h - 0.5).clamp(0.0, last);
        let tx0 = gx.floor() as usize;
        let ty0 = gy.floor() as usize;
        let tx1 = (tx0 + 1).min(CLAHE_TILES - 1);
        let ty1 = (ty0 + 1).min(CLAHE_TILES - 1);
        let fx = gx - tx0 as f32;
        let fy = gy - ty0 as f32;

        let lut = |tx: usize, ty: usize| f32::from(luts[ty * CLAHE_TILES + tx][old as usize]);
        let new = lut(tx0, ty0) * (1.0 - fx) * (1.0 - fy)
            + lut(tx1, ty0) * fx * (1.0 - fy)
            + lut(tx0, ty1) * (1.0 - fx) * fy
            + lut(tx1, ty1) * fx * fy;

        let p = img.get_pixel(x, y);
        recombine_ycbcr(p[0], p[1], p[2], new)
    })
}

/// Clipped equalization LUT for one tile.
fn tile_lut(luma: &[u8], w: usize, (x0, x1): (usize, usize), (y0, y1): (usize, usize)) -> [u8; 256] {
    let mut hist = [0.0f64; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[luma[y * w + x] as usize] += 1.0;
        }
    }

    let count = ((x1 - x0) * (y1 - y0)) as f64;
    let limit = (CLAHE_CLIP_LIMIT * count / 256.0).max(1.0);

    // Clip peaks and hand the excess back evenly across all bins.
    let mut excess = 0.0;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let bonus = excess / 256.0;
    for bin in hist.iter_mut() {
        *bin += bonus;
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0.0;
    for (v, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[v] = (cdf / count * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

fn luma601(r: u8, g: u8, b: u8) -> f32 {
    0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)
}

/// Rebuild an RGB pixel keeping the original chroma but a replacement luma.
fn recombine_ycbcr(r: u8, g: u8, b: u8, new_y: f32) -> Rgb<u8> {
    let (rf, gf, bf) = (f32::from(r), f32::from(g), f32::from(b));
    let cb = 128.0 - 0.168_736 * rf - 0.331_264 * gf + 0.5 * bf;
    let cr = 128.0 + 0.5 * rf - 0.418_688 * gf - 0.081_312 * bf;

    let nr = new_y + 1.402 * (cr - 128.0);
    let ng = new_y - 0.344_136 * (cb - 128.0) - 0.714_136 * (cr - 128.0);
    let nb = new_y + 1.772 * (cb - 128.0);
    Rgb([
        nr.round().clamp(0.0, 255.0) as u8,
        ng.round().clamp(0.0, 255.0) as u8,
        nb.round().clamp(0.0, 255.0) as u8,
    ])
}
