//! Deterministic "soft" enhancement of sample photographs.
//!
//! Pipeline, in this order:
//! 1. sRGB → CIE L\*a\*b\* (D65)
//! 2. Contrast-limited adaptive histogram equalization on L\* only
//! 3. L\*a\*b\* → sRGB
//! 4. 3×3 sharpening kernel (edge-replicated borders)
//!
//! Equalizing before sharpening matters: sharpening first would amplify noise that
//! the equalizer then stretches further.

use crate::config::EnhanceConfig;
use image::{Rgb, RgbImage};

const HIST_BINS: usize = 256;

/// Enhancement parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnhanceParams {
    /// CLAHE clip limit (relative to a uniform histogram)
    pub clip_limit: f32,
    /// Tiles per axis
    pub tile_grid: u32,
    /// Kernel centre weight
    pub sharpen_center: f32,
    /// Weight of the four edge neighbours (corners are 0)
    pub sharpen_edge: f32,
}

impl Default for EnhanceParams {
    fn default() -> Self {
        Self {
            clip_limit: 1.5,
            tile_grid: 8,
            sharpen_center: 1.8,
            sharpen_edge: -0.2,
        }
    }
}

impl From<&EnhanceConfig> for EnhanceParams {
    fn from(config: &EnhanceConfig) -> Self {
        Self {
            clip_limit: config.clip_limit,
            tile_grid: config.tile_grid,
            sharpen_center: config.sharpen_center,
            sharpen_edge: config.sharpen_edge,
        }
    }
}

/// Run the full enhancement pipeline. Output has the input's dimensions.
pub fn enhance(frame: &RgbImage, params: &EnhanceParams) -> RgbImage {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return frame.clone();
    }

    let linear = srgb_to_linear_lut();
    let lab: Vec<[f32; 3]> = frame.pixels().map(|p| rgb_to_lab(p.0, &linear)).collect();

    let lightness: Vec<u8> = lab
        .iter()
        .map(|px| (px[0] * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8)
        .collect();
    let equalized = clahe(&lightness, width, height, params.clip_limit, params.tile_grid);

    let mut contrast = RgbImage::new(width, height);
    for ((out, px), l) in contrast.pixels_mut().zip(&lab).zip(&equalized) {
        *out = Rgb(lab_to_rgb([*l as f32 * 100.0 / 255.0, px[1], px[2]]));
    }

    sharpen(&contrast, params.sharpen_center, params.sharpen_edge)
}

// -----------------------------------------------------------------------------
// Colour conversion
// -----------------------------------------------------------------------------

const XN: f32 = 0.950_456;
const ZN: f32 = 1.088_754;
const LAB_EPSILON: f32 = 0.008_856;
const LAB_KAPPA: f32 = 903.3;

fn srgb_to_linear_lut() -> [f32; 256] {
    let mut lut = [0.0f32; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        let c = i as f32 / 255.0;
        *v = if c <= 0.040_45 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        };
    }
    lut
}

fn linear_to_srgb(c: f32) -> u8 {
    let c = c.clamp(0.0, 1.0);
    let v = if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

fn lab_f(t: f32) -> f32 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(f: f32) -> f32 {
    let cube = f * f * f;
    if cube > LAB_EPSILON {
        cube
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

fn rgb_to_lab(rgb: [u8; 3], linear: &[f32; 256]) -> [f32; 3] {
    let r = linear[rgb[0] as usize];
    let g = linear[rgb[1] as usize];
    let b = linear[rgb[2] as usize];

    let x = (0.412_453 * r + 0.357_580 * g + 0.180_423 * b) / XN;
    let y = 0.212_671 * r + 0.715_160 * g + 0.072_169 * b;
    let z = (0.019_334 * r + 0.119_193 * g + 0.950_227 * b) / ZN;

    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    let l = if y > LAB_EPSILON {
        116.0 * fy - 16.0
    } else {
        LAB_KAPPA * y
    };
    [l, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

fn lab_to_rgb(lab: [f32; 3]) -> [u8; 3] {
    let [l, a, b] = lab;
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let y = if l > LAB_KAPPA * LAB_EPSILON {
        fy * fy * fy
    } else {
        l / LAB_KAPPA
    };
    let x = lab_f_inv(fx) * XN;
    let z = lab_f_inv(fz) * ZN;

    let r = 3.240_479 * x - 1.537_150 * y - 0.498_535 * z;
    let g = -0.969_256 * x + 1.875_992 * y + 0.041_556 * z;
    let b = 0.055_648 * x - 0.204_043 * y + 1.057_311 * z;
    [linear_to_srgb(r), linear_to_srgb(g), linear_to_srgb(b)]
}

// -----------------------------------------------------------------------------
// CLAHE
// -----------------------------------------------------------------------------

/// Contrast-limited adaptive histogram equalization of an 8-bit plane.
///
/// The plane is split into `grid × grid` tiles (fewer if the image is smaller
/// than the grid). Tiles that overhang the image sample it with reflect-101
/// borders. Each tile's histogram is clipped at
/// `max(1, clip_limit * tile_area / 256)`, the excess is spread evenly, and
/// pixels are mapped by bilinear interpolation between the four nearest tile
/// mappings.
pub fn clahe(src: &[u8], width: u32, height: u32, clip_limit: f32, grid: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 || src.len() != w * h {
        return src.to_vec();
    }

    let tiles_x = (grid as usize).clamp(1, w);
    let tiles_y = (grid as usize).clamp(1, h);
    let tile_w = w.div_ceil(tiles_x);
    let tile_h = h.div_ceil(tiles_y);
    let tile_area = tile_w * tile_h;

    let clip = if clip_limit > 0.0 {
        ((clip_limit * tile_area as f32 / HIST_BINS as f32) as usize).max(1)
    } else {
        usize::MAX
    };
    let lut_scale = 255.0 / tile_area as f32;

    let mut luts = vec![[0u8; HIST_BINS]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let mut hist = [0usize; HIST_BINS];
            for y in ty * tile_h..(ty + 1) * tile_h {
                let row = reflect_101(y, h) * w;
                for x in tx * tile_w..(tx + 1) * tile_w {
                    hist[src[row + reflect_101(x, w)] as usize] += 1;
                }
            }
            clip_histogram(&mut hist, clip);

            let lut = &mut luts[ty * tiles_x + tx];
            let mut sum = 0usize;
            for (bin, count) in hist.iter().enumerate() {
                sum += count;
                lut[bin] = (sum as f32 * lut_scale).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    let inv_tw = 1.0 / tile_w as f32;
    let inv_th = 1.0 / tile_h as f32;
    let mut out = vec![0u8; w * h];

    for y in 0..h {
        let tyf = y as f32 * inv_th - 0.5;
        let ty1 = tyf.floor() as isize;
        let ya = tyf - ty1 as f32;
        let ty2 = ((ty1 + 1) as usize).min(tiles_y - 1);
        let ty1 = ty1.max(0) as usize;

        for x in 0..w {
            let txf = x as f32 * inv_tw - 0.5;
            let tx1 = txf.floor() as isize;
            let xa = txf - tx1 as f32;
            let tx2 = ((tx1 + 1) as usize).min(tiles_x - 1);
            let tx1 = tx1.max(0) as usize;

            let v = src[y * w + x] as usize;
            let top = luts[ty1 * tiles_x + tx1][v] as f32 * (1.0 - xa)
                + luts[ty1 * tiles_x + tx2][v] as f32 * xa;
            let bottom = luts[ty2 * tiles_x + tx1][v] as f32 * (1.0 - xa)
                + luts[ty2 * tiles_x + tx2][v] as f32 * xa;
            out[y * w + x] = (top * (1.0 - ya) + bottom * ya).round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Mirror an out-of-range index back into `0..len` without repeating the edge.
fn reflect_101(i: usize, len: usize) -> usize {
    if i < len || len == 1 {
        i.min(len - 1)
    } else {
        (2 * (len - 1)).saturating_sub(i)
    }
}

fn clip_histogram(hist: &mut [usize; HIST_BINS], clip: usize) {
    let mut clipped = 0usize;
    for count in hist.iter_mut() {
        if *count > clip {
            clipped += *count - clip;
            *count = clip;
        }
    }

    let batch = clipped / HIST_BINS;
    let mut residual = clipped - batch * HIST_BINS;
    for count in hist.iter_mut() {
        *count += batch;
    }

    if residual > 0 {
        let step = (HIST_BINS / residual).max(1);
        let mut bin = 0;
        while bin < HIST_BINS && residual > 0 {
            hist[bin] += 1;
            residual -= 1;
            bin += step;
        }
    }
}

// -----------------------------------------------------------------------------
// Sharpening
// -----------------------------------------------------------------------------

/// Convolve each channel with
/// ```text
/// [ 0     edge    0    ]
/// [ edge  center  edge ]
/// [ 0     edge    0    ]
/// ```
/// replicating edge pixels at the border.
pub fn sharpen(src: &RgbImage, center: f32, edge: f32) -> RgbImage {
    let (width, height) = src.dimensions();
    let (max_x, max_y) = (width.saturating_sub(1), height.saturating_sub(1));

    RgbImage::from_fn(width, height, |x, y| {
        let c = src.get_pixel(x, y).0;
        let l = src.get_pixel(x.saturating_sub(1), y).0;
        let r = src.get_pixel((x + 1).min(max_x), y).0;
        let u = src.get_pixel(x, y.saturating_sub(1)).0;
        let d = src.get_pixel(x, (y + 1).min(max_y)).0;

        let mut px = [0u8; 3];
        for ch in 0..3 {
            let neighbours = l[ch] as f32 + r[ch] as f32 + u[ch] as f32 + d[ch] as f32;
            let v = center * c[ch] as f32 + edge * neighbours;
            px[ch] = v.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(px)
    })
}
