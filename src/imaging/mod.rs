//! Image acquisition and processing.
//!
//! - [`capture`]: warm-up aware frame acquisition ([`CaptureService`])
//! - [`enhance`]: deterministic CLAHE + sharpen pipeline
//!
//! Everything here except the acquisition itself is a pure function of its inputs.

pub mod capture;
pub mod enhance;

pub use capture::{CaptureResult, CaptureService};
pub use enhance::{enhance, EnhanceParams};

use image::RgbImage;

/// Fixed crop rectangle in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Crop `frame` to `rect`, clamped to the frame bounds.
///
/// If the clamped rectangle is empty the frame is returned unchanged.
pub fn crop(frame: RgbImage, rect: &CropRect) -> RgbImage {
    let (w, h) = frame.dimensions();
    let x2 = rect.x.saturating_add(rect.width).min(w);
    let y2 = rect.y.saturating_add(rect.height).min(h);

    if rect.x >= x2 || rect.y >= y2 {
        tracing::warn!(?rect, width = w, height = h, "Crop region outside frame, keeping full frame");
        return frame;
    }

    image::imageops::crop_imm(&frame, rect.x, rect.y, x2 - rect.x, y2 - rect.y).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn numbered(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 0]))
    }

    #[test]
    fn crop_inside_bounds() {
        let rect = CropRect { x: 10, y: 5, width: 20, height: 8 };
        let out = crop(numbered(64, 32), &rect);
        assert_eq!(out.dimensions(), (20, 8));
        assert_eq!(out.get_pixel(0, 0).0, [10, 5, 0]);
    }

    #[test]
    fn crop_is_clamped_to_frame() {
        let rect = CropRect { x: 50, y: 20, width: 100, height: 100 };
        let out = crop(numbered(64, 32), &rect);
        assert_eq!(out.dimensions(), (14, 12));
    }

    #[test]
    fn crop_outside_frame_keeps_original() {
        let frame = numbered(64, 32);
        let rect = CropRect { x: 640, y: 360, width: 2048, height: 1344 };
        assert_eq!(crop(frame.clone(), &rect), frame);

        let zero = CropRect { x: 0, y: 0, width: 0, height: 10 };
        assert_eq!(crop(frame.clone(), &zero), frame);
    }
}
