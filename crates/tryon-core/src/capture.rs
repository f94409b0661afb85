//! Still capture: flatten a video frame and the overlay into one exportable image.

use crate::overlay::{blend, OverlaySurface};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use thiserror::Error;

/// JPEG quality used for exported captures.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

const FALLBACK_NAME: &str = "jewelry";

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// A flattened capture, owned by the caller once produced.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub image: RgbaImage,
    pub filename: String,
}

impl CaptureResult {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encode as JPEG (alpha dropped).
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, CaptureError> {
        let rgb = DynamicImage::ImageRgba8(self.image.clone()).to_rgb8();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
        Ok(out)
    }
}

/// Composite the overlay over an RGBA frame in natural (un-mirrored) orientation.
///
/// An overlay whose size does not match the frame has never been rendered for
/// it, so the frame is returned as-is.
pub fn flatten(
    frame: &[u8],
    width: u32,
    height: u32,
    overlay: &OverlaySurface,
    product_name: &str,
) -> Result<CaptureResult, CaptureError> {
    let expected = width as usize * height as usize * 4;
    if frame.len() < expected {
        return Err(CaptureError::InvalidFrame { expected, actual: frame.len() });
    }
    let mut image = RgbaImage::from_raw(width, height, frame[..expected].to_vec())
        .ok_or(CaptureError::InvalidFrame { expected, actual: frame.len() })?;

    if overlay.width() == width && overlay.height() == height {
        for (dst, src) in image.pixels_mut().zip(overlay.image().pixels()) {
            if src[3] == 0 {
                continue;
            }
            let a = src[3] as f32 / 255.0;
            blend(
                dst,
                [src[0] as f32 * a, src[1] as f32 * a, src[2] as f32 * a, a],
                1.0,
            );
        }
    } else {
        tracing::debug!(
            frame_width = width,
            frame_height = height,
            overlay_width = overlay.width(),
            overlay_height = overlay.height(),
            "overlay not aligned with frame, capturing raw frame"
        );
    }

    Ok(CaptureResult { image, filename: capture_filename(product_name) })
}

/// `"{name}-virtual-try-on.jpg"` with path-hostile characters replaced.
pub fn capture_filename(product_name: &str) -> String {
    let trimmed = product_name.trim();
    let base = if trimmed.is_empty() { FALLBACK_NAME } else { trimmed };
    let safe: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '-' })
        .collect();
    format!("{safe}-virtual-try-on.jpg")
}
