//! Video frame type and pixel-format conversion to RGBA.

use std::sync::Arc;
use std::time::Instant;

/// An immutable RGBA frame sampled from the live stream.
///
/// Pixel data is shared, so cloning a frame to hold it as "current" is cheap.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    timestamp: Instant,
    sequence: u32,
}

impl VideoFrame {
    /// Wrap an RGBA buffer of exactly `width * height * 4` bytes.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(FrameError::InvalidLength { expected, actual: data.len() });
        }
        Ok(Self {
            data: data.into(),
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Driver sequence number; increases in display order.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

/// Convert packed YUYV (4:2:2) to RGBA using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgba(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgba.extend_from_slice(&yuv_to_rgba(y0, u, v));
        rgba.extend_from_slice(&yuv_to_rgba(y1, u, v));
    }
    Ok(rgba)
}

fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let r = c + 1.596 * e;
    let g = c - 0.392 * d - 0.813 * e;
    let b = c + 2.017 * d;
    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
        255,
    ]
}

/// Decode a Motion-JPEG buffer to RGBA, checking it matches the negotiated size.
pub fn mjpeg_to_rgba(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let img = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .to_rgba8();
    if img.width() != width || img.height() != height {
        return Err(FrameError::SizeMismatch {
            expected: (width, height),
            actual: (img.width(), img.height()),
        });
    }
    Ok(img.into_raw())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPG decode failed: {0}")]
    Decode(String),
    #[error("decoded frame is {actual:?}, expected {expected:?}")]
    SizeMismatch { expected: (u32, u32), actual: (u32, u32) },
}
