//! Camera acquisition: source traits and the V4L2 implementation.

use crate::frame::{self, VideoFrame};
use serde::Serialize;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Device-name fragments that suggest a user-facing camera.
const FRONT_FACING_HINTS: [&str; 5] = ["front", "user", "integrated", "facetime", "webcam"];

/// One buffer held by us, one with the driver. With more, a slow tick reads
/// frames the driver queued earlier instead of the newest; with two the lag
/// is at most one frame and the driver drops the rest.
const STREAM_BUFFERS: u32 = 2;

/// Longest a frame read may block before the tick gives up.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("no camera available")]
    NoDevice,
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("no frame within {0:?}")]
    FrameTimeout(Duration),
    #[error("camera already released")]
    Released,
}

/// Which way the camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    #[default]
    User,
    Environment,
    Any,
}

/// What the session asks for when it acquires a camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraRequest {
    /// Explicit device path; picked automatically when `None`.
    pub device: Option<String>,
    pub facing: Facing,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraRequest {
    fn default() -> Self {
        Self {
            device: None,
            facing: Facing::User,
            width: 640,
            height: 480,
        }
    }
}

/// Readiness events a source reports once its stream starts flowing.
///
/// All of them are equally valid triggers for the readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadySignal {
    MetadataLoaded,
    CanPlay,
    DataLoaded,
}

/// A live video stream owned by exactly one session.
pub trait VideoSource {
    /// Native pixel dimensions; `(0, 0)` until the stream knows them.
    fn dimensions(&self) -> (u32, u32);

    /// The newest frame the source holds, or `None` if none arrived in time.
    ///
    /// Sources drop frames they cannot deliver; they never queue a backlog.
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError>;

    /// Readiness events raised since the last call.
    fn drain_signals(&mut self) -> Vec<ReadySignal> {
        Vec::new()
    }

    /// Stop the stream and free the device. Must be idempotent.
    fn release(&mut self);

    fn is_released(&self) -> bool;
}

/// Grants access to a camera.
pub trait CameraProvider: Send {
    fn acquire(&mut self, request: &CameraRequest) -> Result<Box<dyn VideoSource>, CameraError>;
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpg,
}

/// Provider backed by V4L2 devices.
#[derive(Debug, Default)]
pub struct V4lProvider;

impl CameraProvider for V4lProvider {
    fn acquire(&mut self, request: &CameraRequest) -> Result<Box<dyn VideoSource>, CameraError> {
        let path = match &request.device {
            Some(p) => p.clone(),
            None => pick_device(&Camera::list_devices(), request.facing)
                .map(|d| d.path.clone())
                .ok_or(CameraError::NoDevice)?,
        };
        Ok(Box::new(Camera::open(&path, request)?))
    }
}

/// V4L2 camera with a running mmap stream.
pub struct Camera {
    stream: Option<MmapStream<'static>>,
    device: Option<Device>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    signals: Vec<ReadySignal>,
    delivered_first: bool,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and start streaming.
    pub fn open(device_path: &str, request: &CameraRequest) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            facing = ?request.facing,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let (negotiated, pixel_format) = negotiate(&device, request.width, request.height)?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        let stream = start_stream(&device)?;

        Ok(Self {
            stream: Some(stream),
            device: Some(device),
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
            signals: vec![ReadySignal::MetadataLoaded],
            delivered_first: false,
        })
    }

    /// Convert a raw buffer to RGBA based on the negotiated format.
    fn buf_to_rgba(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgba(buf, self.width, self.height),
            PixelFormat::Mjpg => frame::mjpeg_to_rgba(buf, self.width, self.height),
        }
        .map_err(|e| CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format)))
    }

    /// Replace a stream whose last dequeue timed out.
    ///
    /// A timed-out `next()` has already requeued the held buffer, so the old
    /// stream would fail on the next queue. Dropping it issues STREAMOFF and
    /// hands every buffer back before a fresh stream is mapped.
    fn restart_stream(&mut self) -> Result<(), CameraError> {
        self.stream.take();
        let device = self.device.as_ref().ok_or(CameraError::Released)?;
        self.stream = Some(start_stream(device)?);
        Ok(())
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl VideoSource for Camera {
    fn dimensions(&self) -> (u32, u32) {
        if self.stream.is_some() {
            (self.width, self.height)
        } else {
            (0, 0)
        }
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        let stream = self.stream.as_mut().ok_or(CameraError::Released)?;
        let (buf, sequence) = match stream.next() {
            Ok((buf, meta)) => (buf.to_vec(), meta.sequence),
            Err(e) => {
                let err = dequeue_error(e)?;
                tracing::warn!(device = %self.device_path, error = %err, "no frame in time; restarting stream");
                self.restart_stream()?;
                return Ok(None);
            }
        };

        let rgba = self.buf_to_rgba(&buf)?;
        let frame = VideoFrame::new(rgba, self.width, self.height, sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;

        if !self.delivered_first {
            self.delivered_first = true;
            self.signals.push(ReadySignal::DataLoaded);
            self.signals.push(ReadySignal::CanPlay);
        }
        Ok(Some(frame))
    }

    fn drain_signals(&mut self) -> Vec<ReadySignal> {
        std::mem::take(&mut self.signals)
    }

    fn release(&mut self) {
        // Stream first: dropping it issues STREAMOFF before the fd closes.
        let had_stream = self.stream.take().is_some();
        self.device.take();
        if had_stream {
            tracing::info!(device = %self.device_path, "camera released");
        }
    }

    fn is_released(&self) -> bool {
        self.stream.is_none() && self.device.is_none()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Request YUYV at the target size; fall back to MJPG if the driver refuses.
fn negotiate(
    device: &Device,
    width: u32,
    height: u32,
) -> Result<(v4l::Format, PixelFormat), CameraError> {
    let mut fmt = device.format().map_err(|e| {
        CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
    })?;

    for (fourcc, pixel_format) in [(b"YUYV", PixelFormat::Yuyv), (b"MJPG", PixelFormat::Mjpg)] {
        fmt.fourcc = FourCC::new(fourcc);
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;
        if negotiated.fourcc == FourCC::new(fourcc) {
            return Ok((negotiated, pixel_format));
        }
        tracing::debug!(requested = ?FourCC::new(fourcc), got = ?negotiated.fourcc, "format refused");
    }

    Err(CameraError::FormatNegotiationFailed(
        "unsupported pixel format (need YUYV or MJPG)".to_string(),
    ))
}

fn start_stream(device: &Device) -> Result<MmapStream<'static>, CameraError> {
    let mut stream = MmapStream::with_buffers(device, BufType::VideoCapture, STREAM_BUFFERS)
        .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
    stream.set_timeout(DEQUEUE_TIMEOUT);
    Ok(stream)
}

/// Sort a failed dequeue: `Ok` holds a recoverable timeout, `Err` a failed read.
fn dequeue_error(e: io::Error) -> Result<CameraError, CameraError> {
    if e.kind() == io::ErrorKind::TimedOut {
        Ok(CameraError::FrameTimeout(DEQUEUE_TIMEOUT))
    } else {
        Err(CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))
    }
}

fn open_error(device_path: &str, e: io::Error) -> CameraError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        CameraError::PermissionDenied(device_path.to_string())
    } else if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
        CameraError::DeviceBusy
    } else {
        CameraError::DeviceNotFound(format!("{device_path}: {e}"))
    }
}

/// Choose a capture device, preferring names that look user-facing when asked to.
pub fn pick_device(devices: &[DeviceInfo], facing: Facing) -> Option<&DeviceInfo> {
    if facing == Facing::User {
        let front = devices.iter().find(|d| {
            let name = d.name.to_lowercase();
            FRONT_FACING_HINTS.iter().any(|h| name.contains(h))
        });
        if front.is_some() {
            return front;
        }
    }
    devices.first()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(path: &str, name: &str) -> DeviceInfo {
        DeviceInfo {
            path: path.into(),
            name: name.into(),
            driver: "uvcvideo".into(),
            bus: "usb".into(),
        }
    }

    #[test]
    fn test_pick_device_prefers_front_facing() {
        let devices = vec![dev("/dev/video0", "USB Capture HDMI"), dev("/dev/video2", "Integrated Camera")];
        assert_eq!(pick_device(&devices, Facing::User).unwrap().path, "/dev/video2");
        assert_eq!(pick_device(&devices, Facing::Any).unwrap().path, "/dev/video0");
    }

    #[test]
    fn test_pick_device_falls_back_to_first() {
        let devices = vec![dev("/dev/video4", "Capture Card")];
        assert_eq!(pick_device(&devices, Facing::User).unwrap().path, "/dev/video4");
        assert!(pick_device(&[], Facing::User).is_none());
    }

    #[test]
    fn test_open_missing_device() {
        let result = Camera::open("/dev/video-does-not-exist", &CameraRequest::default());
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
    }

    #[test]
    fn test_open_error_mapping() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(open_error("/dev/video0", denied), CameraError::PermissionDenied(_)));
        let busy = io::Error::new(io::ErrorKind::Other, "Device or resource busy");
        assert!(matches!(open_error("/dev/video0", busy), CameraError::DeviceBusy));
    }

    #[test]
    fn test_dequeue_timeout_is_recoverable() {
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "VIDIOC_DQBUF");
        assert!(matches!(dequeue_error(timeout), Ok(CameraError::FrameTimeout(_))));
        let gone = io::Error::new(io::ErrorKind::Other, "No such device");
        assert!(matches!(dequeue_error(gone), Err(CameraError::CaptureFailed(_))));
    }

    #[test]
    fn test_stream_holds_at_most_one_stale_frame() {
        assert_eq!(STREAM_BUFFERS, 2);
        assert!(DEQUEUE_TIMEOUT < Duration::from_secs(1));
    }

    #[test]
    fn test_default_request() {
        let r = CameraRequest::default();
        assert_eq!((r.width, r.height, r.facing), (640, 480, Facing::User));
    }
}
