//! tryon-hw: Camera acquisition and RGBA video frames.
//!
//! Provides the `CameraProvider`/`VideoSource` seam the capture session
//! drives, a V4L2 implementation, and pixel-format conversion to RGBA.

pub mod camera;
pub mod frame;

pub use camera::{
    Camera, CameraError, CameraProvider, CameraRequest, DeviceInfo, Facing, PixelFormat,
    ReadySignal, V4lProvider, VideoSource,
};
pub use frame::{FrameError, VideoFrame};
