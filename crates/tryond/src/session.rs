//! Capture session: camera lifecycle, per-frame pipeline and still capture.
//!
//! ```text
//! idle --start--> requestingCamera --granted--> live --stop--> stopped
//!                        |                                        |
//!                        +--denied--> idle        stopped --start-+
//! ```
//!
//! Capturing a still is a pseudo-state: it reads the current frame and
//! overlay while live and leaves the state untouched.

use serde::Serialize;
use thiserror::Error;
use tryon_core::{
    flatten, project, AssetError, CaptureError, CaptureResult, OverlayRenderer, OverlaySurface,
    ProductAsset, RenderReport, SkinRegionEstimator,
};
use tryon_hw::{CameraError, CameraRequest, ReadySignal, VideoFrame, VideoSource};

use crate::scheduler::{Scheduler, TickHandle};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera access failed: {0}")]
    Camera(#[from] CameraError),
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },
    #[error("no frame available to capture")]
    NoFrame,
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    Idle,
    RequestingCamera,
    Live,
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::RequestingCamera => "requestingCamera",
            SessionState::Live => "live",
            SessionState::Stopped => "stopped",
        })
    }
}

/// Snapshot published to status readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: SessionState,
    pub camera_ready: bool,
    pub model_ready: bool,
    pub overlay_active: bool,
    pub detection_confidence: f32,
    pub asset_loaded: bool,
    pub asset_error: Option<String>,
    pub camera_error: Option<String>,
    /// Live for a while without a single detection.
    pub no_face_detected: bool,
    pub captures: u32,
    pub ticks: u64,
}

/// One-shot readiness latch for a video source.
///
/// Checked once on mount and again on every readiness signal; the first
/// check that sees non-zero dimensions latches. Later signals are no-ops.
#[derive(Debug, Default)]
pub struct ReadinessLatch {
    ready: bool,
}

impl ReadinessLatch {
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Check a source that may already be ready when mounted.
    pub fn on_mount(&mut self, dimensions: (u32, u32)) -> bool {
        self.evaluate("mount", dimensions)
    }

    pub fn on_signal(&mut self, signal: ReadySignal, dimensions: (u32, u32)) -> bool {
        let trigger = match signal {
            ReadySignal::MetadataLoaded => "metadata-loaded",
            ReadySignal::CanPlay => "can-play",
            ReadySignal::DataLoaded => "data-loaded",
        };
        self.evaluate(trigger, dimensions)
    }

    fn evaluate(&mut self, trigger: &'static str, (width, height): (u32, u32)) -> bool {
        if self.ready || width == 0 || height == 0 {
            return false;
        }
        self.ready = true;
        tracing::debug!(trigger, width, height, "video source ready");
        true
    }
}

/// Per-session knobs, fixed at construction.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub camera: CameraRequest,
    /// Ticks without any detection before the no-face hint is raised.
    pub no_face_hint_after: u64,
    pub debug_markers: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            camera: CameraRequest::default(),
            no_face_hint_after: 90,
            debug_markers: false,
        }
    }
}

/// What a fired tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// Handle was cancelled or the session is no longer live; nothing ran.
    Cancelled,
    /// Source has not reported usable dimensions yet.
    NotReady,
    /// No frame (or an unreadable one) this tick.
    NoFrame,
    /// Frame older than the last processed one; skipped.
    OutOfOrder,
    Processed {
        confidence: Option<f32>,
        render: Option<RenderReport>,
    },
}

/// Everything that only exists while the camera is held.
struct LiveContext {
    source: Box<dyn VideoSource>,
    latch: ReadinessLatch,
    renderer: OverlayRenderer,
    surface: OverlaySurface,
    frame: Option<VideoFrame>,
    last_sequence: Option<u32>,
    ticks: u64,
    detections: u64,
    confidence: f32,
}

pub struct CaptureSession<S: Scheduler> {
    state: SessionState,
    estimator: SkinRegionEstimator,
    scheduler: S,
    options: SessionOptions,
    pending: Option<TickHandle>,
    live: Option<LiveContext>,
    asset: Option<ProductAsset>,
    /// Display name of the current product, kept even when its image failed.
    product_name: Option<String>,
    asset_error: Option<String>,
    camera_error: Option<String>,
    captures: u32,
}

impl<S: Scheduler> CaptureSession<S> {
    pub fn new(estimator: SkinRegionEstimator, scheduler: S, options: SessionOptions) -> Self {
        Self {
            state: SessionState::Idle,
            estimator,
            scheduler,
            options,
            pending: None,
            live: None,
            asset: None,
            product_name: None,
            asset_error: None,
            camera_error: None,
            captures: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == SessionState::Live
    }

    #[cfg(test)]
    pub(crate) fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// The tick currently scheduled, if any.
    #[cfg(test)]
    pub(crate) fn pending_tick(&self) -> Option<TickHandle> {
        self.pending
    }

    /// Enter `requestingCamera` and hand back what to ask the provider for.
    pub fn request_camera(&mut self) -> Result<CameraRequest, SessionError> {
        match self.state {
            SessionState::Idle | SessionState::Stopped => {}
            state => return Err(SessionError::InvalidState { action: "start", state }),
        }
        self.state = SessionState::RequestingCamera;
        self.camera_error = None;
        tracing::info!(
            device = ?self.options.camera.device,
            facing = ?self.options.camera.facing,
            "requesting camera"
        );
        Ok(self.options.camera.clone())
    }

    /// Complete a camera request: go live on success, back to idle on denial.
    pub fn on_camera_result(
        &mut self,
        result: Result<Box<dyn VideoSource>, CameraError>,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::RequestingCamera {
            if let Ok(mut source) = result {
                source.release();
            }
            return Err(SessionError::InvalidState {
                action: "accept a camera",
                state: self.state,
            });
        }

        let source = match result {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(error = %e, "camera unavailable");
                self.state = SessionState::Idle;
                self.camera_error = Some(e.to_string());
                return Err(e.into());
            }
        };

        let mut latch = ReadinessLatch::default();
        latch.on_mount(source.dimensions());
        self.live = Some(LiveContext {
            source,
            latch,
            renderer: OverlayRenderer::new(self.options.debug_markers),
            surface: OverlaySurface::new(0, 0),
            frame: None,
            last_sequence: None,
            ticks: 0,
            detections: 0,
            confidence: 0.0,
        });
        self.state = SessionState::Live;
        self.pending = Some(self.scheduler.schedule());
        tracing::info!("session live");
        Ok(())
    }

    /// Acquire a camera from `provider` and go live in one step.
    #[cfg(test)]
    pub(crate) fn start(
        &mut self,
        provider: &mut dyn tryon_hw::CameraProvider,
    ) -> Result<(), SessionError> {
        let request = self.request_camera()?;
        let result = provider.acquire(&request);
        self.on_camera_result(result)
    }

    /// Install (or clear, on error) the product to render.
    ///
    /// Changing product keeps the session and its last anchors; a load
    /// failure only suspends the overlay. The name is kept either way and
    /// names captured stills.
    pub fn set_asset(&mut self, name: &str, result: Result<ProductAsset, AssetError>) {
        self.product_name = Some(name.to_string());
        match result {
            Ok(asset) => {
                tracing::info!(name = %asset.name(), kind = %asset.kind(), "product set");
                self.asset = Some(asset);
                self.asset_error = None;
            }
            Err(e) => {
                tracing::warn!(name, error = %e, "product asset failed to load; overlay suspended");
                self.asset = None;
                self.asset_error = Some(e.to_string());
            }
        }
    }

    /// Wait for the next scheduled tick and run it.
    pub fn run_next(&mut self) -> Option<TickOutcome> {
        let handle = self.scheduler.next_due()?;
        Some(self.tick(handle))
    }

    /// Run one frame of the pipeline: read, estimate, project, render.
    ///
    /// A handle that is not the pending one, or that fires after stop, is a
    /// no-op. The next tick is scheduled only while the session stays live.
    pub fn tick(&mut self, handle: TickHandle) -> TickOutcome {
        if self.state != SessionState::Live || self.pending != Some(handle) {
            tracing::trace!(?handle, "stale tick ignored");
            return TickOutcome::Cancelled;
        }
        self.pending = None;

        let Some(ctx) = self.live.as_mut() else {
            return TickOutcome::Cancelled;
        };
        let outcome = Self::process(ctx, &self.estimator, self.asset.as_ref());

        self.pending = Some(self.scheduler.schedule());
        outcome
    }

    fn process(
        ctx: &mut LiveContext,
        estimator: &SkinRegionEstimator,
        asset: Option<&ProductAsset>,
    ) -> TickOutcome {
        if ctx.source.is_released() {
            return TickOutcome::Cancelled;
        }

        for signal in ctx.source.drain_signals() {
            let dimensions = ctx.source.dimensions();
            ctx.latch.on_signal(signal, dimensions);
        }
        if !ctx.latch.is_ready() {
            return TickOutcome::NotReady;
        }

        let frame = match ctx.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return TickOutcome::NoFrame,
            Err(e) => {
                tracing::warn!(error = %e, "frame read failed");
                return TickOutcome::NoFrame;
            }
        };
        if ctx.last_sequence.is_some_and(|last| frame.sequence() <= last) {
            tracing::debug!(sequence = frame.sequence(), "out-of-order frame dropped");
            return TickOutcome::OutOfOrder;
        }
        ctx.last_sequence = Some(frame.sequence());
        ctx.ticks += 1;

        let (width, height) = (frame.width(), frame.height());
        let region = estimator.estimate(frame.data(), width, height);
        let anchors = region.as_ref().map(project);
        ctx.confidence = region.as_ref().map_or(0.0, |r| r.confidence);
        if region.is_some() {
            ctx.detections += 1;
        }

        ctx.surface.resize(width, height);
        let render = ctx.renderer.render(&mut ctx.surface, anchors.as_ref(), asset);
        ctx.frame = Some(frame);

        tracing::trace!(
            tick = ctx.ticks,
            detected = region.is_some(),
            rendered = render.is_some(),
            "frame processed"
        );

        TickOutcome::Processed {
            confidence: region.map(|r| r.confidence),
            render,
        }
    }

    /// Flatten the current frame and overlay into a still image.
    pub fn capture(&mut self) -> Result<CaptureResult, SessionError> {
        if self.state != SessionState::Live {
            return Err(SessionError::InvalidState { action: "capture", state: self.state });
        }
        let ctx = self.live.as_ref().ok_or(SessionError::NoFrame)?;
        let frame = ctx.frame.as_ref().ok_or(SessionError::NoFrame)?;
        let name = self.product_name.as_deref().unwrap_or("");

        let result = flatten(frame.data(), frame.width(), frame.height(), &ctx.surface, name)?;
        self.captures += 1;
        tracing::info!(
            filename = %result.filename,
            width = result.width(),
            height = result.height(),
            "still captured"
        );
        Ok(result)
    }

    /// Cancel the pending tick and release the camera. Idempotent.
    pub fn stop(&mut self) {
        if let Some(handle) = self.pending.take() {
            self.scheduler.cancel(handle);
        }
        if let Some(mut ctx) = self.live.take() {
            ctx.source.release();
            tracing::info!(ticks = ctx.ticks, detections = ctx.detections, "session stopped");
        }
        if matches!(self.state, SessionState::Live | SessionState::RequestingCamera) {
            self.state = SessionState::Stopped;
        }
        self.asset = None;
        self.product_name = None;
        self.asset_error = None;
    }

    pub fn status(&self) -> SessionStatus {
        let ctx = self.live.as_ref();
        SessionStatus {
            state: self.state,
            camera_ready: ctx.is_some_and(|c| c.latch.is_ready()),
            model_ready: self.estimator.is_ready(),
            overlay_active: ctx.is_some_and(|c| c.renderer.is_active()),
            detection_confidence: ctx.map_or(0.0, |c| c.confidence),
            asset_loaded: self.asset.is_some(),
            asset_error: self.asset_error.clone(),
            camera_error: self.camera_error.clone(),
            no_face_detected: ctx.is_some_and(|c| {
                c.detections == 0 && c.ticks >= self.options.no_face_hint_after
            }),
            captures: self.captures,
            ticks: ctx.map_or(0, |c| c.ticks),
        }
    }
}

impl<S: Scheduler> Drop for CaptureSession<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
