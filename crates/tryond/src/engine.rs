use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tryon_core::{AssetError, CaptureResult, ProductAsset, SkinRegionEstimator};
use tryon_hw::CameraProvider;

use crate::config::Config;
use crate::scheduler::FrameClock;
use crate::session::{CaptureSession, SessionError, SessionStatus, TickOutcome};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Start {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    SetAsset {
        name: String,
        result: Result<ProductAsset, AssetError>,
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Capture {
        reply: oneshot::Sender<Result<CaptureResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    status: watch::Receiver<SessionStatus>,
}

impl EngineHandle {
    /// Acquire the camera and start the frame loop.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Start { reply }).await?
    }

    /// Hand a product and its loaded (or failed) asset to the session.
    pub async fn set_asset(
        &self,
        name: String,
        result: Result<ProductAsset, AssetError>,
    ) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::SetAsset { name, result, reply }).await
    }

    /// Stop the frame loop and release the camera.
    pub async fn stop(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Stop { reply }).await
    }

    /// Flatten the current frame and overlay.
    pub async fn capture(&self) -> Result<CaptureResult, EngineError> {
        self.request(|reply| EngineRequest::Capture { reply }).await?
    }

    /// Latest published session status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the capture session and, while it is live, alternates
/// between draining requests and running frame ticks. While idle it blocks
/// on the request channel. Dropping every handle stops the session and
/// ends the thread.
pub fn spawn_engine(
    config: &Config,
    estimator: SkinRegionEstimator,
    mut provider: Box<dyn CameraProvider>,
) -> Result<EngineHandle, EngineError> {
    let options = config.session_options();
    let refresh_hz = config.refresh_hz;
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);
    let (status_tx, status_rx) = watch::channel(SessionStatus::default());

    std::thread::Builder::new()
        .name("tryon-engine".into())
        .spawn(move || {
            let clock = FrameClock::new(refresh_hz);
            tracing::info!(
                refresh_hz,
                interval_ms = clock.interval().as_secs_f32() * 1000.0,
                "engine thread started"
            );
            let mut session = CaptureSession::new(estimator, clock, options);
            let mut tracking = false;
            publish(&status_tx, &session);

            loop {
                let request = if session.is_live() {
                    match rx.try_recv() {
                        Ok(req) => Some(req),
                        Err(TryRecvError::Empty) => None,
                        Err(TryRecvError::Disconnected) => break,
                    }
                } else {
                    match rx.blocking_recv() {
                        Some(req) => Some(req),
                        None => break,
                    }
                };

                match request {
                    Some(req) => handle_request(&mut session, provider.as_mut(), &status_tx, req),
                    None => match session.run_next() {
                        Some(TickOutcome::Processed { confidence, render }) => {
                            if confidence.is_some() != tracking {
                                tracking = confidence.is_some();
                                tracing::debug!(
                                    ?confidence,
                                    overlay = render.is_some(),
                                    "face {}",
                                    if tracking { "found" } else { "lost" }
                                );
                            }
                        }
                        Some(TickOutcome::NotReady) => tracing::trace!("waiting for video source"),
                        _ => {}
                    },
                }
                publish(&status_tx, &session);
            }

            session.stop();
            publish(&status_tx, &session);
            tracing::info!(state = %session.state(), "engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, status: status_rx })
}

fn handle_request(
    session: &mut CaptureSession<FrameClock>,
    provider: &mut dyn CameraProvider,
    status_tx: &watch::Sender<SessionStatus>,
    request: EngineRequest,
) {
    // Each reply goes out after the status it caused is published.
    match request {
        EngineRequest::Start { reply } => {
            let result = session.request_camera().and_then(|camera| {
                // Readers see requestingCamera while the device opens.
                publish(status_tx, session);
                session.on_camera_result(provider.acquire(&camera))
            });
            publish(status_tx, session);
            let _ = reply.send(result.map_err(EngineError::from));
        }
        EngineRequest::SetAsset { name, result, reply } => {
            session.set_asset(&name, result);
            publish(status_tx, session);
            let _ = reply.send(());
        }
        EngineRequest::Stop { reply } => {
            session.stop();
            publish(status_tx, session);
            let _ = reply.send(());
        }
        EngineRequest::Capture { reply } => {
            let result = session.capture().map_err(EngineError::from);
            publish(status_tx, session);
            let _ = reply.send(result);
        }
    }
}

fn publish(status_tx: &watch::Sender<SessionStatus>, session: &CaptureSession<FrameClock>) {
    let status = session.status();
    status_tx.send_if_modified(|current| {
        if *current == status {
            false
        } else {
            *current = status;
            true
        }
    });
}
