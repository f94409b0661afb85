use std::path::PathBuf;

use serde::Serialize;
use tryon_core::{CatalogProduct, ProductAsset};
use tryon_hw::CameraError;
use zbus::interface;

use crate::engine::{EngineError, EngineHandle};
use crate::session::{SessionError, SessionStatus};

pub const BUS_NAME: &str = "org.tryon.Compositor1";
pub const OBJECT_PATH: &str = "/org/tryon/Compositor1";

/// D-Bus interface for the try-on compositor daemon.
///
/// Bus name: org.tryon.Compositor1
/// Object path: /org/tryon/Compositor1
pub struct TryOnService {
    engine: EngineHandle,
    capture_dir: PathBuf,
    jpeg_quality: u8,
}

impl TryOnService {
    pub fn new(engine: EngineHandle, capture_dir: PathBuf, jpeg_quality: u8) -> Self {
        Self { engine, capture_dir, jpeg_quality }
    }
}

#[interface(name = "org.tryon.Compositor1")]
impl TryOnService {
    /// Open the camera and start compositing the given catalog product.
    ///
    /// A product image that fails to load does not fail the call; the
    /// session runs without an overlay and `Status` reports the error.
    async fn start(&self, product_json: &str) -> zbus::fdo::Result<()> {
        let product = parse_product(product_json)?;
        tracing::info!(name = %product.name, "start requested");

        let name = product.name.clone();
        let (started, asset) = tokio::join!(self.engine.start(), load_asset(product));
        started.map_err(to_fdo)?;
        self.engine.set_asset(name, asset?).await.map_err(to_fdo)
    }

    /// Switch products without restarting the camera.
    ///
    /// As with `Start`, an image that fails to load is reported through
    /// `assetError` in `Status`, not as a call error.
    async fn set_product(&self, product_json: &str) -> zbus::fdo::Result<()> {
        let product = parse_product(product_json)?;
        tracing::info!(name = %product.name, "set_product requested");

        let name = product.name.clone();
        let asset = load_asset(product).await?;
        self.engine.set_asset(name, asset).await.map_err(to_fdo)
    }

    /// Stop compositing and release the camera.
    async fn stop(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop requested");
        self.engine.stop().await.map_err(to_fdo)
    }

    /// Flatten the current frame and overlay to a JPEG; returns its path.
    async fn capture(&self) -> zbus::fdo::Result<String> {
        let still = self.engine.capture().await.map_err(to_fdo)?;
        let path = self.capture_dir.join(&still.filename);
        let quality = self.jpeg_quality;

        let jpeg = tokio::task::spawn_blocking(move || still.encode_jpeg(quality))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("encoder task failed: {e}")))?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        tokio::fs::create_dir_all(&self.capture_dir)
            .await
            .map_err(|e| zbus::fdo::Error::IOError(e.to_string()))?;
        tokio::fs::write(&path, &jpeg)
            .await
            .map_err(|e| zbus::fdo::Error::IOError(e.to_string()))?;

        tracing::info!(path = %path.display(), bytes = jpeg.len(), "capture saved");
        Ok(path.display().to_string())
    }

    /// Return session status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        status_json(&self.engine.status())
    }
}

#[derive(Serialize)]
struct StatusReply<'a> {
    version: &'static str,
    #[serde(flatten)]
    status: &'a SessionStatus,
}

fn status_json(status: &SessionStatus) -> zbus::fdo::Result<String> {
    serde_json::to_string(&StatusReply { version: env!("CARGO_PKG_VERSION"), status })
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn parse_product(json: &str) -> zbus::fdo::Result<CatalogProduct> {
    CatalogProduct::from_json(json).map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))
}

/// Decode the product image off the async runtime.
async fn load_asset(
    product: CatalogProduct,
) -> zbus::fdo::Result<Result<ProductAsset, tryon_core::AssetError>> {
    tokio::task::spawn_blocking(move || ProductAsset::load(&product))
        .await
        .map_err(|e| zbus::fdo::Error::Failed(format!("asset task failed: {e}")))
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Session(SessionError::Camera(CameraError::PermissionDenied(dev))) => {
            zbus::fdo::Error::AccessDenied(format!("camera permission denied: {dev}"))
        }
        EngineError::Session(e @ SessionError::InvalidState { .. }) => {
            zbus::fdo::Error::NotSupported(e.to_string())
        }
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}
