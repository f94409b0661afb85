use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod scheduler;
mod session;

use dbus_interface::{TryOnService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("tryond starting");

    let config = config::Config::from_env();
    tracing::info!(
        device = ?config.camera_device,
        width = config.width,
        height = config.height,
        refresh_hz = config.refresh_hz,
        capture_dir = %config.capture_dir.display(),
        "configuration loaded"
    );

    let estimator = config.load_estimator().context("loading skin rules")?;
    let engine = engine::spawn_engine(&config, estimator, Box::new(tryon_hw::V4lProvider))?;

    let service = TryOnService::new(engine.clone(), config.capture_dir.clone(), config.jpeg_quality);
    let _connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "tryond ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("tryond shutting down");

    if let Err(e) = engine.stop().await {
        tracing::warn!(error = %e, "engine did not stop cleanly");
    }

    Ok(())
}
