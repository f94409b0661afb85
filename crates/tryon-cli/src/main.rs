use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tryon_core::{
    flatten, project, AnchorSet, CaptureResult, OverlayRenderer, OverlaySurface, ProductAsset,
    ProductKind, SkinRegion, SkinRegionEstimator,
};
use tryon_hw::{Camera, Facing};

#[zbus::proxy(
    interface = "org.tryon.Compositor1",
    default_service = "org.tryon.Compositor1",
    default_path = "/org/tryon/Compositor1"
)]
trait Compositor {
    fn start(&self, product_json: &str) -> zbus::Result<()>;
    fn set_product(&self, product_json: &str) -> zbus::Result<()>;
    fn stop(&self) -> zbus::Result<()>;
    fn capture(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "tryon", about = "Virtual jewelry try-on compositor CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a live try-on session with a catalog product
    Start {
        /// Catalog product record: inline JSON or a path to a JSON file
        #[arg(short, long)]
        product: String,
    },
    /// Switch the product of the running session
    SetProduct {
        /// Catalog product record: inline JSON or a path to a JSON file
        #[arg(short, long)]
        product: String,
    },
    /// Stop the session and release the camera
    Stop,
    /// Save a still of the current composite
    Capture,
    /// Show daemon status
    Status,
    /// List capture devices (bypasses the daemon)
    Devices,
    /// Composite a product onto a still photo, offline
    Compose {
        /// Photo to try the product on
        #[arg(long)]
        frame: PathBuf,
        /// Product image (PNG with transparency works best)
        #[arg(long)]
        product_image: PathBuf,
        /// Product name; also picks the placement kind
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        category: String,
        /// Output JPEG (default: "<name>-virtual-try-on.jpg")
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Draw the estimated face box and anchors
        #[arg(long)]
        debug: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { product } => {
            let json = read_product(&product)?;
            proxy().await?.start(&json).await?;
            println!("Try-on started");
        }
        Commands::SetProduct { product } => {
            let json = read_product(&product)?;
            proxy().await?.set_product(&json).await?;
            println!("Product switched");
        }
        Commands::Stop => {
            proxy().await?.stop().await?;
            println!("Try-on stopped");
        }
        Commands::Capture => {
            let path = proxy().await?.capture().await?;
            println!("Saved {path}");
        }
        Commands::Status => match proxy().await {
            Ok(p) => {
                let status: serde_json::Value = serde_json::from_str(&p.status().await?)?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            Err(e) => {
                tracing::debug!(error = %e, "daemon unreachable");
                println!("tryond: not connected");
            }
        },
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            let preferred = tryon_hw::camera::pick_device(&devices, Facing::User).map(|d| d.path.clone());
            for d in &devices {
                let mark = if preferred.as_deref() == Some(d.path.as_str()) { "*" } else { " " };
                println!("{mark} {}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Compose { frame, product_image, name, category, out, debug } => {
            let composed = compose(&frame, &product_image, &name, &category, debug)?;
            let out = out.unwrap_or_else(|| PathBuf::from(&composed.still.filename));
            let jpeg = composed.still.encode_jpeg(tryon_core::capture::DEFAULT_JPEG_QUALITY)?;
            std::fs::write(&out, jpeg).with_context(|| format!("writing {}", out.display()))?;

            let summary = json!({
                "output": out.display().to_string(),
                "kind": composed.kind.as_str(),
                "region": composed.region,
                "anchors": composed.anchors,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

async fn proxy() -> Result<CompositorProxy<'static>> {
    let connection = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    Ok(CompositorProxy::new(&connection).await?)
}

fn read_product(arg: &str) -> Result<String> {
    let json = if arg.trim_start().starts_with('{') {
        arg.to_string()
    } else {
        std::fs::read_to_string(arg).with_context(|| format!("reading product record {arg}"))?
    };
    // Validate locally so the daemon only sees well-formed records.
    tryon_core::CatalogProduct::from_json(&json)?;
    Ok(json)
}

struct Composed {
    still: CaptureResult,
    kind: ProductKind,
    region: Option<SkinRegion>,
    anchors: Option<AnchorSet>,
}

/// One-shot run of the live pipeline over a still photo.
fn compose(
    frame_path: &Path,
    product_image: &Path,
    name: &str,
    category: &str,
    debug: bool,
) -> Result<Composed> {
    let frame = image::open(frame_path)
        .with_context(|| format!("opening {}", frame_path.display()))?
        .to_rgba8();
    let (width, height) = frame.dimensions();

    let kind = ProductKind::classify(name, category);
    let asset = ProductAsset::open(name, kind, product_image)?;

    let region = SkinRegionEstimator::default().estimate(frame.as_raw(), width, height);
    let anchors = region.as_ref().map(project);
    if region.is_none() {
        tracing::warn!("no face region found; output is the unmodified photo");
    }

    let mut surface = OverlaySurface::new(width, height);
    OverlayRenderer::new(debug).render(&mut surface, anchors.as_ref(), Some(&asset));
    let still = flatten(frame.as_raw(), width, height, &surface, asset.name())?;

    Ok(Composed { still, kind, region, anchors })
}
