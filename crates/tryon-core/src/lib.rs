//! tryon-core: Landmark estimation and jewelry overlay compositing.
//!
//! Estimates a face box from raw RGBA pixels with a rule-table skin
//! heuristic (no trained model), projects anatomical anchors from it, and
//! draws product images onto a transparent overlay surface.

pub mod anchors;
pub mod asset;
pub mod capture;
pub mod estimator;
pub mod overlay;
pub mod types;

pub use anchors::project;
pub use asset::{AssetError, CatalogProduct, ProductAsset};
pub use capture::{flatten, CaptureError, CaptureResult};
pub use estimator::{EstimatorConfig, RuleTable, SkinRegionEstimator, SkinRule};
pub use overlay::{AnchorSource, OverlayRenderer, OverlaySurface, Placement, RenderReport};
pub use types::{AnchorSet, Point, ProductKind, SkinRegion};
