//! Product assets: catalog record parsing, image resolution and decoding.

use crate::types::ProductKind;
use image::RgbaImage;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("product has no image reference")]
    NoImage,
    #[error("unsupported image source: {0} (only local paths and file:// URLs are loaded)")]
    UnsupportedSource(String),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has zero size")]
    Empty,
    #[error("invalid product record: {0}")]
    Catalog(#[from] serde_json::Error),
}

/// One entry of a catalog record's `images` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CatalogImage {
    Url(String),
    Record {
        #[serde(default)]
        image_url: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
}

/// Product record as returned by the catalog. Read-only to the compositor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogProduct {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, alias = "imageUrl")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub images: Vec<CatalogImage>,
}

impl CatalogProduct {
    pub fn from_json(json: &str) -> Result<Self, AssetError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolve the product image reference.
    ///
    /// Order: first gallery image (`image_url`, then `url`, or a bare string),
    /// then the record's own `image_url`, then `image`.
    pub fn image_source(&self) -> Option<&str> {
        let from_gallery = self.images.first().and_then(|img| match img {
            CatalogImage::Url(u) => Some(u.as_str()),
            CatalogImage::Record { image_url, url } => {
                image_url.as_deref().or(url.as_deref())
            }
        });

        from_gallery
            .or(self.image_url.as_deref())
            .or(self.image.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn kind(&self) -> ProductKind {
        ProductKind::classify(&self.name, self.category.as_deref().unwrap_or(""))
    }
}

/// Decoded jewelry image plus its placement category.
#[derive(Debug, Clone)]
pub struct ProductAsset {
    name: String,
    kind: ProductKind,
    image: RgbaImage,
}

impl ProductAsset {
    pub fn from_image(
        name: impl Into<String>,
        kind: ProductKind,
        image: RgbaImage,
    ) -> Result<Self, AssetError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(AssetError::Empty);
        }
        Ok(Self { name: name.into(), kind, image })
    }

    /// Decode an encoded image (PNG, JPEG, ...) from memory.
    pub fn decode(
        name: impl Into<String>,
        kind: ProductKind,
        bytes: &[u8],
    ) -> Result<Self, AssetError> {
        let image = image::load_from_memory(bytes)?.to_rgba8();
        Self::from_image(name, kind, image)
    }

    /// Read and decode an image file.
    pub fn open(
        name: impl Into<String>,
        kind: ProductKind,
        path: &Path,
    ) -> Result<Self, AssetError> {
        let bytes = std::fs::read(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::decode(name, kind, &bytes)
    }

    /// Load the asset a catalog record points at.
    pub fn load(product: &CatalogProduct) -> Result<Self, AssetError> {
        let source = product.image_source().ok_or(AssetError::NoImage)?;
        let path = local_path(source)?;
        let asset = Self::open(product.name.clone(), product.kind(), &path)?;

        tracing::info!(
            name = %asset.name,
            kind = %asset.kind,
            width = asset.natural_width(),
            height = asset.natural_height(),
            "product asset loaded"
        );
        Ok(asset)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProductKind {
        self.kind
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn natural_width(&self) -> u32 {
        self.image.width()
    }

    pub fn natural_height(&self) -> u32 {
        self.image.height()
    }

    /// Natural height over natural width.
    pub fn aspect(&self) -> f32 {
        self.image.height() as f32 / self.image.width() as f32
    }
}

/// Map an image reference to a local file path.
fn local_path(source: &str) -> Result<PathBuf, AssetError> {
    if let Some(rest) = source.strip_prefix("file://") {
        return Ok(PathBuf::from(rest));
    }
    match source.split_once("://") {
        Some(_) => Err(AssetError::UnsupportedSource(source.to_string())),
        None => Ok(PathBuf::from(source)),
    }
}
