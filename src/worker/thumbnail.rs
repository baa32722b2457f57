//! Default thumbnail producer built on the `image` crate.
//!
//! Still images in the formats the `image` build can decode are scaled to fit a
//! square box and written as PNG. Quick thumbnails use the fast integer
//! sampler; full thumbnails use Lanczos resampling. Video sources are reported
//! as [`ProductionError::Unsupported`] and need a host-provided producer.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat};

use super::producer::{ArtifactProducer, ProductionError};
use super::request::CacheRequest;

/// Default edge length of full thumbnails, in pixels at scale 1.0.
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 256;
/// Default edge length of quick thumbnails, in pixels at scale 1.0.
pub const DEFAULT_QUICK_THUMBNAIL_SIZE: u32 = 96;

/// Renders PNG thumbnails of still images.
#[derive(Debug, Clone, Copy)]
pub struct ImageThumbnailer {
    full_size: u32,
    quick_size: u32,
}

impl Default for ImageThumbnailer {
    fn default() -> Self {
        Self::new(DEFAULT_THUMBNAIL_SIZE, DEFAULT_QUICK_THUMBNAIL_SIZE)
    }
}

impl ImageThumbnailer {
    /// Create a thumbnailer with box sizes for full and quick renditions.
    #[must_use]
    pub fn new(full_size: u32, quick_size: u32) -> Self {
        Self {
            full_size: full_size.max(1),
            quick_size: quick_size.max(1),
        }
    }

    /// Whether `path` has an extension this build can decode.
    #[must_use]
    pub fn supports(path: &Path) -> bool {
        ImageFormat::from_path(path).is_ok_and(|format| format.reading_enabled())
    }

    /// Edge of the bounding box for a request.
    #[must_use]
    pub fn target_edge(&self, request: &CacheRequest) -> u32 {
        let base = if request.is_quick() {
            self.quick_size
        } else {
            self.full_size
        };
        ((base as f32 * request.scale()).round() as u32).max(1)
    }

    fn render(&self, image: &DynamicImage, request: &CacheRequest) -> DynamicImage {
        let edge = self.target_edge(request);
        if image.width() <= edge && image.height() <= edge {
            return image.clone();
        }
        if request.is_quick() {
            image.thumbnail(edge, edge)
        } else {
            image.resize(edge, edge, FilterType::Lanczos3)
        }
    }
}

fn decode_error(path: &Path, err: ImageError) -> ProductionError {
    match err {
        ImageError::IoError(source) => ProductionError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        },
        other => ProductionError::Decode {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    }
}

impl ArtifactProducer<CacheRequest> for ImageThumbnailer {
    fn extension(&self) -> &str {
        "png"
    }

    fn produce(&self, request: &CacheRequest, output: &Path) -> Result<PathBuf, ProductionError> {
        let source = request.original_path();
        if !Self::supports(source) {
            return Err(ProductionError::Unsupported(source.to_path_buf()));
        }

        let image = image::open(source).map_err(|e| decode_error(source, e))?;
        let thumbnail = self.render(&image, request);
        log::trace!(
            "Rendered {}x{} {} thumbnail of {}",
            thumbnail.width(),
            thumbnail.height(),
            request.variant(),
            source.display()
        );

        thumbnail
            .save_with_format(output, ImageFormat::Png)
            .map_err(|e| match e {
                ImageError::IoError(source) => ProductionError::Io {
                    path: output.to_path_buf(),
                    source,
                },
                other => ProductionError::Failed(format!(
                    "Failed to encode {}: {}",
                    output.display(),
                    other
                )),
            })?;
        Ok(output.to_path_buf())
    }
}
