//! Requests consumed by the processing worker.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::cache::{ArtifactKey, Variant};

static NO_ROLES: BTreeSet<i32> = BTreeSet::new();

/// Anything the worker can turn into a cached artifact.
///
/// The worker only needs the key the result is stored under and the source
/// to stat for staleness; everything else is interpreted by the producer.
pub trait ArtifactRequest: Send + 'static {
    /// Key the produced artifact is stored under.
    fn key(&self) -> &ArtifactKey;

    /// Source file the artifact is derived from.
    fn source_path(&self) -> &Path;

    /// Presentation roles to refresh when the artifact becomes available.
    fn invalidation_roles(&self) -> &BTreeSet<i32> {
        &NO_ROLES
    }

    /// Fold a later request for the same key into this still-queued one.
    ///
    /// The default keeps `self` as it is.
    fn absorb(&mut self, _duplicate: Self)
    where
        Self: Sized,
    {
    }
}

/// Request to render a thumbnail of one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRequest {
    key: ArtifactKey,
    original_path: PathBuf,
    scale: f32,
    invalidation_roles: BTreeSet<i32>,
}

impl CacheRequest {
    /// Request a `variant` rendition of `original_path` at scale 1.0.
    #[must_use]
    pub fn new(original_path: impl Into<PathBuf>, variant: Variant) -> Self {
        let original_path = original_path.into();
        Self {
            key: ArtifactKey::new(&original_path, variant),
            original_path,
            scale: 1.0,
            invalidation_roles: BTreeSet::new(),
        }
    }

    /// Set the display scale factor. Non-finite or non-positive values fall back to 1.0.
    #[must_use]
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        };
        self
    }

    /// Presentation roles to refresh once the artifact is ready.
    #[must_use]
    pub fn with_invalidation_roles(mut self, roles: impl IntoIterator<Item = i32>) -> Self {
        self.invalidation_roles = roles.into_iter().collect();
        self
    }

    /// Source path as given by the caller.
    #[must_use]
    pub fn original_path(&self) -> &Path {
        &self.original_path
    }

    /// Display scale factor.
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Requested rendition.
    #[must_use]
    pub fn variant(&self) -> Variant {
        self.key.variant()
    }

    /// Whether the quick rendition is requested.
    #[must_use]
    pub fn is_quick(&self) -> bool {
        self.key.variant().is_quick()
    }
}

impl ArtifactRequest for CacheRequest {
    fn key(&self) -> &ArtifactKey {
        &self.key
    }

    fn source_path(&self) -> &Path {
        &self.original_path
    }

    fn invalidation_roles(&self) -> &BTreeSet<i32> {
        &self.invalidation_roles
    }

    /// Roles are merged; path and scale of the first request are kept.
    fn absorb(&mut self, duplicate: Self) {
        self.invalidation_roles.extend(duplicate.invalidation_roles);
    }
}
