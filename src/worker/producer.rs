//! Pluggable capabilities used by the worker.
//!
//! - [`ArtifactProducer`]: renders an artifact for a request.
//! - [`SourceInspector`]: reports the current stamp (mtime + size) of a source.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::SourceStamp;

/// Errors from producing a single artifact.
///
/// These never stop the worker: the request is skipped and the next one
/// processed.
#[derive(thiserror::Error, Debug)]
pub enum ProductionError {
    /// The producer cannot handle this kind of source.
    #[error("Unsupported source: {0}")]
    Unsupported(PathBuf),

    /// The source could not be read or stat'ed.
    #[error("Source unavailable {path}: {source}")]
    SourceUnavailable {
        /// Source path
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The source could not be decoded or rendered.
    #[error("Failed to render {path}: {message}")]
    Decode {
        /// Source path
        path: PathBuf,
        /// Decoder message
        message: String,
    },

    /// Writing or moving the artifact failed.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Any other producer-specific failure.
    #[error("{0}")]
    Failed(String),
}

/// Renders artifacts for requests of type `R`.
///
/// Implementations run on the worker thread and may block for as long as
/// rendering takes; the worker does not observe a stop request until
/// `produce` returns.
pub trait ArtifactProducer<R>: Send + Sync {
    /// File extension of produced artifacts, without the dot.
    fn extension(&self) -> &str;

    /// Render an artifact for `request` into `output`.
    ///
    /// Returns the path that was actually written, normally `output` itself.
    /// The worker moves that file to its final location.
    fn produce(&self, request: &R, output: &Path) -> Result<PathBuf, ProductionError>;
}

impl<R, P: ArtifactProducer<R> + ?Sized> ArtifactProducer<R> for Arc<P> {
    fn extension(&self) -> &str {
        (**self).extension()
    }

    fn produce(&self, request: &R, output: &Path) -> Result<PathBuf, ProductionError> {
        (**self).produce(request, output)
    }
}

/// Reports current source metadata for staleness checks.
pub trait SourceInspector: Send + Sync {
    /// Stamp of `path` as it is now.
    fn stamp(&self, path: &Path) -> io::Result<SourceStamp>;
}

/// [`SourceInspector`] reading `std::fs::metadata`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSourceInspector;

impl SourceInspector for FsSourceInspector {
    fn stamp(&self, path: &Path) -> io::Result<SourceStamp> {
        SourceStamp::read(path)
    }
}
