//! Shared fixtures for the integration tests.

use artcache::worker::{ArtifactProducer, CacheRequest, ProductionError};
use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};

/// Serializes tests that touch `ARTCACHE_*` environment variables.
pub static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Remove every `ARTCACHE_*` variable.
pub fn clear_env() {
    for (key, _) in std::env::vars() {
        if key.starts_with("ARTCACHE_") {
            std::env::remove_var(key);
        }
    }
}

/// Write a solid-color PNG.
pub fn write_png(path: &Path, width: u32, height: u32) {
    RgbImage::from_pixel(width, height, Rgb([30, 120, 200]))
        .save(path)
        .unwrap();
}

fn copy_into(request: &CacheRequest, output: &Path) -> Result<PathBuf, ProductionError> {
    fs::copy(request.original_path(), output).map_err(|source| ProductionError::Io {
        path: output.to_path_buf(),
        source,
    })?;
    Ok(output.to_path_buf())
}

/// Copies the source into the artifact. Sources named `fail*` are refused.
#[derive(Default)]
pub struct CopyProducer {
    calls: AtomicUsize,
}

impl CopyProducer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ArtifactProducer<CacheRequest> for CopyProducer {
    fn extension(&self) -> &str {
        "bin"
    }

    fn produce(&self, request: &CacheRequest, output: &Path) -> Result<PathBuf, ProductionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = request
            .original_path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with("fail") {
            return Err(ProductionError::Failed(format!("refusing {}", name)));
        }
        copy_into(request, output)
    }
}

/// Blocks inside `produce` until [`GatedProducer::open`] is called.
pub struct GatedProducer {
    open: Mutex<bool>,
    opened: Condvar,
    entered: Sender<PathBuf>,
}

impl GatedProducer {
    /// The receiver yields each source as production of it begins.
    pub fn new() -> (Arc<Self>, Receiver<PathBuf>) {
        let (entered, rx) = mpsc::channel();
        let producer = Self {
            open: Mutex::new(false),
            opened: Condvar::new(),
            entered,
        };
        (Arc::new(producer), rx)
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }
}

impl ArtifactProducer<CacheRequest> for GatedProducer {
    fn extension(&self) -> &str {
        "bin"
    }

    fn produce(&self, request: &CacheRequest, output: &Path) -> Result<PathBuf, ProductionError> {
        let _ = self.entered.send(request.original_path().to_path_buf());
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
        drop(open);
        copy_into(request, output)
    }
}
