//! Cache service facade.
//!
//! [`CacheService`] is the only thing producers (UI models, batch importers)
//! talk to. It hides the queue, the index and the worker thread:
//!
//! - [`CacheService::try_get_cached`] answers from the index without blocking
//!   and purges entries that went stale.
//! - [`CacheService::enqueue`] hands a request to the worker.
//! - [`CacheService::flush`] waits until everything queued before it is handled.
//! - [`CacheService::start`] / [`CacheService::stop`] manage the worker thread.
//!
//! # Example
//!
//! ```no_run
//! use artcache::cache::Variant;
//! use artcache::service::{CacheService, ServiceConfig};
//! use artcache::worker::ImageThumbnailer;
//!
//! let service = CacheService::new(
//!     ServiceConfig::new("/tmp/artcache"),
//!     ImageThumbnailer::default(),
//! );
//! service.start()?;
//!
//! if service.try_get_cached("/stock/a.png", Variant::Quick).is_none() {
//!     service.request("/stock/a.png", Variant::Quick, 1.0);
//! }
//! service.flush()?;
//! let cached = service.try_get_cached("/stock/a.png", Variant::Quick);
//! service.stop()?;
//! # Ok::<(), artcache::service::ServiceError>(())
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;

use crate::cache::{
    ArtifactKey, CacheEntry, CacheIndex, CacheLayout, IndexStore, StorageError, Validity, Variant,
};
use crate::events::{CacheListener, Listeners};
use crate::queue::{PushOutcome, QueueItem, Separator, WorkQueue};
use crate::worker::{
    ArtifactProducer, ArtifactRequest, CacheRequest, FsSourceInspector, ProcessingWorker,
    SourceInspector, WorkerMonitor, WorkerState, WorkerStats, DEFAULT_SAVE_INTERVAL,
};

/// Name of the worker thread.
pub const WORKER_THREAD_NAME: &str = "artcache-worker";

/// Errors surfaced by the service's lifecycle and flush operations.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    /// `start` was called while the worker is running.
    #[error("Cache worker is already running")]
    AlreadyRunning,

    /// The service has been stopped and cannot be used for processing.
    #[error("Cache service has been stopped")]
    Stopped,

    /// The cache directory could not be created.
    #[error("Failed to create cache directory {path}: {source}")]
    CacheDir {
        /// Directory that could not be created
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The worker thread could not be spawned.
    #[error("Failed to spawn cache worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// Waiting for the queue to drain took longer than allowed. Retryable.
    #[error("Timed out after {0:?} waiting for the cache queue to drain")]
    FlushTimedOut(Duration),

    /// The worker thread panicked. The index was saved from the service side.
    #[error("Cache worker panicked")]
    WorkerPanicked,

    /// Writing an index export failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Answer of [`CacheService::try_get_cached`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedArtifact {
    /// Location of the cached artifact.
    pub path: PathBuf,
    /// `true` when the source changed since the artifact was produced; the
    /// caller should request it again.
    pub needs_update: bool,
}

/// Construction parameters for [`CacheService`].
#[derive(Clone)]
pub struct ServiceConfig {
    layout: CacheLayout,
    save_interval: usize,
    listeners: Listeners,
    inspector: Arc<dyn SourceInspector>,
}

impl ServiceConfig {
    /// Configuration caching into `cache_dir` with defaults for everything else.
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self::from_layout(CacheLayout::new(cache_dir))
    }

    /// Configuration for an explicit layout.
    #[must_use]
    pub fn from_layout(layout: CacheLayout) -> Self {
        Self {
            layout,
            save_interval: DEFAULT_SAVE_INTERVAL,
            listeners: Listeners::new(),
            inspector: Arc::new(FsSourceInspector),
        }
    }

    /// Save the index after this many changes.
    #[must_use]
    pub fn with_save_interval(mut self, interval: usize) -> Self {
        self.save_interval = interval.max(1);
        self
    }

    /// Register an event listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn CacheListener>) -> Self {
        self.listeners.add(listener);
        self
    }

    /// Use a different source inspector for staleness checks.
    #[must_use]
    pub fn with_inspector(mut self, inspector: Arc<dyn SourceInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Cache layout.
    #[must_use]
    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("layout", &self.layout)
            .field("save_interval", &self.save_interval)
            .field("listeners", &self.listeners)
            .field("inspector", &"<inspector>")
            .finish()
    }
}

enum Lifecycle {
    NotStarted,
    Running(JoinHandle<WorkerStats>),
    Stopped(WorkerStats),
}

/// Public entry point of the caching pipeline.
///
/// All methods take `&self`; share the service behind an `Arc` to call it
/// from several producer threads.
pub struct CacheService {
    config: ServiceConfig,
    producer: Arc<dyn ArtifactProducer<CacheRequest>>,
    queue: Arc<WorkQueue<CacheRequest>>,
    index: Arc<CacheIndex>,
    monitor: Arc<WorkerMonitor>,
    lifecycle: Mutex<Lifecycle>,
    next_separator: AtomicU64,
}

impl CacheService {
    /// Create a stopped service. Nothing touches the disk until [`CacheService::start`].
    pub fn new<P>(config: ServiceConfig, producer: P) -> Self
    where
        P: ArtifactProducer<CacheRequest> + 'static,
    {
        let index = Arc::new(CacheIndex::new(config.layout.index_store()));
        Self {
            config,
            producer: Arc::new(producer),
            queue: Arc::new(WorkQueue::new()),
            index,
            monitor: Arc::new(WorkerMonitor::new()),
            lifecycle: Mutex::new(Lifecycle::NotStarted),
            next_separator: AtomicU64::new(1),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the cache directory, load the index and spawn the worker.
    ///
    /// Requests enqueued before `start` are processed once the worker runs.
    pub fn start(&self) -> Result<(), ServiceError> {
        let mut lifecycle = self.lifecycle();
        match *lifecycle {
            Lifecycle::Running(_) => return Err(ServiceError::AlreadyRunning),
            Lifecycle::Stopped(_) => return Err(ServiceError::Stopped),
            Lifecycle::NotStarted => {}
        }
        if self.queue.is_stopped() {
            return Err(ServiceError::Stopped);
        }

        let layout = &self.config.layout;
        layout
            .ensure_root()
            .map_err(|source| ServiceError::CacheDir {
                path: layout.root().to_path_buf(),
                source,
            })?;
        let loaded = self.index.load();
        log::info!(
            "Artifact cache at {} ({} entries)",
            layout.root().display(),
            loaded
        );

        let worker = ProcessingWorker::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.index),
            layout.clone(),
            Arc::clone(&self.producer),
        )
        .with_inspector(Arc::clone(&self.config.inspector))
        .with_listeners(self.config.listeners.clone())
        .with_save_interval(self.config.save_interval)
        .with_monitor(Arc::clone(&self.monitor));

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker.run())
            .map_err(ServiceError::Spawn)?;
        *lifecycle = Lifecycle::Running(handle);
        Ok(())
    }

    /// Ask the worker to stop without waiting for it.
    ///
    /// Requests not yet dequeued are discarded; an artifact being produced
    /// right now is finished and committed first.
    pub fn signal_stop(&self) {
        let discarded = self.queue.stop();
        if discarded > 0 {
            log::debug!("Discarded {} queued cache items on stop", discarded);
        }
    }

    /// Stop the worker, wait for it and return its final counters.
    ///
    /// The worker saves the index on its way out. Calling `stop` again returns
    /// the same counters.
    pub fn stop(&self) -> Result<WorkerStats, ServiceError> {
        let mut lifecycle = self.lifecycle();
        self.signal_stop();

        let previous = std::mem::replace(
            &mut *lifecycle,
            Lifecycle::Stopped(WorkerStats::default()),
        );
        let stats = match previous {
            Lifecycle::NotStarted => {
                self.monitor.set_state(WorkerState::Stopped);
                self.monitor.snapshot()
            }
            Lifecycle::Stopped(stats) => stats,
            Lifecycle::Running(handle) => match handle.join() {
                Ok(stats) => stats,
                Err(_) => {
                    log::error!("Cache worker panicked; saving index from the service");
                    if self.index.is_dirty() {
                        if let Err(e) = self.index.save() {
                            log::warn!("Failed to save artifact index: {}", e);
                        }
                    }
                    self.monitor.set_state(WorkerState::Stopped);
                    *lifecycle = Lifecycle::Stopped(self.monitor.snapshot());
                    return Err(ServiceError::WorkerPanicked);
                }
            },
        };
        *lifecycle = Lifecycle::Stopped(stats);
        Ok(stats)
    }

    /// Whether the worker thread is running.
    ///
    /// `false` once the worker has stopped on its own, for instance after a
    /// panic, even if [`CacheService::stop`] has not been called yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.has_worker() && self.monitor.state() != WorkerState::Stopped
    }

    fn has_worker(&self) -> bool {
        matches!(*self.lifecycle(), Lifecycle::Running(_))
    }

    /// Look up a cached artifact without producing anything.
    ///
    /// Returns `None` on a miss. If the artifact file vanished the entry is
    /// purged and `None` returned. If the source changed since production the
    /// entry is purged and the old artifact returned with `needs_update` set.
    pub fn try_get_cached(
        &self,
        path: impl AsRef<Path>,
        variant: Variant,
    ) -> Option<CachedArtifact> {
        let path = path.as_ref();
        let key = ArtifactKey::new(path, variant);
        let entry = self.index.lookup(&key)?;
        let current = self.config.inspector.stamp(path).ok();

        match entry.validate(current) {
            Validity::Valid => Some(CachedArtifact {
                path: entry.artifact_path,
                needs_update: false,
            }),
            Validity::MissingArtifact => {
                log::debug!("Artifact file missing, purging entry: {}", key);
                self.index.remove_if_unchanged(&entry);
                None
            }
            Validity::Stale => {
                log::debug!("Source changed, purging entry: {}", key);
                self.index.remove_if_unchanged(&entry);
                Some(CachedArtifact {
                    path: entry.artifact_path,
                    needs_update: true,
                })
            }
        }
    }

    /// Hand a request to the worker. Never blocks.
    pub fn enqueue(&self, request: CacheRequest) -> PushOutcome {
        let key = request.key().clone();
        let outcome = self.queue.push(QueueItem::Request(request));
        if outcome == PushOutcome::Rejected {
            log::debug!("Cache queue stopped, dropping request for {}", key);
        }
        outcome
    }

    /// Shorthand for enqueueing a [`CacheRequest`] built from its parts.
    pub fn request(&self, path: impl Into<PathBuf>, variant: Variant, scale: f32) -> PushOutcome {
        self.enqueue(CacheRequest::new(path, variant).with_scale(scale))
    }

    /// Ask the worker to persist the index once it gets to this point.
    pub fn request_save(&self) -> PushOutcome {
        self.queue.push(QueueItem::SaveIndex)
    }

    fn push_separator(&self) -> Result<Receiver<()>, ServiceError> {
        let id = self.next_separator.fetch_add(1, Ordering::SeqCst);
        let (separator, ack) = Separator::new(id);
        match self.queue.push(QueueItem::Separator(separator)) {
            PushOutcome::Rejected => Err(ServiceError::Stopped),
            _ => Ok(ack),
        }
    }

    /// Block until every item queued before this call has been handled.
    ///
    /// If the service has not been started yet this waits for `start`.
    /// Returns [`ServiceError::Stopped`] if the worker stops first.
    pub fn flush(&self) -> Result<(), ServiceError> {
        let ack = self.push_separator()?;
        ack.recv().map_err(|_| ServiceError::Stopped)
    }

    /// [`CacheService::flush`] with an upper bound on the wait.
    pub fn flush_timeout(&self, timeout: Duration) -> Result<(), ServiceError> {
        let ack = self.push_separator()?;
        match ack.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(ServiceError::FlushTimedOut(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ServiceError::Stopped),
        }
    }

    /// Flush the queue, then write a copy of the index to `path`.
    pub fn export_index(&self, path: impl Into<PathBuf>) -> Result<usize, ServiceError> {
        self.flush()?;
        let entries = self.index.entries();
        Ok(IndexStore::new(path).save(&entries)?)
    }

    /// Worker counters.
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.monitor.snapshot()
    }

    /// Worker lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.monitor.state()
    }

    /// Items waiting in the queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Snapshot of all index entries.
    #[must_use]
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.index.entries()
    }

    /// Directory artifacts are written to.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        self.config.layout.root()
    }

    /// Cache directory layout.
    #[must_use]
    pub fn layout(&self) -> &CacheLayout {
        &self.config.layout
    }
}

impl Drop for CacheService {
    fn drop(&mut self) {
        if self.has_worker() {
            if let Err(e) = self.stop() {
                log::warn!("Failed to stop cache worker cleanly: {}", e);
            }
        }
    }
}

impl fmt::Debug for CacheService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheService")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("state", &self.monitor.state())
            .finish()
    }
}
