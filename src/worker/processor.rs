//! The processing worker loop.
//!
//! # Overview
//!
//! One [`ProcessingWorker`] drains the [`WorkQueue`] on a dedicated thread:
//!
//! 1. **Separator**: emit [`CacheEvent::QueueDrained`] and wake the flusher.
//! 2. **Save marker**: persist the index if it changed.
//! 3. **Request**: stat the source, reuse a valid entry or produce a new
//!    artifact, commit it to the index and announce it.
//! 4. **Stop**: leave the loop, save the index one last time and emit
//!    [`CacheEvent::WorkerStopped`].
//!
//! A failing request is logged and skipped; it never ends the loop. Artifacts
//! are written to a staging file and renamed into place before the entry is
//! committed, so the index never points at a half-written file.
//!
//! If the worker thread panics anyway, the queue is stopped while unwinding:
//! pending flushes fail with a stop instead of waiting forever and new work
//! is rejected.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crate::cache::{ArtifactKey, CacheEntry, CacheIndex, CacheLayout, SourceStamp, Validity};
use crate::events::{CacheEvent, Listeners};
use crate::queue::{Popped, QueueItem, WorkQueue};

use super::monitor::{WorkerMonitor, WorkerState, WorkerStats};
use super::producer::{ArtifactProducer, FsSourceInspector, ProductionError, SourceInspector};
use super::request::ArtifactRequest;

/// Default number of index changes between automatic saves.
pub const DEFAULT_SAVE_INTERVAL: usize = 20;

/// Single consumer of the work queue and sole writer of the cache directory.
pub struct ProcessingWorker<R, P> {
    queue: Arc<WorkQueue<R>>,
    index: Arc<CacheIndex>,
    layout: CacheLayout,
    producer: P,
    inspector: Arc<dyn SourceInspector>,
    listeners: Listeners,
    monitor: Arc<WorkerMonitor>,
    save_interval: usize,
    unsaved_changes: usize,
}

impl<R, P> ProcessingWorker<R, P>
where
    R: ArtifactRequest,
    P: ArtifactProducer<R>,
{
    /// Create a worker over `queue` writing artifacts into `layout`.
    #[must_use]
    pub fn new(
        queue: Arc<WorkQueue<R>>,
        index: Arc<CacheIndex>,
        layout: CacheLayout,
        producer: P,
    ) -> Self {
        Self {
            queue,
            index,
            layout,
            producer,
            inspector: Arc::new(FsSourceInspector),
            listeners: Listeners::new(),
            monitor: Arc::new(WorkerMonitor::new()),
            save_interval: DEFAULT_SAVE_INTERVAL,
            unsaved_changes: 0,
        }
    }

    /// Use a different source inspector.
    #[must_use]
    pub fn with_inspector(mut self, inspector: Arc<dyn SourceInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Deliver events to `listeners`.
    #[must_use]
    pub fn with_listeners(mut self, listeners: Listeners) -> Self {
        self.listeners = listeners;
        self
    }

    /// Save the index after this many changes (minimum 1).
    #[must_use]
    pub fn with_save_interval(mut self, interval: usize) -> Self {
        self.save_interval = interval.max(1);
        self
    }

    /// Record counters into an externally owned monitor.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<WorkerMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Handle for reading the worker's counters from other threads.
    #[must_use]
    pub fn monitor(&self) -> Arc<WorkerMonitor> {
        Arc::clone(&self.monitor)
    }

    /// Run until the queue is stopped. Returns the final counters.
    pub fn run(mut self) -> WorkerStats {
        let _guard = StopOnUnwind {
            queue: Arc::clone(&self.queue),
            monitor: Arc::clone(&self.monitor),
        };
        log::debug!(
            "Artifact worker started (cache: {}, save every {} changes)",
            self.layout.root().display(),
            self.save_interval
        );

        loop {
            self.monitor.set_state(WorkerState::Idle);
            let item = match self.queue.pop_blocking() {
                Popped::Item(item) => item,
                Popped::Stopped => break,
            };
            self.monitor.set_state(WorkerState::Running);

            match item {
                QueueItem::Separator(separator) => {
                    log::trace!("Reached separator {}", separator.id());
                    self.listeners.emit(&CacheEvent::QueueDrained {
                        separator: separator.id(),
                    });
                    separator.acknowledge();
                }
                QueueItem::SaveIndex => self.save_index(),
                QueueItem::Request(request) => {
                    self.process_request(&request);
                    if self.queue.is_empty() {
                        self.listeners.emit(&CacheEvent::QueueIdle);
                    }
                }
            }
        }

        self.monitor.set_state(WorkerState::Draining);
        log::debug!("Artifact worker stopping");
        self.save_index();
        self.monitor.set_state(WorkerState::Stopped);
        self.listeners.emit(&CacheEvent::WorkerStopped);

        let stats = self.monitor.snapshot();
        log::info!(
            "Artifact worker stopped: {} processed, {} produced, {} reused, {} failed",
            stats.processed,
            stats.produced,
            stats.reused,
            stats.failed
        );
        stats
    }

    fn process_request(&mut self, request: &R) {
        self.monitor.record_processed();
        let key = request.key();
        let source = request.source_path();

        let stamp = match self.inspector.stamp(source) {
            Ok(stamp) => stamp,
            Err(e) => {
                if self.index.remove(key).is_some() {
                    self.note_change();
                }
                self.fail(
                    key,
                    ProductionError::SourceUnavailable {
                        path: source.to_path_buf(),
                        source: e,
                    },
                );
                return;
            }
        };

        if let Some(entry) = self.index.lookup(key) {
            match entry.validate(Some(stamp)) {
                Validity::Valid => {
                    log::trace!("Cache hit: {}", key);
                    self.monitor.record_reused();
                    self.announce(request, entry.artifact_path, true);
                    return;
                }
                validity => {
                    log::debug!("Invalidating {:?} entry: {}", validity, key);
                    self.index.remove(key);
                    self.note_change();
                }
            }
        }

        match self.produce(request) {
            Ok(artifact) => {
                log::debug!("Produced {} -> {}", key, artifact.display());
                self.commit(key, artifact.clone(), stamp);
                self.monitor.record_produced();
                self.announce(request, artifact, false);
            }
            Err(e) => self.fail(key, e),
        }
    }

    /// Run the producer into a staging file and move the result into place.
    fn produce(&self, request: &R) -> Result<PathBuf, ProductionError> {
        let key = request.key();
        let extension = self.producer.extension();
        let staging = self.layout.staging_path(key, extension);
        let target = self.layout.artifact_path(key, extension);

        let produced = panic::catch_unwind(AssertUnwindSafe(|| {
            self.producer.produce(request, &staging)
        }))
        .unwrap_or_else(|_| {
            Err(ProductionError::Failed(format!(
                "Producer panicked while rendering {}",
                key
            )))
        });

        let result = produced.and_then(|written| {
            fs::rename(&written, &target).map_err(|source| ProductionError::Io {
                path: target.clone(),
                source,
            })
        });

        if result.is_err() {
            match fs::remove_file(&staging) {
                Ok(()) => log::trace!("Removed partial artifact {}", staging.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!(
                    "Failed to remove partial artifact {}: {}",
                    staging.display(),
                    e
                ),
            }
        }
        result.map(|()| target)
    }

    fn commit(&mut self, key: &ArtifactKey, artifact: PathBuf, stamp: SourceStamp) {
        self.index.upsert(CacheEntry::new(key.clone(), artifact, stamp));
        self.note_change();
    }

    fn announce(&self, request: &R, path: PathBuf, reused: bool) {
        self.listeners.emit(&CacheEvent::ArtifactReady {
            key: request.key().clone(),
            path,
            invalidation_roles: request.invalidation_roles().clone(),
            reused,
        });
    }

    fn fail(&self, key: &ArtifactKey, error: ProductionError) {
        log::warn!("Failed to produce artifact for {}: {}", key, error);
        self.monitor.record_failed();
        self.listeners.emit(&CacheEvent::ProductionFailed {
            key: key.clone(),
            reason: error.to_string(),
        });
    }

    fn note_change(&mut self) {
        self.unsaved_changes += 1;
        if self.unsaved_changes >= self.save_interval {
            self.save_index();
        }
    }

    fn save_index(&mut self) {
        if !self.index.is_dirty() {
            log::trace!("Index unchanged, skipping save");
            self.unsaved_changes = 0;
            return;
        }
        match self.index.save() {
            Ok(entries) => {
                log::debug!(
                    "Saved {} index entries to {}",
                    entries,
                    self.index.store().path().display()
                );
                self.unsaved_changes = 0;
                self.monitor.record_save(true);
                self.listeners.emit(&CacheEvent::IndexSaved { entries });
            }
            Err(e) => {
                log::warn!("Failed to save artifact index, keeping it in memory: {}", e);
                self.unsaved_changes = 0;
                self.monitor.record_save(false);
            }
        }
    }
}

/// Stops the queue if the worker thread unwinds.
struct StopOnUnwind<R: ArtifactRequest> {
    queue: Arc<WorkQueue<R>>,
    monitor: Arc<WorkerMonitor>,
}

impl<R: ArtifactRequest> Drop for StopOnUnwind<R> {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        // State first: flush waiters woken by the stop must see the worker gone.
        self.monitor.set_state(WorkerState::Stopped);
        let discarded = self.queue.stop();
        log::error!(
            "Artifact worker panicked; queue stopped, {} pending items discarded",
            discarded
        );
    }
}
