//! Background artifact production.
//!
//! This module provides the worker side of the pipeline:
//! - [`request`]: what the worker consumes ([`ArtifactRequest`], [`CacheRequest`])
//! - [`producer`]: pluggable rendering and source inspection capabilities
//! - [`processor`]: the single-threaded processing loop
//! - [`monitor`]: lifecycle state and counters readable from other threads
//! - [`thumbnail`]: the default still-image thumbnail producer
//!
//! # Example
//!
//! ```no_run
//! use artcache::cache::{CacheIndex, CacheLayout, Variant};
//! use artcache::queue::{QueueItem, WorkQueue};
//! use artcache::worker::{CacheRequest, ImageThumbnailer, ProcessingWorker};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let layout = CacheLayout::new("/tmp/artcache");
//! let index = Arc::new(CacheIndex::new(layout.index_store()));
//! index.load();
//!
//! let queue = Arc::new(WorkQueue::new());
//! queue.push(QueueItem::Request(CacheRequest::new("/stock/a.png", Variant::Full)));
//!
//! let worker = ProcessingWorker::new(
//!     Arc::clone(&queue),
//!     index,
//!     layout,
//!     ImageThumbnailer::default(),
//! );
//! let handle = thread::spawn(move || worker.run());
//! queue.stop();
//! let stats = handle.join().unwrap();
//! println!("{} artifacts produced", stats.produced);
//! ```

pub mod monitor;
pub mod processor;
pub mod producer;
pub mod request;
pub mod thumbnail;

pub use monitor::{WorkerMonitor, WorkerState, WorkerStats};
pub use processor::{ProcessingWorker, DEFAULT_SAVE_INTERVAL};
pub use producer::{ArtifactProducer, FsSourceInspector, ProductionError, SourceInspector};
pub use request::{ArtifactRequest, CacheRequest};
pub use thumbnail::{ImageThumbnailer, DEFAULT_QUICK_THUMBNAIL_SIZE, DEFAULT_THUMBNAIL_SIZE};
