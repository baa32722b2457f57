//! Notifications emitted by the processing worker.
//!
//! Events are delivered synchronously on the worker thread, in the order the
//! worker completed the corresponding steps. Listeners that need to hand them
//! to another thread can use [`ChannelListener`].
//!
//! # Example
//!
//! ```
//! use artcache::events::{CacheEvent, ChannelListener, Listeners};
//! use std::sync::Arc;
//!
//! let (listener, events) = ChannelListener::new();
//! let mut listeners = Listeners::new();
//! listeners.add(Arc::new(listener));
//!
//! listeners.emit(&CacheEvent::QueueIdle);
//! assert!(matches!(events.recv().unwrap(), CacheEvent::QueueIdle));
//! ```

use std::collections::BTreeSet;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use crate::cache::ArtifactKey;

/// Something the worker did that presentation layers may care about.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// An artifact for `key` is available at `path`.
    ArtifactReady {
        /// Key of the artifact.
        key: ArtifactKey,
        /// Where the artifact lives.
        path: PathBuf,
        /// Presentation roles the requester asked to refresh.
        invalidation_roles: BTreeSet<i32>,
        /// `true` when a valid cached artifact was reused instead of produced.
        reused: bool,
    },
    /// Producing the artifact for `key` failed; the request was skipped.
    ProductionFailed {
        /// Key of the request.
        key: ArtifactKey,
        /// Human-readable cause.
        reason: String,
    },
    /// The worker reached a separator.
    QueueDrained {
        /// Separator sequence number.
        separator: u64,
    },
    /// The queue ran empty after a request was processed.
    QueueIdle,
    /// The index was written to disk.
    IndexSaved {
        /// Number of entries written.
        entries: usize,
    },
    /// The worker loop exited. Always the last event.
    WorkerStopped,
}

/// Receives worker events.
pub trait CacheListener: Send + Sync {
    /// Called on the worker thread for every event.
    fn on_event(&self, event: &CacheEvent);
}

impl<F> CacheListener for F
where
    F: Fn(&CacheEvent) + Send + Sync,
{
    fn on_event(&self, event: &CacheEvent) {
        self(event);
    }
}

/// Listener forwarding clones of every event into an `mpsc` channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: Sender<CacheEvent>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, Receiver<CacheEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl CacheListener for ChannelListener {
    fn on_event(&self, event: &CacheEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.sender.send(event.clone());
    }
}

/// Fan-out over registered listeners.
#[derive(Clone, Default)]
pub struct Listeners {
    listeners: Vec<Arc<dyn CacheListener>>,
}

impl Listeners {
    /// No listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn add(&mut self, listener: Arc<dyn CacheListener>) {
        self.listeners.push(listener);
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether nobody is listening.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver `event` to every listener in registration order.
    ///
    /// A panicking listener is logged and skipped; the others still get the
    /// event.
    pub fn emit(&self, event: &CacheEvent) {
        for listener in &self.listeners {
            if let Err(payload) =
                panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event)))
            {
                log::error!(
                    "Cache listener panicked on {:?}: {}",
                    event,
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.listeners.len())
            .finish()
    }
}
