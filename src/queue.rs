//! Work queue shared by producers and the processing worker.
//!
//! The queue is a plain FIFO behind a `Mutex` with a `Condvar` to park the
//! worker while it is empty. Besides requests it carries two control markers:
//!
//! - [`Separator`]: acknowledged by the worker when it reaches it, which tells
//!   the pusher that everything queued before it has been dequeued and handled.
//! - [`QueueItem::SaveIndex`]: asks the worker to persist the index.
//!
//! A request whose key is already waiting in the queue is not queued twice.
//! Once [`WorkQueue::stop`] is called the queue discards what it holds, wakes
//! the worker with [`Popped::Stopped`] and rejects every later push.
//!
//! # Example
//!
//! ```
//! use artcache::cache::Variant;
//! use artcache::queue::{Popped, PushOutcome, QueueItem, WorkQueue};
//! use artcache::worker::CacheRequest;
//!
//! let queue = WorkQueue::new();
//! let request = CacheRequest::new("/stock/a.png", Variant::Quick);
//!
//! assert_eq!(queue.push(QueueItem::Request(request.clone())), PushOutcome::Queued);
//! assert_eq!(queue.push(QueueItem::Request(request)), PushOutcome::AlreadyQueued);
//!
//! assert!(matches!(queue.pop_blocking(), Popped::Item(QueueItem::Request(_))));
//! queue.stop();
//! assert!(matches!(queue.pop_blocking(), Popped::Stopped));
//! ```

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::cache::ArtifactKey;
use crate::worker::ArtifactRequest;

/// Marker used to detect that the queue has been drained up to a point.
pub struct Separator {
    id: u64,
    ack: Option<SyncSender<()>>,
}

impl Separator {
    /// Create a separator and the receiver that fires when the worker reaches it.
    ///
    /// If the separator is discarded instead (queue stopped), the receiver
    /// reports a disconnect.
    #[must_use]
    pub fn new(id: u64) -> (Self, Receiver<()>) {
        let (tx, rx) = mpsc::sync_channel(1);
        (Self { id, ack: Some(tx) }, rx)
    }

    /// Separator nobody waits on.
    #[must_use]
    pub fn detached(id: u64) -> Self {
        Self { id, ack: None }
    }

    /// Sequence number given at creation.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wake whoever is waiting on this separator.
    pub fn acknowledge(self) {
        if let Some(ack) = self.ack {
            // The waiter may have timed out and gone away.
            let _ = ack.send(());
        }
    }
}

impl fmt::Debug for Separator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Separator")
            .field("id", &self.id)
            .field("waited_on", &self.ack.is_some())
            .finish()
    }
}

/// One entry in the work queue.
#[derive(Debug)]
pub enum QueueItem<R> {
    /// Work for the producer.
    Request(R),
    /// Drain marker.
    Separator(Separator),
    /// Persist the index now.
    SaveIndex,
}

/// Result of pushing onto the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended to the tail.
    Queued,
    /// A request for the same key is still waiting; this one was merged into
    /// it through [`ArtifactRequest::absorb`].
    AlreadyQueued,
    /// The queue has been stopped.
    Rejected,
}

impl PushOutcome {
    /// Whether the item (or an identical pending one) will be processed.
    #[must_use]
    pub fn is_accepted(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Result of [`WorkQueue::pop_blocking`].
#[derive(Debug)]
pub enum Popped<R> {
    /// Next item in FIFO order.
    Item(QueueItem<R>),
    /// The queue was stopped; the worker should exit.
    Stopped,
}

struct QueueState<R> {
    items: VecDeque<QueueItem<R>>,
    queued_keys: HashSet<ArtifactKey>,
    stopped: bool,
}

/// Thread-safe FIFO of requests and control markers.
pub struct WorkQueue<R> {
    state: Mutex<QueueState<R>>,
    available: Condvar,
}

impl<R: ArtifactRequest> WorkQueue<R> {
    /// Create an empty, running queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                queued_keys: HashSet::new(),
                stopped: false,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item` to the tail and wake the worker.
    ///
    /// Never blocks beyond the queue lock.
    pub fn push(&self, item: QueueItem<R>) -> PushOutcome {
        let mut state = self.lock();
        if state.stopped {
            return PushOutcome::Rejected;
        }
        if let QueueItem::Request(request) = item {
            if state.queued_keys.contains(request.key()) {
                log::trace!("Already queued, merging: {}", request.key());
                let queued = state.items.iter_mut().find_map(|queued| match queued {
                    QueueItem::Request(queued) if queued.key() == request.key() => Some(queued),
                    _ => None,
                });
                if let Some(queued) = queued {
                    queued.absorb(request);
                }
                return PushOutcome::AlreadyQueued;
            }
            state.queued_keys.insert(request.key().clone());
            state.items.push_back(QueueItem::Request(request));
        } else {
            state.items.push_back(item);
        }
        drop(state);
        self.available.notify_one();
        PushOutcome::Queued
    }

    /// Remove and return the head, parking while the queue is empty.
    ///
    /// Returns [`Popped::Stopped`] as soon as the queue is stopped, even if it
    /// was parked waiting.
    pub fn pop_blocking(&self) -> Popped<R> {
        let mut state = self.lock();
        loop {
            if state.stopped {
                return Popped::Stopped;
            }
            if let Some(item) = state.items.pop_front() {
                if let QueueItem::Request(request) = &item {
                    state.queued_keys.remove(request.key());
                }
                return Popped::Item(item);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stop the queue, discarding everything not yet dequeued.
    ///
    /// Returns the number of discarded items. Calling it again is a no-op.
    pub fn stop(&self) -> usize {
        let discarded = {
            let mut state = self.lock();
            if state.stopped {
                return 0;
            }
            state.stopped = true;
            state.queued_keys.clear();
            std::mem::take(&mut state.items)
        };
        self.available.notify_all();
        // Dropped outside the lock; this releases pending flush waiters.
        let count = discarded.len();
        drop(discarded);
        count
    }

    /// Whether [`WorkQueue::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Whether no items are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Number of waiting items, markers included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }
}

impl<R: ArtifactRequest> Default for WorkQueue<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for WorkQueue<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("WorkQueue")
            .field("len", &state.items.len())
            .field("stopped", &state.stopped)
            .finish()
    }
}
