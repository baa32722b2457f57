//! Worker state and diagnostic counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use serde::Serialize;

/// Lifecycle of the processing worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Waiting for work (or not started yet).
    #[default]
    Idle,
    /// Handling a queue item.
    Running,
    /// Stop observed; writing the final index.
    Draining,
    /// Loop exited.
    Stopped,
}

impl WorkerState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Draining => 2,
            Self::Stopped => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Draining,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Point-in-time copy of the worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Current lifecycle state.
    pub state: WorkerState,
    /// Requests dequeued and handled (hit, produced or failed).
    pub processed: u64,
    /// Artifacts produced and committed to the index.
    pub produced: u64,
    /// Requests answered by a valid cached artifact.
    pub reused: u64,
    /// Requests whose production failed.
    pub failed: u64,
    /// Successful index saves.
    pub saves: u64,
    /// Failed index saves.
    pub save_failures: u64,
}

/// Counters owned by the worker and readable from other threads.
#[derive(Debug, Default)]
pub struct WorkerMonitor {
    state: AtomicU8,
    processed: AtomicU64,
    produced: AtomicU64,
    reused: AtomicU64,
    failed: AtomicU64,
    saves: AtomicU64,
    save_failures: AtomicU64,
}

impl WorkerMonitor {
    /// Fresh monitor in the `Idle` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_produced(&self) {
        self.produced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reused(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_save(&self, ok: bool) {
        if ok {
            self.saves.fetch_add(1, Ordering::Relaxed);
        } else {
            self.save_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            state: self.state(),
            processed: self.processed.load(Ordering::Relaxed),
            produced: self.produced.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
        }
    }
}
