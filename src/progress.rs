//! Terminal progress for `artcache warm`, built on indicatif.
//!
//! [`WarmProgress`] shows a spinner while sources are discovered and a bar
//! while they are rendered. It is a [`CacheListener`], so the bar advances as
//! the worker finishes each request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::events::{CacheEvent, CacheListener};

/// Progress display for a warm run.
pub struct WarmProgress {
    discovery: Mutex<Option<ProgressBar>>,
    rendering: Mutex<Option<ProgressBar>>,
    produced: AtomicU64,
    reused: AtomicU64,
    failed: AtomicU64,
    quiet: bool,
}

impl WarmProgress {
    /// Create a progress display. A `quiet` one counts but never draws.
    ///
    /// ```
    /// use artcache::progress::WarmProgress;
    ///
    /// let progress = WarmProgress::new(true);
    /// assert_eq!(progress.failed(), 0);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            discovery: Mutex::new(None),
            rendering: Mutex::new(None),
            produced: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            quiet,
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}] {pos} sources")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    /// Show the discovery spinner.
    pub fn start_discovery(&self) {
        if self.quiet {
            return;
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(Self::spinner_style());
        pb.set_message("Collecting sources");
        pb.enable_steady_tick(Duration::from_millis(100));
        *self.discovery.lock().unwrap_or_else(PoisonError::into_inner) = Some(pb);
    }

    /// Count one discovered source.
    pub fn discovered(&self) {
        if let Some(pb) = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            pb.inc(1);
        }
    }

    /// Replace the spinner with a bar over `total` queued requests.
    pub fn start_rendering(&self, total: u64) {
        if let Some(pb) = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pb.finish_and_clear();
        }
        if self.quiet {
            return;
        }
        let pb = ProgressBar::new(total);
        pb.set_style(Self::bar_style());
        pb.set_message("Rendering thumbnails");
        *self.rendering.lock().unwrap_or_else(PoisonError::into_inner) = Some(pb);
    }

    /// Remove all bars from the terminal.
    pub fn finish(&self) {
        for slot in [&self.discovery, &self.rendering] {
            if let Some(pb) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                pb.finish_and_clear();
            }
        }
    }

    /// Artifacts produced so far.
    #[must_use]
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    /// Requests answered from the cache so far.
    #[must_use]
    pub fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }

    /// Failed requests so far.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn advance(&self, message: Option<String>) {
        let rendering = self.rendering.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pb) = rendering.as_ref() {
            if let Some(message) = message {
                pb.println(message);
            }
            pb.inc(1);
        }
    }
}

impl CacheListener for WarmProgress {
    fn on_event(&self, event: &CacheEvent) {
        match event {
            CacheEvent::ArtifactReady { reused, .. } => {
                let counter = if *reused { &self.reused } else { &self.produced };
                counter.fetch_add(1, Ordering::Relaxed);
                self.advance(None);
            }
            CacheEvent::ProductionFailed { key, reason } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.advance(Some(format!("failed: {} ({})", key, reason)));
            }
            _ => {}
        }
    }
}
