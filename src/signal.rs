//! Ctrl+C handling.
//!
//! A [`ShutdownHandler`] combines a shared flag with hooks that run once when
//! shutdown is requested. The CLI registers a hook calling
//! [`CacheService::signal_stop`](crate::service::CacheService::signal_stop), so
//! an interrupt lets the in-flight artifact finish, drops the rest of the queue
//! and still writes the index.
//!
//! ```rust,no_run
//! use artcache::signal::install_handler;
//!
//! let handler = install_handler().expect("signal handler");
//! handler.on_shutdown(|| eprintln!("stopping"));
//! if handler.is_shutdown_requested() {
//!     return;
//! }
//! ```

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Inner {
    requested: AtomicBool,
    hooks: Mutex<Vec<Hook>>,
}

/// Shared shutdown flag with callbacks.
#[derive(Clone, Default)]
pub struct ShutdownHandler {
    inner: Arc<Inner>,
}

impl ShutdownHandler {
    /// New handler with no shutdown requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Set the flag and run the hooks. Only the first call runs them.
    pub fn request_shutdown(&self) {
        if self.inner.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        let hooks = self.inner.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        for hook in hooks.iter() {
            hook();
        }
    }

    /// Run `hook` on shutdown, or right away if shutdown was already requested.
    pub fn on_shutdown<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut hooks = self.inner.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_shutdown_requested() {
            drop(hooks);
            hook();
            return;
        }
        hooks.push(Box::new(hook));
    }

    /// Clear the flag and forget all hooks.
    pub fn reset(&self) {
        self.inner
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.inner.requested.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for ShutdownHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandler")
            .field("requested", &self.is_shutdown_requested())
            .finish()
    }
}

/// Error installing the Ctrl+C handler.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// `ctrlc` refused to install the handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: Mutex<Option<ShutdownHandler>> = Mutex::new(None);

/// Install the process-wide Ctrl+C handler.
///
/// Later calls return the same handler after [`ShutdownHandler::reset`], so
/// running the CLI entry point several times in one process works.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    let mut global = GLOBAL_HANDLER.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handler) = global.as_ref() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let signalled = handler.clone();
    ctrlc::set_handler(move || {
        let _ = writeln!(std::io::stderr(), "\nInterrupted. Finishing current item...");
        let _ = std::io::stderr().flush();
        log::info!("Shutdown signal received");
        signalled.request_shutdown();
    })?;

    *global = Some(handler.clone());
    Ok(handler)
}
