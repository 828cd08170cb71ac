//! Signal-driven cooperative shutdown.
//!
//! A [`ShutdownFlag`] is the one piece of state shared between the capture
//! loop, the embedding caller and the process signal handler. Setting it is
//! a single atomic store — safe from a signal handler, no allocation, no
//! blocking — and the capture loop notices it within one bounded wait
//! interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

/// Shared stop flag; clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Create a flag and register a termination-signal handler
    /// (SIGINT/SIGTERM/SIGHUP) that sets it.
    ///
    /// Handler registration failures (for example a handler already
    /// installed by the embedding application) are ignored; the returned
    /// flag can still be triggered manually.
    pub fn new() -> Self {
        let flag = Self::manual();
        let handler_flag = flag.clone();
        let _ = ctrlc::set_handler(move || {
            debug!("termination signal received");
            handler_flag.trigger();
        });
        flag
    }

    /// Create a flag without registering any signal handler.
    pub fn manual() -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)) }
    }

    /// Request shutdown. Idempotent, callable from any context.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested.
    pub fn should_stop(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
