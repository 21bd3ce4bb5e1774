//! Host-pluggable logging sink.
//!
//! The crate instruments its own public surface with `tracing` directly
//! (spans and events any embedding application can subscribe to in the
//! usual way). The [`Logger`] trait below is a narrower, separate hook for
//! the specific failures this SDK is required to swallow rather than
//! propagate — a panicking hook, a provider that failed to initialize, a
//! dispatch that missed its time budget — so a host can route *those*
//! without installing a global `tracing` subscriber.

use std::sync::{Arc, RwLock};

use tracing::{debug, error, warn};

/// A sink for the errors and warnings this SDK swallows on behalf of the
/// caller rather than returning.
pub trait Logger: Send + Sync {
    fn log_error(&self, message: &str);
    fn log_warn(&self, message: &str);
    fn log_debug(&self, message: &str);
}

/// Default [`Logger`], forwarding every call into `tracing`.
#[derive(Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log_error(&self, message: &str) {
        error!(target: "open_feature", "{message}");
    }

    fn log_warn(&self, message: &str) {
        warn!(target: "open_feature", "{message}");
    }

    fn log_debug(&self, message: &str) {
        debug!(target: "open_feature", "{message}");
    }
}

/// An atomically-replaceable logger handle.
///
/// Replacement is a single pointer swap under a short-lived write lock, so a
/// `set_logger` call from the host application never blocks an in-flight
/// evaluation or dispatch for longer than that swap.
#[derive(Clone)]
pub struct LoggerHandle {
    inner: Arc<RwLock<Arc<dyn Logger>>>,
}

impl LoggerHandle {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(logger)),
        }
    }

    pub fn set(&self, logger: Arc<dyn Logger>) {
        let mut guard = self.inner.write().expect("logger lock poisoned");
        *guard = logger;
    }

    pub fn get(&self) -> Arc<dyn Logger> {
        self.inner.read().expect("logger lock poisoned").clone()
    }
}

impl Default for LoggerHandle {
    fn default() -> Self {
        Self::new(Arc::new(TracingLogger))
    }
}

impl std::fmt::Debug for LoggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerHandle").finish_non_exhaustive()
    }
}
