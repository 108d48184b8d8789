//! Notification hook for batches that fail as a whole.

use std::sync::Arc;

use tracing::warn;
use tryl_core::{ErrorCategory, Event, TrylError};

/// Receives batches whose send failed entirely.
///
/// Called once per failed batch from the batcher's background task, after
/// retries are exhausted and every submitter has received the error. Partial
/// failures (per-item rejections) are not reported here. Implementations
/// must not block; hand the events off if slow work is needed.
pub trait BatchFailureObserver: Send + Sync + std::fmt::Debug {
    /// Handles a failed batch.
    fn on_batch_failure(&self, events: &[Event], error: &TrylError);
}

/// Observer that discards notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpObserver;

impl BatchFailureObserver for NoOpObserver {
    fn on_batch_failure(&self, _events: &[Event], _error: &TrylError) {}
}

/// Observer that logs each failed batch at `warn`.
///
/// This is the default when no observer is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl BatchFailureObserver for LoggingObserver {
    fn on_batch_failure(&self, events: &[Event], error: &TrylError) {
        warn!(
            events = events.len(),
            category = %ErrorCategory::from(error),
            error = %error,
            "batch delivery failed"
        );
    }
}

/// Forwards notifications to several observers in order.
#[derive(Debug, Default, Clone)]
pub struct MulticastObserver {
    observers: Vec<Arc<dyn BatchFailureObserver>>,
}

impl MulticastObserver {
    /// Creates an empty multicast observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer.
    #[must_use]
    pub fn with(mut self, observer: Arc<dyn BatchFailureObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl BatchFailureObserver for MulticastObserver {
    fn on_batch_failure(&self, events: &[Event], error: &TrylError) {
        for observer in &self.observers {
            observer.on_batch_failure(events, error);
        }
    }
}
