use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

use crate::lifecycle::ProgressTracker;

/// Progress callback handed to the analysis adapter.
///
/// Reports are clamped to 0..=100 and anything that would not advance the
/// job is dropped. Accepted values are queued in order for the job's sink;
/// reporting never blocks the caller.
#[derive(Clone)]
pub struct ProgressReporter {
    tracker: Arc<Mutex<ProgressTracker>>,
    tx: mpsc::UnboundedSender<i32>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<i32>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = Self {
            tracker: Arc::new(Mutex::new(ProgressTracker::new())),
            tx,
        };
        (reporter, rx)
    }

    /// A reporter whose reports go nowhere.
    pub fn detached() -> Self {
        Self::channel().0
    }

    pub fn report(&self, percent: i32) {
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(accepted) = tracker.observe(percent) {
            // receiver is gone once the job reached a terminal state
            let _ = self.tx.send(accepted);
        }
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<i32> {
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
    }
}
