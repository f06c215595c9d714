//! Bounded downstream streams that never block the producer
//!
//! When the consumer falls behind the item is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::observability::{StructuredLogger, WatchdogMetrics};

/// Stream names used for logging and metric labels
pub mod streams {
    pub const SNAPSHOTS: &str = "snapshots";
    pub const ANOMALIES: &str = "anomalies";
    pub const STRESS_RESULTS: &str = "stress_results";
}

/// Sending half of a drop-on-full stream
pub struct Outbox<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
    dropped: AtomicU64,
    metrics: WatchdogMetrics,
    logger: StructuredLogger,
}

impl<T> Outbox<T> {
    pub fn channel(
        name: &'static str,
        capacity: usize,
        logger: StructuredLogger,
    ) -> (Self, mpsc::Receiver<T>) {
        // mpsc panics on a zero capacity
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let outbox = Self {
            name,
            tx,
            dropped: AtomicU64::new(0),
            metrics: WatchdogMetrics::new(),
            logger,
        };
        (outbox, rx)
    }

    /// Offer an item; returns false if it was dropped
    pub fn push(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                self.metrics.inc_dropped(self.name);
                self.logger.log_dropped(self.name, total);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_dropped(self.name);
                debug!(stream = self.name, "No consumer attached, item dropped");
                false
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Items dropped since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
