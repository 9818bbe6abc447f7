use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

/// Process-wide counters of the event pipeline.
///
/// Created once at startup and shared by reference. Counters only grow.
#[derive(Debug, Default)]
pub struct Metrics {
    interceptor_failures: AtomicU64,
    kevents_processed: AtomicU64,
    kevents_unknown: AtomicU64,
    kevents_cancelled: AtomicU64,
    kevents_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub interceptor_failures: u64,
    pub kevents_processed: u64,
    pub kevents_unknown: u64,
    pub kevents_cancelled: u64,
    pub kevents_dropped: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts an interceptor error that isn't a cancel-upstream signal.
    pub fn inc_interceptor_failures(&self) {
        self.interceptor_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_kevents_processed(&self) {
        self.kevents_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_kevents_unknown(&self) {
        self.kevents_unknown.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_kevents_cancelled(&self) {
        self.kevents_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_kevents_dropped(&self) {
        self.kevents_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn interceptor_failures(&self) -> u64 {
        self.interceptor_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            interceptor_failures: self.interceptor_failures(),
            kevents_processed: self.kevents_processed.load(Ordering::Relaxed),
            kevents_unknown: self.kevents_unknown.load(Ordering::Relaxed),
            kevents_cancelled: self.kevents_cancelled.load(Ordering::Relaxed),
            kevents_dropped: self.kevents_dropped.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} unknown={} cancelled={} dropped={} interceptor_failures={}",
            self.kevents_processed,
            self.kevents_unknown,
            self.kevents_cancelled,
            self.kevents_dropped,
            self.interceptor_failures
        )
    }
}
