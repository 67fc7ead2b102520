//! Global atomic counters for tagrelay observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a CLI command).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    tags_published: AtomicU64,
    polls_executed: AtomicU64,
    pipelines_triggered: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            tags_published: AtomicU64::new(0),
            polls_executed: AtomicU64::new(0),
            pipelines_triggered: AtomicU64::new(0),
        }
    }

    pub fn inc_tags_published(&self) {
        self.tags_published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tags_published", "counter incremented");
    }

    pub fn inc_polls(&self) {
        self.polls_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "polls_executed", "counter incremented");
    }

    pub fn inc_pipelines_triggered(&self) {
        self.pipelines_triggered.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "pipelines_triggered", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            tags_published = self.tags_published(),
            polls_executed = self.polls_executed(),
            pipelines_triggered = self.pipelines_triggered(),
        );
    }

    pub fn tags_published(&self) -> u64 {
        self.tags_published.load(Ordering::Relaxed)
    }

    pub fn polls_executed(&self) -> u64 {
        self.polls_executed.load(Ordering::Relaxed)
    }

    pub fn pipelines_triggered(&self) -> u64 {
        self.pipelines_triggered.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.tags_published.store(0, Ordering::Relaxed);
        self.polls_executed.store(0, Ordering::Relaxed);
        self.pipelines_triggered.store(0, Ordering::Relaxed);
    }
}
