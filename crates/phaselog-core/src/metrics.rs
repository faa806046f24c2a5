//! Process-wide counters for log streaming.
//!
//! Counters are bumped silently at the call site. Call [`Metrics::flush`] to
//! emit current values as a single `tracing::info!` event (e.g. when a
//! stream session ends).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    streams_opened: AtomicU64,
    phases_streamed: AtomicU64,
    bytes_streamed: AtomicU64,
    sessions_aborted: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            streams_opened: AtomicU64::new(0),
            phases_streamed: AtomicU64::new(0),
            bytes_streamed: AtomicU64::new(0),
            sessions_aborted: AtomicU64::new(0),
        }
    }

    pub fn inc_streams_opened(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "streams_opened", "counter incremented");
    }

    pub fn inc_phases_streamed(&self) {
        self.phases_streamed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "phases_streamed", "counter incremented");
    }

    pub fn add_bytes_streamed(&self, n: u64) {
        self.bytes_streamed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_sessions_aborted(&self) {
        self.sessions_aborted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sessions_aborted", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            streams_opened = self.streams_opened(),
            phases_streamed = self.phases_streamed(),
            bytes_streamed = self.bytes_streamed(),
            sessions_aborted = self.sessions_aborted(),
        );
    }

    pub fn streams_opened(&self) -> u64 {
        self.streams_opened.load(Ordering::Relaxed)
    }

    pub fn phases_streamed(&self) -> u64 {
        self.phases_streamed.load(Ordering::Relaxed)
    }

    pub fn bytes_streamed(&self) -> u64 {
        self.bytes_streamed.load(Ordering::Relaxed)
    }

    pub fn sessions_aborted(&self) -> u64 {
        self.sessions_aborted.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.streams_opened.store(0, Ordering::Relaxed);
        self.phases_streamed.store(0, Ordering::Relaxed);
        self.bytes_streamed.store(0, Ordering::Relaxed);
        self.sessions_aborted.store(0, Ordering::Relaxed);
    }
}
