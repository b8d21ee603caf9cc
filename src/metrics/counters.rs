//! Atomic counters for hot-path metrics
//!
//! Lock-free counters that can be safely updated from any worker thread.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

/// Atomic metrics counters
pub struct Metrics {
    // Membership metrics
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_removed: AtomicU64,
    pub connections_dropped: AtomicU64,
    pub connections_failed: AtomicU64,

    // Idle timeout metrics
    pub timeouts_scheduled: AtomicU64,
    pub timeouts_expired: AtomicU64,

    // Drain metrics
    pub drain_batches: AtomicU64,
    pub drain_notified: AtomicU64,
    pub drain_idle_closed: AtomicU64,
    pub drain_busy_kept: AtomicU64,

    // Stream metrics
    pub streams_opened: AtomicU64,
    pub streams_closed: AtomicU64,
    pub bytes_echoed: AtomicU64,

    // Error metrics
    pub errors_total: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_removed: AtomicU64::new(0),
            connections_dropped: AtomicU64::new(0),
            connections_failed: AtomicU64::new(0),
            timeouts_scheduled: AtomicU64::new(0),
            timeouts_expired: AtomicU64::new(0),
            drain_batches: AtomicU64::new(0),
            drain_notified: AtomicU64::new(0),
            drain_idle_closed: AtomicU64::new(0),
            drain_busy_kept: AtomicU64::new(0),
            streams_opened: AtomicU64::new(0),
            streams_closed: AtomicU64::new(0),
            bytes_echoed: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
        }
    }

    // Membership tracking
    #[inline]
    pub fn connection_added(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_removed(&self) {
        self.connections_removed.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connections_dropped(&self, count: u64) {
        self.connections_dropped.fetch_add(count, Ordering::Relaxed);
        self.connections_active.fetch_sub(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_failed(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    // Idle timeout tracking
    #[inline]
    pub fn timeout_scheduled(&self) {
        self.timeouts_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn timeout_expired(&self) {
        self.timeouts_expired.fetch_add(1, Ordering::Relaxed);
    }

    // Drain tracking
    #[inline]
    pub fn drain_batch(&self, notified: usize, idle_closed: usize, busy_kept: usize) {
        self.drain_batches.fetch_add(1, Ordering::Relaxed);
        self.drain_notified.fetch_add(notified as u64, Ordering::Relaxed);
        self.drain_idle_closed.fetch_add(idle_closed as u64, Ordering::Relaxed);
        self.drain_busy_kept.fetch_add(busy_kept as u64, Ordering::Relaxed);
    }

    // Stream tracking
    #[inline]
    pub fn stream_opened(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn stream_closed(&self) {
        self.streams_closed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn bytes_echoed(&self, count: u64) {
        self.bytes_echoed.fetch_add(count, Ordering::Relaxed);
    }

    // Error tracking
    #[inline]
    pub fn error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_removed: self.connections_removed.load(Ordering::Relaxed),
            connections_dropped: self.connections_dropped.load(Ordering::Relaxed),
            connections_failed: self.connections_failed.load(Ordering::Relaxed),
            timeouts_scheduled: self.timeouts_scheduled.load(Ordering::Relaxed),
            timeouts_expired: self.timeouts_expired.load(Ordering::Relaxed),
            drain_batches: self.drain_batches.load(Ordering::Relaxed),
            drain_notified: self.drain_notified.load(Ordering::Relaxed),
            drain_idle_closed: self.drain_idle_closed.load(Ordering::Relaxed),
            drain_busy_kept: self.drain_busy_kept.load(Ordering::Relaxed),
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_closed: self.streams_closed.load(Ordering::Relaxed),
            bytes_echoed: self.bytes_echoed.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics for reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_removed: u64,
    pub connections_dropped: u64,
    pub connections_failed: u64,
    pub timeouts_scheduled: u64,
    pub timeouts_expired: u64,
    pub drain_batches: u64,
    pub drain_notified: u64,
    pub drain_idle_closed: u64,
    pub drain_busy_kept: u64,
    pub streams_opened: u64,
    pub streams_closed: u64,
    pub bytes_echoed: u64,
    pub errors_total: u64,
}
