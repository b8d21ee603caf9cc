//! Idle timeout tracking

use std::rc::Rc;
use std::time::Duration;
use tracing::trace;

use super::managed::{ConnRef, ManagedConnection};
use crate::event_loop::EventLoop;
use crate::metrics::METRICS;

/// Binds connections to the loop's timer primitive with one default duration
pub struct IdleTimeoutTracker {
    event_loop: Rc<dyn EventLoop>,
    default_timeout: Duration,
}

impl IdleTimeoutTracker {
    pub fn new(event_loop: Rc<dyn EventLoop>, default_timeout: Duration) -> Self {
        Self {
            event_loop,
            default_timeout,
        }
    }

    /// Idle deadline applied by [`schedule`](Self::schedule)
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Set the connection's idle deadline to the default duration from now.
    /// An already armed deadline is replaced.
    pub fn schedule(&self, conn: &ConnRef) {
        trace!(conn_id = %conn.id(), timeout_ms = self.default_timeout.as_millis() as u64, "Scheduling idle timeout");
        self.event_loop.schedule_idle_timeout(conn, self.default_timeout);
        METRICS.timeout_scheduled();
    }

    /// Disarm the connection's idle deadline
    pub fn cancel(&self, conn: &dyn ManagedConnection) {
        self.event_loop.cancel_idle_timeout(conn.id());
        conn.cancel_timeout();
    }
}
