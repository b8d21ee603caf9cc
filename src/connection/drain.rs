//! Graceful and forced shutdown of managed connections
//!
//! Graceful shutdown runs in two phases. During [`DrainPhase::Notify`] every
//! connection is told that shutdown is pending; once the idle grace period
//! expires the manager moves to [`DrainPhase::CloseIdle`] and asks every
//! connection to close as soon as it is idle. Each pass over the membership
//! set is split into batches of [`DRAIN_BATCH_SIZE`] connections, continued
//! on later loop turns, so a large manager never stalls its loop.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use super::manager::ConnectionManager;
use crate::event_loop::TaskHandle;
use crate::metrics::METRICS;

/// Connections visited per drain batch
pub const DRAIN_BATCH_SIZE: usize = 64;

/// Connections whose state is dumped by [`ConnectionManager::drop_all_connections`]
pub const MAX_CONNS_TO_DUMP: usize = 2;

const DUMP_VERBOSITY: u8 = 3;

/// Shutdown phase. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum DrainPhase {
    #[default]
    NotDraining,
    /// Connections are told shutdown is pending
    Notify,
    /// Connections are closed once idle
    CloseIdle,
}

/// What a single drain batch did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Connections visited in this batch
    pub visited: usize,
    /// Connections notified of pending shutdown
    pub notified: usize,
    /// Idle connections asked to close
    pub idle_closed: usize,
    /// Busy connections asked to close once idle
    pub busy_kept: usize,
    /// The pass reached the end of the membership set
    pub finished: bool,
}

#[derive(Debug, Default)]
pub(super) struct DrainState {
    pub(super) phase: DrainPhase,
    pub(super) grace_timer: Option<TaskHandle>,
    pub(super) continuation: Option<TaskHandle>,
}

impl ConnectionManager {
    pub fn phase(&self) -> DrainPhase {
        self.state.borrow().drain.phase
    }

    pub fn is_draining(&self) -> bool {
        self.phase() != DrainPhase::NotDraining
    }

    /// Begin graceful shutdown.
    ///
    /// With a non-zero `idle_grace` connections are first notified and only
    /// closed once idle after the grace period expires. With a zero grace
    /// the notify phase is skipped. The first drain batch runs immediately.
    pub fn initiate_graceful_shutdown(&self, idle_grace: Duration) {
        let _pin = self.pin();

        if !idle_grace.is_zero() && self.phase() < DrainPhase::CloseIdle {
            self.advance_phase(DrainPhase::Notify);
            self.arm_grace_timer(idle_grace);
            info!(
                manager = %self.id(),
                grace_ms = idle_grace.as_millis() as u64,
                connections = self.connection_count(),
                "Scheduling idle grace period"
            );
        } else {
            self.advance_phase(DrainPhase::CloseIdle);
            info!(
                manager = %self.id(),
                connections = self.connection_count(),
                "Proceeding directly to closing idle connections"
            );
        }

        self.drain_batch();
    }

    /// Process the next batch of at most [`DRAIN_BATCH_SIZE`] connections,
    /// resuming where the previous batch stopped. If connections remain
    /// after the batch, another batch is scheduled on a later loop turn.
    pub fn drain_batch(&self) -> BatchOutcome {
        let _pin = self.pin();
        let mut outcome = BatchOutcome::default();

        let phase = self.phase();
        if phase == DrainPhase::NotDraining {
            return outcome;
        }

        let mut position = {
            let state = self.state.borrow();
            state.conns.cursor().or_else(|| state.conns.front())
        };

        while outcome.visited < DRAIN_BATCH_SIZE {
            // Step the cursor past the connection before acting on it; the
            // action may remove this or any other connection.
            let conn = {
                let mut state = self.state.borrow_mut();
                let Some(conn) = position.and_then(|handle| state.conns.get(handle).cloned()) else {
                    break;
                };
                let next = position.and_then(|handle| state.conns.next_of(handle));
                state.conns.set_cursor(next);
                conn
            };

            outcome.visited += 1;
            match phase {
                DrainPhase::Notify => {
                    conn.notify_pending_shutdown();
                    outcome.notified += 1;
                }
                DrainPhase::CloseIdle => {
                    if conn.is_busy() {
                        outcome.busy_kept += 1;
                    } else {
                        outcome.idle_closed += 1;
                    }
                    conn.close_when_idle();
                }
                DrainPhase::NotDraining => unreachable!("drain batch without a shutdown phase"),
            }

            position = self.state.borrow().conns.cursor();
        }

        METRICS.drain_batch(outcome.notified, outcome.idle_closed, outcome.busy_kept);
        if phase == DrainPhase::CloseIdle {
            debug!(
                manager = %self.id(),
                idle_closed = outcome.idle_closed,
                busy_kept = outcome.busy_kept,
                "Idle connections cleared"
            );
        }

        outcome.finished = position.is_none();
        if outcome.finished {
            let stale = {
                let mut state = self.state.borrow_mut();
                state.conns.reset_cursor();
                state.drain.continuation.take()
            };
            if let Some(handle) = stale {
                self.event_loop.cancel(handle);
            }
            if phase == DrainPhase::CloseIdle {
                debug!(manager = %self.id(), remaining = self.connection_count(), "Drain pass complete");
            }
        } else {
            self.schedule_continuation();
        }

        outcome
    }

    /// Close every connection immediately, busy or not.
    ///
    /// Cancels any pending grace period or drain continuation. Connections
    /// are detached without `on_connection_removed` notifications; `on_empty`
    /// fires once if anything was dropped.
    pub fn drop_all_connections(&self) {
        let _pin = self.pin();
        self.cancel_drain_tasks();

        debug!(manager = %self.id(), count = self.connection_count(), "Connections to drop");

        let mut dropped = 0;
        loop {
            let conn = self.state.borrow_mut().conns.pop_front();
            let Some(conn) = conn else { break };

            conn.set_manager(None);
            self.timeouts.cancel(conn.as_ref());

            dropped += 1;
            if dropped <= MAX_CONNS_TO_DUMP {
                conn.dump_connection_state(DUMP_VERBOSITY);
            }
            conn.drop_connection();
        }

        self.state.borrow_mut().conns.reset_cursor();
        self.cancel_drain_tasks();

        if dropped > 0 {
            METRICS.connections_dropped(dropped as u64);
            info!(manager = %self.id(), dropped, "Dropped all connections");
            self.dispatch_empty();
        }
    }

    /// Move the phase forward. Entering a new phase restarts the walk from
    /// the first connection.
    fn advance_phase(&self, target: DrainPhase) {
        let cancelled = {
            let mut state = self.state.borrow_mut();
            if target <= state.drain.phase {
                return;
            }
            state.drain.phase = target;
            state.conns.reset_cursor();

            let mut cancelled = vec![state.drain.continuation.take()];
            if target == DrainPhase::CloseIdle {
                cancelled.push(state.drain.grace_timer.take());
            }
            cancelled
        };

        for handle in cancelled.into_iter().flatten() {
            self.event_loop.cancel(handle);
        }
        debug!(manager = %self.id(), phase = ?target, "Drain phase advanced");
    }

    fn arm_grace_timer(&self, idle_grace: Duration) {
        let weak = self.self_ref.clone();
        let handle = self.event_loop.schedule_one_shot(
            idle_grace,
            Box::new(move || {
                if let Some(manager) = weak.upgrade() {
                    manager.idle_grace_expired();
                }
            }),
        );

        let previous = self.state.borrow_mut().drain.grace_timer.replace(handle);
        if let Some(previous) = previous {
            self.event_loop.cancel(previous);
        }
    }

    fn idle_grace_expired(&self) {
        self.state.borrow_mut().drain.grace_timer = None;
        info!(manager = %self.id(), "Idle grace period expired");
        self.advance_phase(DrainPhase::CloseIdle);
        self.drain_batch();
    }

    fn schedule_continuation(&self) {
        if self.state.borrow().drain.continuation.is_some() {
            return;
        }

        let weak = self.self_ref.clone();
        let handle = self.event_loop.run_on_next_turn(Box::new(move || {
            if let Some(manager) = weak.upgrade() {
                manager.state.borrow_mut().drain.continuation = None;
                manager.drain_batch();
            }
        }));
        self.state.borrow_mut().drain.continuation = Some(handle);
    }

    fn cancel_drain_tasks(&self) {
        let pending = {
            let mut state = self.state.borrow_mut();
            [state.drain.grace_timer.take(), state.drain.continuation.take()]
        };
        for handle in pending.into_iter().flatten() {
            self.event_loop.cancel(handle);
        }
    }
}
