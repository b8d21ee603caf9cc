//! Event loop primitives
//!
//! The connection manager never owns a loop; it schedules work through the
//! [`EventLoop`] trait. Two implementations ship with the crate:
//!
//! - [`TokioLoop`] drives everything with `spawn_local` tasks and must be used
//!   from inside a `tokio::task::LocalSet`.
//! - [`ManualLoop`] keeps a virtual clock that only moves when told to, which
//!   makes drain and timeout behaviour reproducible in tests and simulations.

mod manual;
mod tokio_loop;

use std::time::Duration;

use crate::connection::{ConnRef, ConnectionId};

pub use manual::ManualLoop;
pub use tokio_loop::TokioLoop;

/// A unit of work scheduled on the loop
pub type LoopTask = Box<dyn FnOnce() + 'static>;

/// Handle used to cancel a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

impl TaskHandle {
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Scheduling primitives of a single-threaded event loop.
///
/// Idle timeouts are keyed by connection: scheduling again for the same
/// connection replaces the previous deadline, and cancelling an unknown
/// connection is a no-op. Tasks are one-shot; cancelling a task that already
/// ran is a no-op.
pub trait EventLoop {
    /// Arm (or re-arm) the idle deadline of `conn`, `after` from now.
    /// On expiry the loop calls [`ManagedConnection::timeout_expired`](crate::connection::ManagedConnection::timeout_expired).
    fn schedule_idle_timeout(&self, conn: &ConnRef, after: Duration);

    /// Disarm the idle deadline of the connection
    fn cancel_idle_timeout(&self, id: ConnectionId);

    /// Run `task` on a later turn of the loop, after currently ready work
    fn run_on_next_turn(&self, task: LoopTask) -> TaskHandle;

    /// Run `task` once, `after` from now
    fn schedule_one_shot(&self, after: Duration, task: LoopTask) -> TaskHandle;

    /// Cancel a task scheduled with [`run_on_next_turn`](Self::run_on_next_turn)
    /// or [`schedule_one_shot`](Self::schedule_one_shot)
    fn cancel(&self, handle: TaskHandle);
}
