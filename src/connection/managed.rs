//! Managed connection contract
//!
//! The minimal set of operations a connection must offer to be tracked by a
//! [`ConnectionManager`](super::ConnectionManager). Protocol implementations
//! (QUIC, HTTP, ...) implement this trait; the manager never touches bytes.

use parking_lot::Mutex;
use std::sync::Arc;

use super::id::{ConnectionId, ManagerId};

/// Shared reference to a managed connection
pub type ConnRef = Arc<dyn ManagedConnection>;

/// Operations the connection manager requires from a connection.
///
/// All methods take `&self`; implementations keep their mutable state behind
/// atomics or locks so the connection can be handed between worker threads.
/// Any of these methods may call back into the owning manager, including
/// removing the connection itself.
pub trait ManagedConnection: Send + Sync {
    /// Stable identity used for membership and timer bookkeeping
    fn id(&self) -> ConnectionId;

    /// The idle deadline scheduled by the manager has passed
    fn timeout_expired(&self);

    /// The manager cancelled this connection's idle deadline
    fn cancel_timeout(&self) {}

    /// Shutdown is pending. Advisory: the connection should stop taking new
    /// work but is not being closed yet.
    fn notify_pending_shutdown(&self);

    /// Whether the connection has in-flight work
    fn is_busy(&self) -> bool;

    /// Close now if idle, otherwise as soon as the in-flight work completes
    fn close_when_idle(&self);

    /// Close unconditionally
    fn drop_connection(&self);

    /// Log diagnostic state. Higher verbosity means more detail.
    fn dump_connection_state(&self, verbosity: u8);

    /// Current owning manager, if any
    fn manager(&self) -> Option<ManagerId>;

    /// Replace the owning manager back-reference
    fn set_manager(&self, manager: Option<ManagerId>);
}

/// Storage for the manager back-reference.
///
/// Embed one in a connection type and forward
/// [`ManagedConnection::manager`]/[`ManagedConnection::set_manager`] to it.
#[derive(Debug, Default)]
pub struct ManagerSlot(Mutex<Option<ManagerId>>);

impl ManagerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<ManagerId> {
        *self.0.lock()
    }

    pub fn set(&self, manager: Option<ManagerId>) {
        *self.0.lock() = manager;
    }
}
