//! Connection management
//!
//! Membership, idle timeouts and shutdown draining for the connections of
//! one event loop.

mod drain;
mod id;
mod managed;
mod manager;
mod set;
mod timeout;

pub use drain::{BatchOutcome, DrainPhase, DRAIN_BATCH_SIZE, MAX_CONNS_TO_DUMP};
pub use id::{ConnectionId, ManagerId};
pub use managed::{ConnRef, ManagedConnection, ManagerSlot};
pub use manager::{
    ConnectionManager, ConnectionManagerCallback, ConnectionManagerConfig, ManagerStats,
};
pub use set::ConnectionSet;
pub use timeout::IdleTimeoutTracker;
