//! connmgr - Connection lifecycle management for event-loop servers
//!
//! A [`ConnectionManager`] tracks the connections owned by one event loop:
//! membership, idle timeouts, a batched two-phase graceful drain and a
//! forced drop of everything that is left. The [`server`] module runs a
//! multi-worker QUIC echo server on top of it.

pub mod config;
pub mod connection;
pub mod error;
pub mod event_loop;
pub mod metrics;
pub mod pool;
pub mod server;
pub mod util;

pub use config::Config;
pub use connection::{
    ConnRef, ConnectionId, ConnectionManager, ConnectionManagerCallback, ConnectionManagerConfig,
    DrainPhase, ManagedConnection,
};
pub use event_loop::{EventLoop, ManualLoop, TokioLoop};
pub use server::Server;

/// Server version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
