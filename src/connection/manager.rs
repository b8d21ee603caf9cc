//! Connection manager
//!
//! Tracks the connections owned by one event loop, arms their idle
//! timeouts and reports membership changes to an optional observer. The
//! shutdown state machine lives in [`drain`](super::drain).

use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::drain::{DrainPhase, DrainState};
use super::id::{ConnectionId, ManagerId};
use super::managed::{ConnRef, ManagedConnection};
use super::set::ConnectionSet;
use super::timeout::IdleTimeoutTracker;
use crate::event_loop::EventLoop;
use crate::metrics::METRICS;

thread_local! {
    /// Managers alive on this thread, so back-references can be resolved
    static MANAGERS: RefCell<HashMap<ManagerId, Weak<ConnectionManager>>> =
        RefCell::new(HashMap::new());
}

/// Connection manager configuration
#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    /// Idle timeout applied to connections added with timeouts enabled
    pub idle_timeout: Duration,
}

/// Observer of membership changes.
///
/// Implementations may call back into the manager.
pub trait ConnectionManagerCallback {
    fn on_connection_added(&self, manager: &ConnectionManager);
    fn on_connection_removed(&self, manager: &ConnectionManager);
    /// The last connection left the manager
    fn on_empty(&self, manager: &ConnectionManager);
}

/// Point-in-time view of a manager
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub manager: u64,
    pub connections: usize,
    pub phase: DrainPhase,
    pub idle_timeout_ms: u64,
}

pub(super) struct ManagerState {
    pub(super) conns: ConnectionSet,
    pub(super) drain: DrainState,
}

/// Manages all connections of one event loop.
///
/// Not thread-safe: a manager lives on the thread that created it and is
/// handed out as `Rc<ConnectionManager>`.
///
/// Connections are `Send` and can change threads, but only after leaving
/// their manager: call [`remove_connection`](Self::remove_connection) on the
/// owning thread, send the connection over, then
/// [`add_connection`](Self::add_connection) on the new thread. Adding a
/// connection still owned by a manager on another thread panics. Between
/// managers on the same thread `add_connection` transfers directly.
pub struct ConnectionManager {
    id: ManagerId,
    pub(super) self_ref: Weak<ConnectionManager>,
    pub(super) event_loop: Rc<dyn EventLoop>,
    pub(super) timeouts: IdleTimeoutTracker,
    callback: Option<Rc<dyn ConnectionManagerCallback>>,
    pub(super) state: RefCell<ManagerState>,
}

impl ConnectionManager {
    /// Create a new connection manager bound to `event_loop`
    pub fn new(
        event_loop: Rc<dyn EventLoop>,
        config: ConnectionManagerConfig,
        callback: Option<Rc<dyn ConnectionManagerCallback>>,
    ) -> Rc<Self> {
        let id = ManagerId::next();

        let manager = Rc::new_cyclic(|self_ref| Self {
            id,
            self_ref: self_ref.clone(),
            timeouts: IdleTimeoutTracker::new(event_loop.clone(), config.idle_timeout),
            event_loop,
            callback,
            state: RefCell::new(ManagerState {
                conns: ConnectionSet::new(),
                drain: DrainState::default(),
            }),
        });

        MANAGERS.with(|managers| {
            managers.borrow_mut().insert(id, Rc::downgrade(&manager));
        });

        debug!(
            manager = %id,
            idle_timeout_ms = config.idle_timeout.as_millis() as u64,
            "Connection manager created"
        );

        manager
    }

    /// Resolve a manager back-reference on the current thread
    pub fn lookup(id: ManagerId) -> Option<Rc<ConnectionManager>> {
        MANAGERS.with(|managers| managers.borrow().get(&id).and_then(Weak::upgrade))
    }

    pub fn id(&self) -> ManagerId {
        self.id
    }

    /// Start managing `conn`, taking it over from its previous manager if
    /// needed, and (re)arm its idle timeout when `enable_timeout` is set.
    ///
    /// Adding a connection this manager already owns only refreshes the
    /// timeout.
    ///
    /// # Panics
    ///
    /// If `conn` is still owned by a live manager on another thread. Such a
    /// connection must be removed on its own thread before being added here.
    pub fn add_connection(&self, conn: ConnRef, enable_timeout: bool) {
        let previous = conn.manager();

        if previous != Some(self.id) {
            if self.state.borrow().conns.contains(conn.id()) {
                warn!(
                    manager = %self.id,
                    conn_id = %conn.id(),
                    "Connection id already in use by another member, not adding"
                );
                return;
            }

            if let Some(previous) = previous {
                match Self::lookup(previous) {
                    Some(old) => {
                        debug!(
                            conn_id = %conn.id(),
                            from = %previous,
                            to = %self.id,
                            "Transferring connection between managers"
                        );
                        old.remove_connection(conn.as_ref());
                    }
                    None => panic!(
                        "connection {} is owned by {} on another thread; call remove_connection \
                         on that thread before handing the connection over",
                        conn.id(),
                        previous
                    ),
                }
            }

            let inserted = self.state.borrow_mut().conns.push_back(conn.clone());
            if !inserted {
                // A callback run by the previous owner claimed the id meanwhile
                warn!(manager = %self.id, conn_id = %conn.id(), "Connection id collision, not adding");
                return;
            }
            conn.set_manager(Some(self.id));

            METRICS.connection_added();
            trace!(manager = %self.id, conn_id = %conn.id(), "Connection added");
            if let Some(callback) = &self.callback {
                callback.on_connection_added(self);
            }
        }

        if enable_timeout {
            self.schedule_timeout(&conn);
        }
    }

    /// Set the connection's idle deadline to the default timeout from now
    pub fn schedule_timeout(&self, conn: &ConnRef) {
        self.timeouts.schedule(conn);
    }

    /// Stop managing `conn`. A no-op unless this manager currently owns it.
    ///
    /// Safe to call from inside any callback the manager invokes, including
    /// while a drain pass is visiting `conn`.
    pub fn remove_connection(&self, conn: &dyn ManagedConnection) {
        if conn.manager() != Some(self.id) {
            return;
        }

        // Detach first: the connection may call back into the manager
        conn.set_manager(None);
        self.timeouts.cancel(conn);

        let (removed, now_empty) = {
            let mut state = self.state.borrow_mut();
            let removed = state.conns.remove(conn.id());
            (removed, state.conns.is_empty())
        };

        if removed.is_none() {
            debug!(manager = %self.id, conn_id = %conn.id(), "Owned connection was not linked");
            return;
        }

        METRICS.connection_removed();
        trace!(manager = %self.id, conn_id = %conn.id(), "Connection removed");

        if let Some(callback) = &self.callback {
            callback.on_connection_removed(self);
            if now_empty {
                callback.on_empty(self);
            }
        }
    }

    /// Get current connection count
    pub fn connection_count(&self) -> usize {
        self.state.borrow().conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().conns.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.state.borrow().conns.contains(id)
    }

    /// Snapshot of the managed connections in insertion order
    pub fn connections(&self) -> Vec<ConnRef> {
        self.state.borrow().conns.iter().cloned().collect()
    }

    /// Connection the next drain batch resumes from, if a pass is in progress
    pub fn drain_cursor(&self) -> Option<ConnectionId> {
        self.state.borrow().conns.cursor_id()
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeouts.default_timeout()
    }

    pub fn stats(&self) -> ManagerStats {
        let state = self.state.borrow();
        ManagerStats {
            manager: self.id.as_u64(),
            connections: state.conns.len(),
            phase: state.drain.phase,
            idle_timeout_ms: self.default_timeout().as_millis() as u64,
        }
    }

    pub(super) fn dispatch_empty(&self) {
        if let Some(callback) = &self.callback {
            callback.on_empty(self);
        }
    }

    /// Keep the manager alive for the rest of the enclosing scope, even if a
    /// callback drops the last outside reference
    pub(super) fn pin(&self) -> Option<Rc<ConnectionManager>> {
        self.self_ref.upgrade()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = MANAGERS.try_with(|managers| {
            managers.borrow_mut().remove(&self.id);
        });

        let state = self.state.get_mut();
        let pending = [state.drain.grace_timer.take(), state.drain.continuation.take()];
        for handle in pending.into_iter().flatten() {
            self.event_loop.cancel(handle);
        }

        if !state.conns.is_empty() {
            warn!(
                manager = %self.id,
                remaining = state.conns.len(),
                "Connection manager dropped with live connections"
            );
            let mut detached = 0u64;
            while let Some(conn) = state.conns.pop_front() {
                conn.set_manager(None);
                self.event_loop.cancel_idle_timeout(conn.id());
                detached += 1;
            }
            METRICS.connections_dropped(detached);
        }
    }
}
