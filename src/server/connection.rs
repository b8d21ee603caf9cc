//! QUIC connections under connection-manager control

use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use crate::connection::{ConnectionId, ManagedConnection, ManagerId, ManagerSlot};
use crate::metrics::METRICS;

/// Application close code sent when the server shuts a connection down
pub const CLOSE_SHUTDOWN: u32 = 0;
/// Application close code sent when a connection sat idle too long
pub const CLOSE_IDLE_TIMEOUT: u32 = 1;

/// Stream accounting behind [`QuicConnection`]'s shutdown behavior.
///
/// A close requested while streams are open is deferred until the last one
/// finishes. Each method that returns `true` tells the caller to close now;
/// at most one call ever does.
#[derive(Debug, Default)]
pub struct StreamGate {
    open_streams: AtomicU32,
    shutdown_notified: AtomicBool,
    close_pending: AtomicBool,
    closing: AtomicBool,
}

impl StreamGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) {
        self.open_streams.fetch_add(1, Ordering::SeqCst);
    }

    /// A stream finished. Returns `true` if it was the last one and a close
    /// was waiting for it.
    pub fn closed(&self) -> bool {
        let previous = self.open_streams.fetch_sub(1, Ordering::SeqCst);
        previous == 1 && self.close_pending.load(Ordering::SeqCst) && self.claim_close()
    }

    /// Request a close once idle. Returns `true` if no stream is open.
    pub fn close_when_idle(&self) -> bool {
        self.close_pending.store(true, Ordering::SeqCst);
        !self.is_busy() && self.claim_close()
    }

    /// Returns `true` only for the first shutdown notice
    pub fn first_notice(&self) -> bool {
        !self.shutdown_notified.swap(true, Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.open_streams() > 0
    }

    pub fn open_streams(&self) -> u32 {
        self.open_streams.load(Ordering::SeqCst)
    }

    pub fn shutdown_notified(&self) -> bool {
        self.shutdown_notified.load(Ordering::SeqCst)
    }

    pub fn close_pending(&self) -> bool {
        self.close_pending.load(Ordering::SeqCst)
    }

    fn claim_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }
}

/// A QUIC connection tracked by a worker's connection manager.
///
/// Busy while at least one stream is being served.
pub struct QuicConnection {
    id: ConnectionId,
    inner: quinn::Connection,
    manager: ManagerSlot,
    connected_at: Instant,
    streams: StreamGate,
}

impl QuicConnection {
    pub fn new(inner: quinn::Connection) -> Self {
        Self {
            id: ConnectionId::next(),
            inner,
            manager: ManagerSlot::new(),
            connected_at: Instant::now(),
            streams: StreamGate::new(),
        }
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.inner.remote_address()
    }

    /// A stream was accepted
    pub fn stream_opened(&self) {
        self.streams.opened();
        METRICS.stream_opened();
    }

    /// A stream finished; closes the connection if a close was deferred
    /// until it went idle
    pub fn stream_closed(&self) {
        METRICS.stream_closed();
        if self.streams.closed() {
            debug!(conn_id = %self.id, "Last stream finished, closing");
            self.close(CLOSE_SHUTDOWN, b"server shutdown");
        }
    }

    pub fn open_streams(&self) -> u32 {
        self.streams.open_streams()
    }

    fn close(&self, code: u32, reason: &[u8]) {
        self.inner.close(quinn::VarInt::from_u32(code), reason);
    }

    /// Convert to serializable info
    pub fn to_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.to_string(),
            remote_addr: self.remote_address().to_string(),
            duration_secs: self.connected_at.elapsed().as_secs_f64(),
            rtt_ms: self.inner.rtt().as_secs_f64() * 1000.0,
            open_streams: self.open_streams(),
            shutdown_notified: self.streams.shutdown_notified(),
            close_pending: self.streams.close_pending(),
        }
    }
}

impl ManagedConnection for QuicConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn timeout_expired(&self) {
        METRICS.timeout_expired();
        debug!(conn_id = %self.id, "Idle timeout, closing");
        self.close(CLOSE_IDLE_TIMEOUT, b"idle timeout");
    }

    fn notify_pending_shutdown(&self) {
        if self.streams.first_notice() {
            // No new streams from the peer; streams already open run to completion
            self.inner
                .set_max_concurrent_bi_streams(quinn::VarInt::from_u32(0));
        }
    }

    fn is_busy(&self) -> bool {
        self.open_streams() > 0
    }

    fn close_when_idle(&self) {
        if self.streams.close_when_idle() {
            self.close(CLOSE_SHUTDOWN, b"server shutdown");
        }
    }

    fn drop_connection(&self) {
        self.close(CLOSE_SHUTDOWN, b"server shutdown");
    }

    fn dump_connection_state(&self, verbosity: u8) {
        let info = self.to_info();
        info!(
            conn_id = %info.id,
            remote_addr = %info.remote_addr,
            open_streams = info.open_streams,
            rtt_ms = info.rtt_ms,
            "Connection state"
        );
        if verbosity >= 3 {
            debug!(
                conn_id = %info.id,
                state = %serde_json::to_string(&info).unwrap_or_default(),
                "Connection state detail"
            );
        }
    }

    fn manager(&self) -> Option<ManagerId> {
        self.manager.get()
    }

    fn set_manager(&self, manager: Option<ManagerId>) {
        self.manager.set(manager)
    }
}

/// Serializable connection information for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Connection ID (hex string)
    pub id: String,
    /// Peer IP:port
    pub remote_addr: String,
    /// Duration in seconds
    pub duration_secs: f64,
    /// Smoothed round-trip time
    pub rtt_ms: f64,
    /// Streams currently being served
    pub open_streams: u32,
    /// Shutdown notice already delivered
    pub shutdown_notified: bool,
    /// Close deferred until the connection is idle
    pub close_pending: bool,
}
