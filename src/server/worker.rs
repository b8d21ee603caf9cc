//! Per-thread QUIC worker
//!
//! Each worker owns a current-thread runtime, its own endpoint bound with
//! SO_REUSEPORT and one connection manager. Connections never leave the
//! worker that accepted them.

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use quinn::{Endpoint, EndpointConfig, Incoming, RecvStream, SendStream, ServerConfig, VarInt};
use std::rc::Rc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::LocalSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::connection::{ConnRef, ConnectionManager, ConnectionManagerCallback, ManagedConnection};
use crate::error::StreamError;
use crate::event_loop::{EventLoop, TokioLoop};
use crate::metrics::METRICS;

use super::connection::{QuicConnection, CLOSE_SHUTDOWN};
use super::observer::{WorkerBoard, WorkerObserver};

/// Largest chunk read from a stream at once
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// How long to wait for closes to reach peers before the endpoint goes away
const ENDPOINT_IDLE_WAIT: Duration = Duration::from_secs(2);

pub(super) struct Worker {
    pub index: usize,
    pub config: Arc<Config>,
    pub server_config: ServerConfig,
    pub socket: std::net::UdpSocket,
    pub board: WorkerBoard,
    pub shutdown_rx: watch::Receiver<bool>,
}

impl Worker {
    /// Start the worker on a dedicated, named thread
    pub fn spawn(self) -> Result<JoinHandle<Result<()>>> {
        std::thread::Builder::new()
            .name(format!("connmgr-worker-{}", self.index))
            .spawn(move || {
                let index = self.index;
                let result = self.run();
                if let Err(e) = &result {
                    error!(worker = index, error = %e, "Worker failed");
                }
                result
            })
            .context("Failed to spawn worker thread")
    }

    fn run(self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build worker runtime")?;
        let local = LocalSet::new();
        local.block_on(&runtime, self.serve())
    }

    async fn serve(self) -> Result<()> {
        let Worker {
            index,
            config,
            server_config,
            socket,
            board,
            mut shutdown_rx,
        } = self;

        let runtime = quinn::default_runtime().ok_or_else(|| anyhow!("No async runtime found"))?;
        let endpoint = Endpoint::new(EndpointConfig::default(), Some(server_config), socket, runtime)?;

        let event_loop: Rc<dyn EventLoop> = Rc::new(TokioLoop::new());
        let drained = Rc::new(Notify::new());
        let observer: Rc<dyn ConnectionManagerCallback> =
            Rc::new(WorkerObserver::new(index, board.clone(), drained.clone()));
        let manager = ConnectionManager::new(event_loop, config.quic.manager_config(), Some(observer));
        board.publish(index, manager.stats());

        info!(worker = index, manager = %manager.id(), addr = %endpoint.local_addr()?, "Worker accepting connections");

        loop {
            tokio::select! {
                incoming = endpoint.accept() => {
                    match incoming {
                        Some(incoming) => {
                            tokio::task::spawn_local(handle_incoming(incoming, manager.clone()));
                        }
                        None => break,
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        drain(&config, &endpoint, &manager, &drained).await;
        board.publish(index, manager.stats());
        info!(worker = index, "Worker stopped");
        Ok(())
    }
}

/// Stop accepting, drain gracefully and drop whatever outlives the deadline
async fn drain(config: &Config, endpoint: &Endpoint, manager: &Rc<ConnectionManager>, drained: &Notify) {
    endpoint.set_server_config(None);

    drain_connections(
        manager,
        drained,
        config.shutdown.idle_grace(),
        config.shutdown.drain_timeout(),
    )
    .await;

    endpoint.close(VarInt::from_u32(CLOSE_SHUTDOWN), b"server shutdown");
    if tokio::time::timeout(ENDPOINT_IDLE_WAIT, endpoint.wait_idle()).await.is_err() {
        debug!(manager = %manager.id(), "Endpoint did not go idle in time");
    }
}

/// Run a graceful shutdown of `manager` and wait for `drained`, signalled by
/// the manager's observer once it empties. Connections still present after
/// `deadline` are dropped. Returns `true` if the graceful drain finished.
pub(super) async fn drain_connections(
    manager: &ConnectionManager,
    drained: &Notify,
    idle_grace: Duration,
    deadline: Duration,
) -> bool {
    info!(manager = %manager.id(), connections = manager.connection_count(), "Draining connections");
    manager.initiate_graceful_shutdown(idle_grace);

    let finished = manager.is_empty()
        || tokio::time::timeout(deadline, drained.notified()).await.is_ok();

    if !finished {
        warn!(
            manager = %manager.id(),
            connections = manager.connection_count(),
            timeout_secs = deadline.as_secs(),
            "Drain deadline reached, dropping remaining connections"
        );
        manager.drop_all_connections();
    }
    finished
}

/// Complete the handshake and serve the connection until it closes
async fn handle_incoming(incoming: Incoming, manager: Rc<ConnectionManager>) {
    let remote = incoming.remote_address();
    let connection = match incoming.await {
        Ok(connection) => connection,
        Err(e) => {
            METRICS.connection_failed();
            debug!(%remote, error = %e, "Handshake failed");
            return;
        }
    };

    if manager.is_draining() {
        connection.close(VarInt::from_u32(CLOSE_SHUTDOWN), b"server shutting down");
        return;
    }

    let conn = Arc::new(QuicConnection::new(connection.clone()));
    let conn_ref: ConnRef = conn.clone();
    manager.add_connection(conn_ref.clone(), true);
    info!(conn_id = %conn.id(), %remote, manager = %manager.id(), "Connection established");

    loop {
        match connection.accept_bi().await {
            Ok((send, recv)) => {
                conn.stream_opened();
                manager.schedule_timeout(&conn_ref);
                tokio::task::spawn_local(serve_stream(
                    send,
                    recv,
                    conn.clone(),
                    manager.clone(),
                ));
            }
            Err(e) => {
                debug!(conn_id = %conn.id(), reason = %e, "Connection closed");
                break;
            }
        }
    }

    manager.remove_connection(conn.as_ref());
}

async fn serve_stream(
    send: SendStream,
    recv: RecvStream,
    conn: Arc<QuicConnection>,
    manager: Rc<ConnectionManager>,
) {
    match echo_stream(send, recv).await {
        Ok(bytes) => METRICS.bytes_echoed(bytes),
        Err(e) if e.is_disconnect() => {
            debug!(conn_id = %conn.id(), error = %e, "Stream ended by peer");
        }
        Err(e) => {
            METRICS.error();
            warn!(conn_id = %conn.id(), error = %e, "Stream error");
        }
    }

    conn.stream_closed();

    // Activity refreshes the idle timeout while the manager still owns us
    if conn.manager() == Some(manager.id()) {
        let conn_ref: ConnRef = conn;
        manager.schedule_timeout(&conn_ref);
    }
}

/// Echo everything read on the stream back to the peer
async fn echo_stream(mut send: SendStream, mut recv: RecvStream) -> Result<u64, StreamError> {
    let mut total = 0u64;
    while let Some(chunk) = recv.read_chunk(READ_CHUNK_SIZE, true).await? {
        let data: Bytes = chunk.bytes;
        total += data.len() as u64;
        send.write_chunk(data).await?;
    }
    send.finish()?;
    Ok(total)
}
