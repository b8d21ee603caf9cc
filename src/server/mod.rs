//! QUIC echo server
//!
//! One worker thread per core, each with its own endpoint and connection
//! manager. Shutdown drains every worker's manager in parallel.

mod connection;
mod observer;
mod tls;
mod worker;

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::watch;
use tracing::info;

use crate::config::Config;
use worker::Worker;

pub use connection::{
    ConnectionInfo, QuicConnection, StreamGate, CLOSE_IDLE_TIMEOUT, CLOSE_SHUTDOWN,
};
pub use observer::{WorkerBoard, WorkerObserver};
pub use tls::{build_server_config, ALPN_PROTOCOL};

/// Running server: a set of worker threads sharing one bind address
pub struct Server {
    workers: Vec<JoinHandle<Result<()>>>,
    board: WorkerBoard,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    /// Bind every worker's socket and start the worker threads
    pub async fn start(config: Arc<Config>) -> Result<Self> {
        let server_config = build_server_config(&config).await?;
        let count = config.server.effective_workers();
        let board = WorkerBoard::new(count);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Sockets are bound here so bind errors surface before any thread starts
        let sockets = (0..count)
            .map(|_| crate::util::create_udp_socket(config.server.bind_addr, count > 1))
            .collect::<Result<Vec<_>>>()?;

        let mut workers = Vec::with_capacity(count);
        for (index, socket) in sockets.into_iter().enumerate() {
            let worker = Worker {
                index,
                config: config.clone(),
                server_config: server_config.clone(),
                socket,
                board: board.clone(),
                shutdown_rx: shutdown_rx.clone(),
            };
            workers.push(worker.spawn()?);
        }

        info!(
            bind_addr = %config.server.bind_addr,
            workers = count,
            "Server listening"
        );

        Ok(Self {
            workers,
            board,
            shutdown_tx,
        })
    }

    /// Per-worker stats board, shared with the monitoring API
    pub fn board(&self) -> WorkerBoard {
        self.board.clone()
    }

    /// Signal every worker to drain and wait for all of them to stop
    pub async fn shutdown(self) -> Result<()> {
        info!(workers = self.workers.len(), "Initiating graceful shutdown");
        let _ = self.shutdown_tx.send(true);

        let mut failed = 0usize;
        for handle in self.workers {
            let joined = tokio::task::spawn_blocking(move || handle.join())
                .await
                .context("Failed to join worker thread")?;
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => failed += 1,
            }
        }

        if failed > 0 {
            bail!("{} worker(s) did not shut down cleanly", failed);
        }
        info!("Server shutdown complete");
        Ok(())
    }
}
