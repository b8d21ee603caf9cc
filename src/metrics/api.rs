//! HTTP API for worker monitoring
//!
//! Provides JSON endpoints for viewing per-worker connection managers and
//! server stats.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::counters::{MetricsSnapshot, METRICS};
use crate::connection::ManagerStats;
use crate::server::WorkerBoard;

/// API response for /workers endpoint
#[derive(Serialize)]
struct WorkersResponse {
    count: usize,
    connections: usize,
    workers: Vec<ManagerStats>,
}

/// Start the monitoring API server
///
/// This runs a simple HTTP server that responds to:
/// - GET /workers - Connection manager state of every worker
/// - GET /stats - Server statistics
pub fn start_api_server(addr: SocketAddr, board: WorkerBoard) {
    thread::spawn(move || {
        if let Err(e) = run_api_server(addr, board) {
            error!(error = %e, "API server error");
        }
    });
    info!(%addr, "Monitoring API server started");
}

fn run_api_server(addr: SocketAddr, board: WorkerBoard) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr)?;

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let board = board.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_request(stream, &board) {
                        debug!(error = %e, "Request handling error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
            }
        }
    }

    Ok(())
}

fn handle_request(mut stream: TcpStream, board: &WorkerBoard) -> std::io::Result<()> {
    let mut buffer = [0u8; 1024];
    let n = stream.read(&mut buffer)?;

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..n]);
    let first_line = request.lines().next().unwrap_or("");
    let path = first_line.split_whitespace().nth(1).unwrap_or("/");

    let (status, body) = route(path, board);

    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes())?;
    stream.flush()?;

    Ok(())
}

fn route(path: &str, board: &WorkerBoard) -> (&'static str, String) {
    match path {
        "/workers" => {
            let workers = board.snapshot();
            let response = WorkersResponse {
                count: workers.len(),
                connections: workers.iter().map(|w| w.connections).sum(),
                workers,
            };
            ("200 OK", serde_json::to_string_pretty(&response).unwrap_or_default())
        }
        "/stats" => {
            let snapshot: MetricsSnapshot = METRICS.snapshot();
            ("200 OK", serde_json::to_string_pretty(&snapshot).unwrap_or_default())
        }
        "/" => {
            let help = r#"{
  "endpoints": {
    "/workers": "Connection managers per worker",
    "/stats": "Server statistics"
  }
}"#;
            ("200 OK", help.to_string())
        }
        _ => ("404 Not Found", r#"{"error": "Not found"}"#.to_string()),
    }
}
