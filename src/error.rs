//! Error types for the QUIC worker server
//!
//! The connection manager itself never fails; these cover the per-stream
//! work done by the server's connections.

use thiserror::Error;

/// Failure while echoing a single stream
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("read failed: {0}")]
    Read(#[from] quinn::ReadError),

    #[error("write failed: {0}")]
    Write(#[from] quinn::WriteError),

    #[error("stream already closed: {0}")]
    Closed(#[from] quinn::ClosedStream),
}

impl StreamError {
    /// Whether the error only reflects the peer or connection going away
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Read(quinn::ReadError::ConnectionLost(_))
                | Self::Read(quinn::ReadError::Reset(_))
                | Self::Write(quinn::WriteError::ConnectionLost(_))
                | Self::Write(quinn::WriteError::Stopped(_))
        )
    }
}
