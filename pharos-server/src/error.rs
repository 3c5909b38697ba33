//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] pharos_protocol::ProtocolError),

    #[error("store error: {0}")]
    Store(#[from] pharos_store::StoreError),

    #[error("invalid listen address: {0}")]
    InvalidAddr(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("server shutting down")]
    ShuttingDown,
}
