//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] pharos_protocol::ProtocolError),

    #[error("server error: {0}")]
    Server(String),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),
}
