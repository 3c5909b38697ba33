//! # pharos-server
//!
//! TCP transport for Pharos.
//!
//! This crate provides:
//! - A listener farm sharing one `(host, port)` via `SO_REUSEPORT`
//! - Per-connection reader and writer pumps over a bounded outbound queue
//! - Store update broadcast to every active connection
//! - Graceful shutdown draining every pump
//! - Server configuration and an HTTP health endpoint

pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod listener;
pub mod transport;

pub use config::{Config, ConfigError, HttpConfig, NetworkConfig};
pub use connection::Connection;
pub use error::ServerError;
pub use transport::{TcpTransport, TransportOptions};
