//! # pharos-client
//!
//! Client library for Pharos.
//!
//! This crate provides:
//! - An async TCP [`Connection`] with request/response correlation
//! - A broadcast stream of server-pushed key updates
//! - A high-level API for the `PING`, `QUIT`, `GET`, and `SET` commands

pub mod connection;
pub mod error;

pub use connection::Connection;
pub use error::ClientError;
