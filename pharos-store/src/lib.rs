//! # pharos-store
//!
//! Keyed value store with subscriber fan-out.
//!
//! This crate provides:
//! - The [`Store`] contract consumed by the TCP transport
//! - [`MemoryStore`], an in-memory implementation holding a single JSON
//!   document
//! - Bounded per-subscriber update streams delivering key changes in
//!   publication order
//! - Snapshot and restore for bootstrap and tests

pub mod error;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use memory::{MemoryStore, UPDATE_BUFFER_SIZE};
pub use store::{Store, Subscription, Update};
