//! The store contract consumed by the transport.

use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// A single key change, published to every subscriber in the order the
/// store applied the corresponding sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// The key as the writer provided it.
    pub key: Bytes,
    /// The encoded value, byte-identical to what `get` would return.
    pub value: Bytes,
}

/// A shared keyed value space with per-subscriber change notification.
///
/// `set` and `get` are async so callers can bound them with a deadline;
/// the remaining operations are cheap bookkeeping.
#[async_trait]
pub trait Store: Send + Sync {
    /// Applies a write. The change is published to every currently
    /// registered subscriber before this returns.
    async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Returns the encoded value for `key`, or empty bytes if the key was
    /// never set.
    async fn get(&self, key: &[u8]) -> Bytes;

    /// Registers a subscriber and returns its update stream.
    ///
    /// A subscriber registered concurrently with a `set` may or may not
    /// observe that `set`'s update.
    fn subscribe(&self) -> Subscription;

    /// Releases a subscriber's queue; further publishes skip it.
    fn unsubscribe(&self, id: u64);

    /// Serializes the full state for out-of-band backup.
    fn snapshot(&self) -> Vec<u8>;

    /// Replaces the full state from a snapshot.
    fn restore(&self, data: &[u8]) -> Result<(), StoreError>;

    /// Seals every subscriber queue, ending their streams. Idempotent.
    fn close(&self);
}

/// Receiving handle for a store subscription.
///
/// Yields updates in the order the store applied the corresponding sets.
/// The stream ends when the store closes or the subscriber falls too far
/// behind and is dropped.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Update>,
}

impl Subscription {
    pub(crate) fn new(id: u64, rx: mpsc::Receiver<Update>) -> Self {
        Self { id, rx }
    }

    /// The subscriber id, used to unsubscribe.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Receives the next update, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Update> {
        self.rx.recv().await
    }
}
