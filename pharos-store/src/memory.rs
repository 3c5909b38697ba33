//! In-memory store implementation.

use crate::error::StoreError;
use crate::store::{Store, Subscription, Update};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Capacity of each subscriber's update queue.
pub const UPDATE_BUFFER_SIZE: usize = 255;

/// In-memory keyed value store with subscriber fan-out.
///
/// Values live in a single JSON document keyed by the provided key string.
/// A `set` payload that parses as JSON is stored structurally; anything
/// else is stored as a JSON string, so `get` on a key set to `bar` returns
/// the encoded form `"bar"`.
///
/// A single mutex guards both the document and the subscriber list, so a
/// `set`'s apply-and-publish is atomic with respect to other `set`s and
/// every subscriber observes updates in apply order.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

struct Inner {
    document: Map<String, Value>,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,
    closed: bool,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Update>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                document: Map::new(),
                subscribers: Vec::new(),
                next_subscriber_id: 0,
                closed: false,
            }),
        }
    }

    /// Builds a store pre-populated from a snapshot.
    pub fn from_snapshot(data: &[u8]) -> Result<Self, StoreError> {
        let store = Self::new();
        store.restore(data)?;
        Ok(store)
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    fn encode_value(raw: &[u8]) -> Value {
        match serde_json::from_slice::<Value>(raw) {
            Ok(value) => value,
            Err(_) => Value::String(String::from_utf8_lossy(raw).into_owned()),
        }
    }

    fn value_bytes(value: &Value) -> Bytes {
        match serde_json::to_vec(value) {
            Ok(bytes) => Bytes::from(bytes),
            Err(_) => Bytes::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();

        let encoded = Self::encode_value(value);
        let encoded_bytes = Self::value_bytes(&encoded);
        inner
            .document
            .insert(String::from_utf8_lossy(key).into_owned(), encoded);

        if inner.closed {
            // The write still applies, but the queues are sealed.
            return Ok(());
        }

        let update = Update {
            key: Bytes::copy_from_slice(key),
            value: encoded_bytes,
        };

        // Publish while holding the lock so updates from concurrent sets
        // reach every subscriber in apply order. A subscriber whose queue
        // is full is not draining; it is dropped rather than blocking the
        // writer.
        let mut dropped = Vec::new();
        for sub in &inner.subscribers {
            match sub.tx.try_send(update.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscriber = sub.id, "update queue full, dropping subscriber");
                    dropped.push(sub.id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(sub.id);
                }
            }
        }
        if !dropped.is_empty() {
            inner.subscribers.retain(|s| !dropped.contains(&s.id));
        }

        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Bytes {
        let inner = self.inner.lock();
        match inner.document.get(String::from_utf8_lossy(key).as_ref()) {
            Some(value) => Self::value_bytes(value),
            None => Bytes::new(),
        }
    }

    fn subscribe(&self) -> Subscription {
        let mut inner = self.inner.lock();
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;

        let (tx, rx) = mpsc::channel(UPDATE_BUFFER_SIZE);
        if !inner.closed {
            inner.subscribers.push(Subscriber { id, tx });
        }
        // When the store is already closed the sender drops here and the
        // subscription yields an ended stream.
        Subscription::new(id, rx)
    }

    fn unsubscribe(&self, id: u64) {
        self.inner.lock().subscribers.retain(|s| s.id != id);
    }

    fn snapshot(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        serde_json::to_vec(&inner.document).unwrap_or_else(|_| b"{}".to_vec())
    }

    fn restore(&self, data: &[u8]) -> Result<(), StoreError> {
        let document = if data.is_empty() {
            Map::new()
        } else {
            match serde_json::from_slice::<Value>(data)? {
                Value::Object(map) => map,
                _ => return Err(StoreError::InvalidSnapshot),
            }
        };
        self.inner.lock().document = document;
        Ok(())
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        store.set(b"foo", b"bar").await.unwrap();
        assert_eq!(&store.get(b"foo").await[..], b"\"bar\"");
    }

    #[tokio::test]
    async fn test_set_json_value_stored_structurally() {
        let store = MemoryStore::new();
        store.set(b"config", br#"{"a":1}"#).await.unwrap();
        assert_eq!(&store.get(b"config").await[..], br#"{"a":1}"#);

        store.set(b"count", b"42").await.unwrap();
        assert_eq!(&store.get(b"count").await[..], b"42");
    }

    #[tokio::test]
    async fn test_get_absent_key() {
        let store = MemoryStore::new();
        assert!(store.get(b"missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite() {
        let store = MemoryStore::new();
        store.set(b"k", b"one").await.unwrap();
        store.set(b"k", b"two").await.unwrap();
        assert_eq!(&store.get(b"k").await[..], b"\"two\"");
    }

    #[tokio::test]
    async fn test_subscriber_receives_updates_in_order() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe();

        for value in ["v1", "v2", "v3"] {
            store.set(b"k", value.as_bytes()).await.unwrap();
        }

        for expected in ["\"v1\"", "\"v2\"", "\"v3\""] {
            let update = sub.recv().await.unwrap();
            assert_eq!(&update.key[..], b"k");
            assert_eq!(&update.value[..], expected.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_update_value_matches_get() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe();

        store.set(b"foo", b"bar").await.unwrap();

        let update = sub.recv().await.unwrap();
        assert_eq!(update.value, store.get(b"foo").await);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let store = MemoryStore::new();
        let mut first = store.subscribe();
        let mut second = store.subscribe();

        store.set(b"k", b"v").await.unwrap();

        assert_eq!(&first.recv().await.unwrap().value[..], b"\"v\"");
        assert_eq!(&second.recv().await.unwrap().value[..], b"\"v\"");
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let store = MemoryStore::new();
        let sub = store.subscribe();
        assert_eq!(store.subscriber_count(), 1);

        store.unsubscribe(sub.id());
        assert_eq!(store.subscriber_count(), 0);

        // Publishing after unsubscribe must not fail.
        store.set(b"k", b"v").await.unwrap();
    }

    #[tokio::test]
    async fn test_close_ends_streams_and_is_idempotent() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe();

        store.close();
        store.close();

        assert!(sub.recv().await.is_none());

        // Writes after close still apply, silently.
        store.set(b"k", b"v").await.unwrap();
        assert_eq!(&store.get(b"k").await[..], b"\"v\"");
    }

    #[tokio::test]
    async fn test_subscribe_after_close_yields_ended_stream() {
        let store = MemoryStore::new();
        store.close();

        let mut sub = store.subscribe();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped() {
        let store = MemoryStore::new();
        let mut slow = store.subscribe();

        // Overflow the subscriber's queue without draining it.
        for i in 0..=UPDATE_BUFFER_SIZE {
            store.set(b"k", format!("{}", i).as_bytes()).await.unwrap();
        }
        assert_eq!(store.subscriber_count(), 0);

        // The slow subscriber got the buffered prefix, then its stream ends.
        let mut received = 0;
        while slow.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, UPDATE_BUFFER_SIZE);

        // New subscribers are unaffected.
        let mut live = store.subscribe();
        store.set(b"k", b"after").await.unwrap();
        assert_eq!(&live.recv().await.unwrap().value[..], b"\"after\"");
    }

    #[test]
    fn test_snapshot_of_empty_store() {
        let store = MemoryStore::new();
        assert_eq!(store.snapshot(), b"{}");
    }

    #[tokio::test]
    async fn test_snapshot_restore_roundtrip() {
        let store = MemoryStore::new();
        store.set(b"foo", b"bar").await.unwrap();
        store.set(b"n", b"7").await.unwrap();

        let snapshot = store.snapshot();

        let restored = MemoryStore::from_snapshot(&snapshot).unwrap();
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(&restored.get(b"foo").await[..], b"\"bar\"");
        assert_eq!(&restored.get(b"n").await[..], b"7");
    }

    #[tokio::test]
    async fn test_restore_from_literal() {
        let store = MemoryStore::new();
        store.restore(br#"{"foo":"bar"}"#).unwrap();
        assert_eq!(&store.get(b"foo").await[..], b"\"bar\"");
    }

    #[test]
    fn test_restore_empty_input() {
        let store = MemoryStore::new();
        store.restore(b"").unwrap();
        assert_eq!(store.snapshot(), b"{}");
    }

    #[test]
    fn test_restore_rejects_non_object() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.restore(b"[1,2,3]"),
            Err(StoreError::InvalidSnapshot)
        ));
        assert!(matches!(
            store.restore(b"not json"),
            Err(StoreError::Json(_))
        ));
    }
}
