//! Async client connection with request correlation.
//!
//! The server pushes key updates at any time, interleaved with responses
//! to in-flight requests, so a background reader task splits the incoming
//! stream: responses are routed to the waiting request by their request
//! id, updates are fanned out on a broadcast channel.

use crate::error::ClientError;
use bytes::Bytes;
use parking_lot::Mutex;
use pharos_protocol::writer::{encode_get, encode_ping, encode_quit, encode_set};
use pharos_protocol::{
    read_message, ProtocolError, RequestId, Response, ResponseKind, ServerMessage, Update,
    UPDATE_PREFIX,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};
use tokio::time::timeout;

/// Capacity of the pushed-update broadcast channel.
const UPDATE_CHANNEL_CAPACITY: usize = 255;

/// Default bound on a single request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Response>>>>;

/// A connection to a Pharos server.
pub struct Connection {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    next_id: AtomicU32,
    connected: Arc<AtomicBool>,
    updates: broadcast::Sender<Update>,
    request_timeout: Duration,
    reader_task: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Connects to the server and spawns the background reader task.
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        tracing::debug!("connecting to {}", addr);
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let reader_task = tokio::spawn(read_loop(
            BufReader::new(read_half),
            pending.clone(),
            updates.clone(),
            connected.clone(),
        ));

        Ok(Self {
            writer: tokio::sync::Mutex::new(write_half),
            pending,
            next_id: AtomicU32::new(0),
            connected,
            updates,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reader_task,
        })
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Subscribes to key updates pushed by the server.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<Update> {
        self.updates.subscribe()
    }

    /// Returns whether the connection is still up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Sends `PING` and waits for the `PONG`.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let response = self.request("PING", encode_ping).await?;
        match response.kind {
            ResponseKind::Pong => Ok(()),
            ResponseKind::Err { message } => Err(ClientError::Server(message)),
            _ => Err(ClientError::UnexpectedResponse("PING")),
        }
    }

    /// Sends `QUIT` and waits for the acknowledgement. The server closes
    /// the connection afterwards.
    pub async fn quit(&self) -> Result<(), ClientError> {
        let response = self.request("QUIT", encode_quit).await?;
        match response.kind {
            ResponseKind::Ok => Ok(()),
            ResponseKind::Err { message } => Err(ClientError::Server(message)),
            _ => Err(ClientError::UnexpectedResponse("QUIT")),
        }
    }

    /// Sets `key` to `value`.
    pub async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), ClientError> {
        let response = self.request("SET", |id| encode_set(id, key, value)).await?;
        match response.kind {
            ResponseKind::Ok => Ok(()),
            ResponseKind::Err { message } => Err(ClientError::Server(message)),
            _ => Err(ClientError::UnexpectedResponse("SET")),
        }
    }

    /// Returns the encoded value for `key`; empty bytes when the key was
    /// never set.
    pub async fn get(&self, key: &[u8]) -> Result<Bytes, ClientError> {
        let response = self.request("GET", |id| encode_get(id, key)).await?;
        match response.kind {
            ResponseKind::Get { value } => Ok(value),
            ResponseKind::Err { message } => Err(ClientError::Server(message)),
            _ => Err(ClientError::UnexpectedResponse("GET")),
        }
    }

    /// Tears the connection down without the `QUIT` handshake.
    pub fn close(&self) {
        self.connected.store(false, Ordering::Release);
        self.reader_task.abort();
    }

    /// Sends one encoded request and waits for the correlated response.
    async fn request(
        &self,
        op: &'static str,
        encode: impl FnOnce(RequestId) -> Bytes,
    ) -> Result<Response, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::Closed);
        }

        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let frame = encode(id);
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.write_all(&frame).await {
                self.pending.lock().remove(&id);
                return Err(ClientError::Io(e));
            }
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // The reader task dropped our sender: the connection is gone.
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                tracing::debug!(op, "request timed out");
                Err(ClientError::Timeout)
            }
        }
    }

    /// Allocates the next request id.
    fn next_request_id(&self) -> RequestId {
        loop {
            let n = self.next_id.fetch_add(1, Ordering::Relaxed);
            if let Some(id) = request_id_from(n) {
                return id;
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Maps a counter value to a request id, or `None` when the id would start
/// with the update prefix: such an id would make the server's response
/// indistinguishable from a pushed update.
fn request_id_from(n: u32) -> Option<RequestId> {
    let bytes = n.to_le_bytes();
    if bytes[0] == UPDATE_PREFIX {
        None
    } else {
        Some(RequestId(bytes))
    }
}

/// Routes incoming server messages: responses to their waiting request,
/// updates to the broadcast channel.
async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    pending: PendingMap,
    updates: broadcast::Sender<Update>,
    connected: Arc<AtomicBool>,
) {
    loop {
        match read_message(&mut reader).await {
            Ok(ServerMessage::Update(update)) => {
                // No receivers is fine; the client may not care about
                // updates.
                let _ = updates.send(update);
            }
            Ok(ServerMessage::Response(response)) => {
                let sender = pending.lock().remove(&response.id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        tracing::debug!(id = %response.id, "response for unknown request id");
                    }
                }
            }
            Err(ProtocolError::Closed) => {
                tracing::debug!("server closed connection");
                break;
            }
            Err(e) if e.is_decode_error() => {
                tracing::warn!(error = %e, "failed to read server response");
            }
            Err(e) => {
                tracing::warn!(error = %e, "read error");
                break;
            }
        }
    }

    connected.store(false, Ordering::Release);
    // Dropping the pending senders wakes every request still waiting.
    pending.lock().clear();
}
