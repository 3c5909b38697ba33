//! Per-connection reader and writer pumps.
//!
//! Each accepted socket is driven by two cooperating tasks: a reader pump
//! that decodes requests and dispatches them to the store, and a writer
//! pump that drains a bounded outbound frame queue into the socket. Both
//! the reader (for responses) and the owning listener (for pushed updates)
//! produce onto the queue; the writer is its only consumer, so frames are
//! written whole and never interleave.

use bytes::Bytes;
use pharos_protocol::writer::{encode_error, encode_lines, encode_ok, encode_string, encode_update};
use pharos_protocol::{read_request, tokens, Command, ProtocolError, Request};
use pharos_store::{Store, Update};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

/// Capacity of the per-connection outbound frame queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 127;

/// Deadline for a single store operation.
pub const STORE_OP_TIMEOUT: Duration = Duration::from_secs(3);

/// Consecutive decode failures after which the connection is assumed to be
/// desynchronized and torn down.
const MAX_DECODE_ERRORS: u32 = 3;

/// Handle to a live connection, shared between the owning listener (for
/// update broadcast and shutdown) and the connection's own pumps.
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    outbound: mpsc::Sender<Bytes>,
    shutdown: broadcast::Sender<()>,
}

/// Receiving ends of a connection's channels, created together with the
/// handle so a `close` signalled before the pumps start is never missed.
pub(crate) struct ConnectionChannels {
    outbound_rx: mpsc::Receiver<Bytes>,
    reader_shutdown: broadcast::Receiver<()>,
    writer_shutdown: broadcast::Receiver<()>,
}

impl Connection {
    /// Creates the connection handle and the receiving ends of its
    /// channels.
    pub(crate) fn new(id: u64, peer: SocketAddr) -> (Arc<Self>, ConnectionChannels) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (shutdown, reader_shutdown) = broadcast::channel(1);
        let writer_shutdown = shutdown.subscribe();
        (
            Arc::new(Self {
                id,
                peer,
                outbound,
                shutdown,
            }),
            ConnectionChannels {
                outbound_rx,
                reader_shutdown,
                writer_shutdown,
            },
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Signals both pumps to stop. The writer drains already-queued frames
    /// before closing its half of the socket.
    pub fn close(&self) {
        let _ = self.shutdown.send(());
    }

    /// Formats an update frame and enqueues it for this connection.
    pub fn write_update(&self, update: &Update) {
        self.enqueue(encode_update(&update.key, &update.value));
    }

    /// Enqueues a frame on the outbound queue. A full queue means the
    /// client is not draining its socket; the connection is dropped rather
    /// than blocking the producer. A sealed queue makes this a no-op.
    fn enqueue(&self, frame: Bytes) {
        match self.outbound.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    conn = self.id,
                    peer = %self.peer,
                    "outbound queue full, dropping connection"
                );
                self.close();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Runs the reader and writer pumps to completion.
    pub(crate) async fn run(
        self: Arc<Self>,
        socket: TcpStream,
        channels: ConnectionChannels,
        store: Arc<dyn Store>,
    ) {
        let (read_half, write_half) = socket.into_split();
        let ConnectionChannels {
            outbound_rx,
            reader_shutdown,
            writer_shutdown,
        } = channels;

        let reader = {
            let conn = self.clone();
            tokio::spawn(async move { conn.read_pump(read_half, store, reader_shutdown).await })
        };
        let writer = {
            let conn = self.clone();
            tokio::spawn(async move { conn.write_pump(write_half, outbound_rx, writer_shutdown).await })
        };

        let _ = reader.await;
        let _ = writer.await;

        tracing::debug!(conn = self.id, peer = %self.peer, "connection closed");
    }

    /// Decodes requests from the socket and dispatches them until the
    /// client quits, the stream ends, or shutdown is signalled.
    async fn read_pump(
        &self,
        read_half: OwnedReadHalf,
        store: Arc<dyn Store>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut reader = BufReader::new(read_half);
        let mut decode_errors = 0u32;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                result = read_request(&mut reader) => match result {
                    Ok(request) => {
                        decode_errors = 0;
                        if self.dispatch(request, &store).await {
                            break;
                        }
                    }
                    Err(ProtocolError::Closed) => {
                        tracing::debug!(conn = self.id, "client closed connection");
                        break;
                    }
                    Err(e) if e.is_decode_error() => {
                        decode_errors += 1;
                        tracing::warn!(conn = self.id, error = %e, "failed to read client request");
                        if decode_errors >= MAX_DECODE_ERRORS {
                            tracing::warn!(
                                conn = self.id,
                                "{} consecutive decode errors, assuming desync and closing",
                                decode_errors
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(conn = self.id, error = %e, "read error");
                        break;
                    }
                }
            }
        }

        // Stop the writer once reads are done; frames already queued still
        // drain before the socket closes.
        self.close();
        tracing::debug!(conn = self.id, "read pump exited");
    }

    /// Handles one decoded request. Returns true when the connection
    /// should close (client sent QUIT).
    async fn dispatch(&self, request: Request, store: &Arc<dyn Store>) -> bool {
        let id = request.id;
        match request.command {
            Command::Ping => {
                self.enqueue(encode_string(id, "PONG"));
                false
            }

            Command::Quit => {
                self.enqueue(encode_ok(id));
                tracing::debug!(conn = self.id, "client quit");
                true
            }

            Command::Get { key } => {
                match timeout(STORE_OP_TIMEOUT, store.get(&key)).await {
                    Ok(value) => {
                        self.enqueue(encode_lines(id, &[tokens::GET, &value[..]]));
                    }
                    Err(_) => {
                        tracing::warn!(
                            conn = self.id,
                            key = %String::from_utf8_lossy(&key),
                            "get timed out"
                        );
                        self.enqueue(encode_error(id, "get timed out"));
                    }
                }
                false
            }

            Command::Set { key, value } => {
                match timeout(STORE_OP_TIMEOUT, store.set(&key, &value)).await {
                    Ok(Ok(())) => {
                        self.enqueue(encode_ok(id));
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(
                            conn = self.id,
                            key = %String::from_utf8_lossy(&key),
                            error = %e,
                            "set failed"
                        );
                        self.enqueue(encode_error(id, &e.to_string()));
                    }
                    Err(_) => {
                        tracing::warn!(
                            conn = self.id,
                            key = %String::from_utf8_lossy(&key),
                            "set timed out"
                        );
                        self.enqueue(encode_error(id, "set timed out"));
                    }
                }
                false
            }
        }
    }

    /// Drains the outbound queue into the socket until shutdown or the
    /// queue is sealed, then half-closes the socket so a draining client
    /// sees EOF.
    async fn write_pump(
        &self,
        mut write_half: OwnedWriteHalf,
        mut outbound: mpsc::Receiver<Bytes>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    // Flush whatever was enqueued before the shutdown
                    // signal, then stop.
                    while let Ok(frame) = outbound.try_recv() {
                        if let Err(e) = write_half.write_all(&frame).await {
                            tracing::warn!(conn = self.id, error = %e, "failed to write frame");
                            break;
                        }
                    }
                    break;
                }
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = write_half.write_all(&frame).await {
                            tracing::warn!(conn = self.id, error = %e, "failed to write frame");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }

        if let Err(e) = write_half.shutdown().await {
            tracing::debug!(conn = self.id, error = %e, "failed to shut down write half");
        }

        // Dropping the receiver seals the queue: producers' sends become
        // no-ops from here on.
        self.close();
        tracing::debug!(conn = self.id, "write pump exited");
    }
}
