//! Accept loop and per-listener update broadcast.

use crate::connection::Connection;
use crate::error::ServerError;
use parking_lot::Mutex;
use pharos_store::{Store, Subscription};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

/// One accept loop bound to the shared `(host, port)`.
///
/// Each listener holds its own store subscription and fans every update
/// out to the connections it accepted. Connections on other listeners are
/// covered by those listeners' subscriptions.
pub struct Listener {
    index: usize,
    store: Arc<dyn Store>,
    // Both receivers are created at construction, before the transport's
    // `start` returns, so a shutdown signalled any time after is never
    // missed.
    accept_shutdown: broadcast::Receiver<()>,
    broadcast_shutdown: broadcast::Receiver<()>,
}

impl Listener {
    pub(crate) fn new(
        index: usize,
        store: Arc<dyn Store>,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        Self {
            index,
            store,
            accept_shutdown: shutdown.subscribe(),
            broadcast_shutdown: shutdown.subscribe(),
        }
    }

    /// Runs the accept loop until shutdown, then drains active connections
    /// and closes the listening socket.
    pub(crate) async fn run(self, listener: TcpListener) -> Result<(), ServerError> {
        let Listener {
            index,
            store,
            accept_shutdown: mut shutdown_rx,
            broadcast_shutdown,
        } = self;

        let conns: Arc<Mutex<HashMap<u64, Arc<Connection>>>> = Arc::new(Mutex::new(HashMap::new()));
        let mut next_conn_id: u64 = 0;
        let mut pumps = JoinSet::new();

        let subscription = store.subscribe();
        let broadcast_task = spawn_broadcaster(
            index,
            store.clone(),
            conns.clone(),
            subscription,
            broadcast_shutdown,
        );

        let mut result = Ok(());

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!(listener = index, "stopped accepting new connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let id = next_conn_id;
                        next_conn_id += 1;

                        let (conn, channels) = Connection::new(id, peer);
                        conns.lock().insert(id, conn.clone());
                        tracing::info!(listener = index, conn = id, peer = %peer, "client connected");

                        let store = store.clone();
                        let conns = conns.clone();
                        pumps.spawn(async move {
                            conn.run(socket, channels, store).await;
                            conns.lock().remove(&id);
                            tracing::info!(conn = id, peer = %peer, "client disconnected");
                        });
                    }
                    Err(e) if is_transient_accept_error(&e) => {
                        // The peer went away between connect and accept.
                        tracing::debug!(listener = index, error = %e, "connection aborted during accept");
                    }
                    Err(e) => {
                        tracing::error!(listener = index, error = %e, "accept error");
                        result = Err(ServerError::Io(e));
                        break;
                    }
                }
            }
        }

        // Close remaining connections and wait for their pumps to drain
        // before the listening socket goes away.
        tracing::info!(listener = index, "draining connection pumps");
        let active: Vec<_> = conns.lock().values().cloned().collect();
        for conn in active {
            conn.close();
        }
        while pumps.join_next().await.is_some() {}

        broadcast_task.abort();
        let _ = broadcast_task.await;

        drop(listener);
        tracing::info!(listener = index, "listener stopped");
        result
    }
}

/// Spawns the task fanning a listener's store subscription out to every
/// active connection on that listener.
fn spawn_broadcaster(
    index: usize,
    store: Arc<dyn Store>,
    conns: Arc<Mutex<HashMap<u64, Arc<Connection>>>>,
    mut subscription: Subscription,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                update = subscription.recv() => match update {
                    Some(update) => {
                        // Holding the lock while enqueueing keeps the
                        // per-connection update order equal to the
                        // subscription order; enqueues never block.
                        let conns = conns.lock();
                        for conn in conns.values() {
                            conn.write_update(&update);
                        }
                    }
                    None => {
                        tracing::debug!(listener = index, "store update stream closed");
                        break;
                    }
                }
            }
        }
        store.unsubscribe(subscription.id());
    })
}

/// Accept errors that concern a single pending connection rather than the
/// listening socket itself.
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
    )
}
