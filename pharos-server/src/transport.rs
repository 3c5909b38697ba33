//! TCP transport: a farm of listeners sharing one port.

use crate::error::ServerError;
use crate::listener::Listener;
use parking_lot::Mutex;
use pharos_store::Store;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Listen backlog for each listener socket.
const LISTEN_BACKLOG: u32 = 1024;

/// Transport options supplied by the wrapping process.
#[derive(Clone)]
pub struct TransportOptions {
    /// Host to listen on.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Number of accept loops sharing the port (0 = one per core).
    pub num_listeners: usize,
    /// The store backing every connection.
    pub store: Arc<dyn Store>,
}

/// TCP transport for Pharos.
///
/// Owns N listeners all bound to the same `(host, port)` with
/// `SO_REUSEPORT`, so the kernel load-balances incoming connections across
/// the accept loops.
pub struct TcpTransport {
    options: TransportOptions,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<Result<(), ServerError>>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    running: AtomicBool,
}

impl TcpTransport {
    pub fn new(options: TransportOptions) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            options,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            local_addr: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Binds the listener sockets and spawns their accept loops.
    ///
    /// The first bind resolves the actual address (so port 0 works); a
    /// failure binding any further listener shrinks the farm but does not
    /// stop the transport.
    pub async fn start(&self) -> Result<(), ServerError> {
        let requested: SocketAddr = format!("{}:{}", self.options.host, self.options.port)
            .parse()
            .map_err(|_| {
                ServerError::InvalidAddr(format!("{}:{}", self.options.host, self.options.port))
            })?;

        let count = if self.options.num_listeners > 0 {
            self.options.num_listeners
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };

        tracing::info!(count, addr = %requested, "starting tcp listeners");

        let first = bind(requested).map_err(|e| ServerError::Bind {
            addr: requested,
            source: e,
        })?;
        let addr = first.local_addr()?;
        *self.local_addr.lock() = Some(addr);

        let mut sockets = vec![first];
        for _ in 1..count {
            match bind(addr) {
                Ok(socket) => sockets.push(socket),
                Err(e) => {
                    tracing::error!(addr = %addr, error = %e, "failed to bind listener");
                }
            }
        }

        let mut tasks = self.tasks.lock();
        for (index, socket) in sockets.into_iter().enumerate() {
            let listener = Listener::new(index, self.options.store.clone(), &self.shutdown);
            tasks.push(tokio::spawn(listener.run(socket)));
        }

        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// The address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Returns whether the transport has started and not yet closed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the store backing this transport.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.options.store
    }

    /// Signals shutdown and waits for every listener to drain its
    /// connections and close its socket.
    pub async fn close(&self) {
        tracing::info!("stopping tcp transport");
        let _ = self.shutdown.send(());

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "listener exited with error"),
                Err(e) => tracing::warn!(error = %e, "listener task failed"),
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("tcp transport stopped");
    }
}

/// Binds a listener socket with address and port reuse enabled.
fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;

    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharos_store::MemoryStore;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    async fn start_transport(snapshot: Option<&str>) -> TcpTransport {
        let store = MemoryStore::new();
        if let Some(data) = snapshot {
            store.restore(data.as_bytes()).unwrap();
        }

        let transport = TcpTransport::new(TransportOptions {
            host: "127.0.0.1".to_string(),
            port: 0,
            num_listeners: 1,
            store: Arc::new(store),
        });
        transport.start().await.unwrap();
        transport
    }

    async fn connect(transport: &TcpTransport) -> BufReader<TcpStream> {
        let addr = transport.local_addr().unwrap();
        BufReader::new(TcpStream::connect(addr).await.unwrap())
    }

    async fn send(stream: &mut BufReader<TcpStream>, data: &[u8]) {
        stream.get_mut().write_all(data).await.unwrap();
    }

    async fn read_line(stream: &mut BufReader<TcpStream>) -> Vec<u8> {
        let mut line = Vec::new();
        timeout(Duration::from_secs(5), stream.read_until(b'\n', &mut line))
            .await
            .expect("timed out waiting for server")
            .unwrap();
        line
    }

    /// Reads frames until the expected response line arrives, skipping any
    /// interleaved update frames (an update is two `\n`-terminated lines).
    async fn read_response_line(stream: &mut BufReader<TcpStream>) -> Vec<u8> {
        loop {
            let line = read_line(stream).await;
            if line.first() == Some(&b'*') {
                let _value = read_line(stream).await;
                continue;
            }
            return line;
        }
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let transport = start_transport(None).await;

        let mut client = connect(&transport).await;
        send(&mut client, b"1234PING\n").await;
        assert_eq!(read_line(&mut client).await, b"1234PONG\r\n");

        transport.close().await;
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        let transport = start_transport(None).await;

        let mut client = connect(&transport).await;
        send(&mut client, b"1234QUIT\n").await;
        assert_eq!(read_line(&mut client).await, b"1234OK\r\n");

        // The server closes the socket; the next read returns EOF.
        assert!(read_line(&mut client).await.is_empty());

        transport.close().await;
    }

    #[tokio::test]
    async fn test_set_broadcasts_update_and_get_returns_value() {
        let transport = start_transport(None).await;

        // Watcher connects before the write so it receives the update.
        let mut watcher = connect(&transport).await;
        send(&mut watcher, b"0000PING\n").await;
        assert_eq!(read_line(&mut watcher).await, b"0000PONG\r\n");

        let mut writer = connect(&transport).await;
        send(&mut writer, b"0001SET foo\nbar\n").await;
        assert_eq!(read_response_line(&mut writer).await, b"0001OK\r\n");

        // Update frames use bare `\n` terminators.
        assert_eq!(read_line(&mut watcher).await, b"*foo\n");
        assert_eq!(read_line(&mut watcher).await, b"\"bar\"\n");

        send(&mut watcher, b"0002GET foo\n").await;
        assert_eq!(read_line(&mut watcher).await, b"0002GET\r\n");
        assert_eq!(read_line(&mut watcher).await, b"\"bar\"\r\n");

        transport.close().await;
    }

    #[tokio::test]
    async fn test_get_from_restored_snapshot() {
        let transport = start_transport(Some(r#"{"foo":"bar"}"#)).await;

        let mut client = connect(&transport).await;
        send(&mut client, b"1234GET foo\n").await;
        assert_eq!(read_line(&mut client).await, b"1234GET\r\n");
        assert_eq!(read_line(&mut client).await, b"\"bar\"\r\n");

        transport.close().await;
    }

    #[tokio::test]
    async fn test_get_absent_key_returns_empty_value() {
        let transport = start_transport(None).await;

        let mut client = connect(&transport).await;
        send(&mut client, b"1234GET nope\n").await;
        assert_eq!(read_line(&mut client).await, b"1234GET\r\n");
        assert_eq!(read_line(&mut client).await, b"\r\n");

        transport.close().await;
    }

    #[tokio::test]
    async fn test_two_writers_interleaved() {
        let transport = start_transport(None).await;

        let mut watcher = connect(&transport).await;
        send(&mut watcher, b"0000PING\n").await;
        assert_eq!(read_line(&mut watcher).await, b"0000PONG\r\n");

        let mut alice = connect(&transport).await;
        let mut bob = connect(&transport).await;

        send(&mut alice, b"000aSET x\n1\n").await;
        send(&mut bob, b"000bSET x\n2\n").await;
        assert_eq!(read_response_line(&mut alice).await, b"000aOK\r\n");
        assert_eq!(read_response_line(&mut bob).await, b"000bOK\r\n");

        // The watcher sees exactly two updates for x, in the order the
        // store serialized the sets.
        let mut values = Vec::new();
        for _ in 0..2 {
            assert_eq!(read_line(&mut watcher).await, b"*x\n");
            values.push(read_line(&mut watcher).await);
        }
        values.sort();
        assert_eq!(values, vec![b"1\n".to_vec(), b"2\n".to_vec()]);

        transport.close().await;
    }

    #[tokio::test]
    async fn test_decode_error_does_not_tear_down_connection() {
        let transport = start_transport(None).await;

        let mut client = connect(&transport).await;
        send(&mut client, b"1234EVIL\n").await;
        send(&mut client, b"5678PING\n").await;
        assert_eq!(read_line(&mut client).await, b"5678PONG\r\n");

        transport.close().await;
    }

    #[tokio::test]
    async fn test_consecutive_decode_errors_disconnect() {
        let transport = start_transport(None).await;

        let mut client = connect(&transport).await;
        send(&mut client, b"1111EVIL\n2222EVIL\n3333EVIL\n").await;

        // Three garbage frames in a row and the server hangs up.
        assert!(read_line(&mut client).await.is_empty());

        transport.close().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_active_connections() {
        let transport = start_transport(None).await;

        let mut client = connect(&transport).await;
        send(&mut client, b"1234PING\n").await;
        assert_eq!(read_line(&mut client).await, b"1234PONG\r\n");

        transport.close().await;
        assert!(!transport.is_running());

        assert!(read_line(&mut client).await.is_empty());
    }

    #[tokio::test]
    async fn test_multiple_listeners_share_port() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let transport = TcpTransport::new(TransportOptions {
            host: "127.0.0.1".to_string(),
            port: 0,
            num_listeners: 2,
            store,
        });
        transport.start().await.unwrap();

        // Several clients connect and each gets served, whichever listener
        // the kernel hands them to.
        for i in 0..4 {
            let mut client = connect(&transport).await;
            let frame = format!("{:04}PING\n", i);
            send(&mut client, frame.as_bytes()).await;
            assert_eq!(read_line(&mut client).await, format!("{:04}PONG\r\n", i).into_bytes());
        }

        transport.close().await;
    }
}
