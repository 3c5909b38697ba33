//! HTTP health endpoint.
//!
//! A small HTTP/1 server disjoint from the TCP protocol, for load
//! balancers and liveness probes.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Runs the HTTP health server until shutdown.
pub async fn run_health_server(
    addr: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("health server listening on http://{}/ping", addr);

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, _)) => {
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(io, service_fn(handle_request))
                            .await
                        {
                            tracing::debug!("health connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("health server accept error: {}", e);
                }
            },
            _ = shutdown.recv() => {
                tracing::info!("health server shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Handles an HTTP request to the health server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/ping" => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("pong")))
            .unwrap(),
        "/health" | "/healthz" => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("OK")))
            .unwrap(),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .unwrap(),
    };

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn test_ping_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let server = tokio::spawn(run_health_server(addr, shutdown_rx));

        // The server may need a moment to rebind the address.
        let mut connected = None;
        for _ in 0..100 {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    connected = Some(stream);
                    break;
                }
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        }
        let mut stream = connected.expect("health server never came up");

        stream
            .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("pong"));

        let _ = shutdown_tx.send(());
        let _ = server.await;
    }
}
