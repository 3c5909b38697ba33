//! pharos - broadcast key-value store
//!
//! A TCP service exposing a shared keyed value space; every connected
//! client is pushed a notification whenever any key changes.

use pharos_server::{health, Config, TcpTransport, TransportOptions};
use pharos_store::{MemoryStore, Store};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if PHAROS_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("PHAROS_CONFIG") {
                tracing::info!("loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("PHAROS_CONFIG").is_ok() {
                tracing::error!("failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("using default configuration");
            Config::default()
        }
    };

    tracing::info!("starting pharos server");
    tracing::info!(
        "  listen address: {}:{}",
        config.network.host,
        config.network.port
    );
    tracing::info!("  listeners: {}", config.network.num_listeners());

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    // Shutdown signal for the health server; the transport carries its own.
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let health_handle = if config.http.enabled {
        let addr = config.http_bind_addr()?;
        tracing::info!("  health endpoint: http://{}/ping", addr);
        let shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = health::run_health_server(addr, shutdown_rx).await {
                tracing::error!("health server errored: {}", e);
            }
        }))
    } else {
        tracing::info!("  health endpoint: disabled");
        None
    };

    let transport = TcpTransport::new(TransportOptions {
        host: config.network.host.clone(),
        port: config.network.port,
        num_listeners: config.network.listeners,
        store: store.clone(),
    });
    transport.start().await?;

    // Wait for the interrupt signal.
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("received shutdown signal, shutting down gracefully");

    let _ = shutdown_tx.send(());
    transport.close().await;
    store.close();
    if let Some(handle) = health_handle {
        let _ = handle.await;
    }

    tracing::info!("exiting");
    Ok(())
}
