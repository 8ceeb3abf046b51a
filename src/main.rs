//! Chaos Proxy
//!
//! A reverse proxy that injects latency and failures in front of any HTTP
//! upstream.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                   CHAOS PROXY                     │
//!     Client Request   │  ┌─────────┐   ┌──────────┐   ┌──────────────┐   │
//!     ─────────────────┼─▶│  http   │──▶│  policy  │──▶│    chaos     │   │
//!                      │  │ server  │   │ resolver │   │   injector   │   │
//!                      │  └─────────┘   └────┬─────┘   └──────┬───────┘   │
//!                      │                     │                │           │
//!                      │                     ▼                ▼           │
//!                      │               ┌──────────┐   ┌──────────────┐    │
//!                      │               │  store   │   │  forwarding  │────┼──▶ Upstream
//!                      │               │ + usage  │   │    engine    │    │
//!                      │               └──────────┘   └──────────────┘    │
//!                      │                                                   │
//!                      │   config · observability · lifecycle              │
//!                      └──────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use chaos_proxy::config::{apply_key_updates, load_config, ConfigWatcher, ProxyConfig};
use chaos_proxy::http::HttpServer;
use chaos_proxy::lifecycle::{open_stores, wait_for_signal, Shutdown};
use chaos_proxy::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "chaos-proxy", version, about = "Reverse proxy that injects latency and failures")]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long, env = "CHAOS_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long, env = "CHAOS_PROXY_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability)?;
    tracing::info!("chaos-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        upstream_timeout_secs = config.timeouts.upstream_secs,
        store = ?config.store.backend,
        keys = config.keys.len(),
        "Configuration loaded"
    );

    let stores = open_stores(&config).await?;
    let shutdown = Shutdown::new();

    // Only the memory backend reloads keys from the file.
    let _watcher = match (&args.config, stores.memory.clone()) {
        (Some(path), Some(memory)) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            tokio::spawn(apply_key_updates(memory, updates, shutdown.subscribe()));
            Some(handle)
        }
        _ => None,
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening");

    let server = HttpServer::new(config, stores.key_store, stores.usage_sink);
    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    wait_for_signal().await;
    shutdown.trigger();

    server_task.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}
