//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use chaos_proxy::config::ProxyConfig;
use chaos_proxy::http::HttpServer;
use chaos_proxy::lifecycle::Shutdown;
use chaos_proxy::policy::KeyId;
use chaos_proxy::store::{KeyRecord, KeyStore, MemoryStore, StoreError, UsageRecord, UsageSink};

/// What a mock backend saw for one request.
#[derive(Debug, Clone, Default)]
pub struct CapturedRequest {
    /// `GET /path?query HTTP/1.1`
    pub request_line: String,
    /// Header names lowercased, in arrival order.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Requests seen by a mock backend.
pub type SeenRequests = Arc<Mutex<Vec<CapturedRequest>>>;

pub fn request_lines(seen: &SeenRequests) -> Vec<String> {
    seen.lock().unwrap().iter().map(|r| r.request_line.clone()).collect()
}

/// Canned response for a programmable backend.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, &'static str)>,
    pub body: String,
    /// Wait this long before sending anything.
    pub delay: Duration,
}

impl MockResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "application/json")],
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }
}

/// Start a mock backend on an ephemeral port that answers every request
/// with `200` and `body` as JSON.
pub async fn start_mock_backend(body: &'static str) -> (SocketAddr, SeenRequests) {
    start_programmable_backend(move || async move { MockResponse::json(200, body) }).await
}

/// Start a programmable mock backend with async support.
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, SeenRequests)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: SeenRequests = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let seen_by_task = seen.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    let seen = seen_by_task.clone();
                    tokio::spawn(async move {
                        if let Some(request) = read_request(&mut socket).await {
                            seen.lock().unwrap().push(request);
                        }
                        let response = f().await;
                        tokio::time::sleep(response.delay).await;

                        let reason = axum::http::StatusCode::from_u16(response.status)
                            .ok()
                            .and_then(|s| s.canonical_reason())
                            .unwrap_or("Unknown");
                        let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, reason);
                        for (name, value) in &response.headers {
                            head.push_str(&format!("{}: {}\r\n", name, value));
                        }
                        head.push_str(&format!(
                            "Content-Length: {}\r\nConnection: close\r\n\r\n",
                            response.body.len()
                        ));

                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.write_all(response.body.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, seen)
}

/// Start a backend that reads one request, never answers, and reports when
/// the proxy closes the connection.
pub async fn start_hanging_backend() -> (SocketAddr, mpsc::UnboundedReceiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let closed_tx = closed_tx.clone();
            tokio::spawn(async move {
                let request = read_request(&mut socket).await.unwrap_or_default();
                let mut buf = [0u8; 64];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => continue,
                    }
                }
                let _ = closed_tx.send(request);
            });
        }
    });

    (addr, closed_rx)
}

/// Read the request head and a `Content-Length` body.
async fn read_request(socket: &mut TcpStream) -> Option<CapturedRequest> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        raw.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&raw[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(n, _)| n == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }

    Some(CapturedRequest {
        request_line,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

/// An address nothing listens on.
pub fn closed_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Start the proxy on an ephemeral port.
pub async fn start_proxy(
    config: ProxyConfig,
    key_store: Arc<dyn KeyStore>,
    usage_sink: Arc<dyn UsageSink>,
) -> (SocketAddr, Shutdown) {
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, key_store, usage_sink);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    (addr, shutdown)
}

/// Start the proxy backed by one memory store for keys and usage.
pub async fn start_proxy_with_store(store: &MemoryStore) -> (SocketAddr, Shutdown) {
    start_proxy_with_config(ProxyConfig::default(), store).await
}

pub async fn start_proxy_with_config(config: ProxyConfig, store: &MemoryStore) -> (SocketAddr, Shutdown) {
    start_proxy(
        config,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    )
    .await
}

/// A key record with no chaos that accepts any method.
pub fn key_record(id: i64, target_url: &str) -> KeyRecord {
    KeyRecord {
        id,
        target_url: target_url.to_string(),
        method: "ANY".to_string(),
        fail_rate: 0,
        min_latency: 0,
        max_latency: 0,
        error_codes: vec![],
        active: true,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Usage sink whose writes always fail.
pub struct FailingSink;

#[async_trait]
impl UsageSink for FailingSink {
    async fn append(&self, _record: &UsageRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("usage log offline".into()))
    }
}

pub fn usage_of(store: &MemoryStore, id: i64) -> u64 {
    store.usage_count(KeyId(id))
}
