//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::store::KeyRecord;

/// Root configuration for the chaos proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Outbound connection pool settings.
    pub upstream: UpstreamConfig,

    /// Key store and usage sink backend.
    pub store: StoreConfig,

    /// Usage accounting settings.
    pub usage: UsageConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Keys served by the in-memory store.
    pub keys: Vec<KeyConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Total time for one inbound request, injected delay included, in seconds.
    pub request_secs: u64,

    /// Time to wait for upstream response headers in seconds.
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 120,
            upstream_secs: 30,
        }
    }
}

/// Outbound connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Idle pooled connections are closed after this many seconds.
    pub pool_idle_timeout_secs: u64,

    /// Maximum idle connections kept per upstream host.
    pub pool_max_idle_per_host: usize,

    /// TCP keepalive interval in seconds.
    pub keepalive_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            pool_idle_timeout_secs: 90,
            pool_max_idle_per_host: 32,
            keepalive_secs: 60,
        }
    }
}

/// Which store backs key lookup and usage accounting.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Database URL (e.g., "sqlite://chaos.db"). Required for sqlite.
    pub database_url: Option<String>,

    /// Maximum pooled database connections.
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 25,
        }
    }
}

/// Usage accounting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UsageConfig {
    /// How long a response may wait for its usage write before reporting it
    /// as not recorded, in milliseconds.
    pub settle_grace_ms: u64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self { settle_grace_ms: 250 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A persisted key declared in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyConfig {
    /// The opaque key clients put in the path.
    pub key: String,

    /// Accounting identifier.
    pub id: i64,

    pub target_url: String,

    /// HTTP method or "ANY".
    #[serde(default = "default_method")]
    pub method: String,

    /// Failure percentage, 0-100.
    #[serde(default)]
    pub fail_rate: i64,

    #[serde(default)]
    pub min_latency: i64,

    #[serde(default)]
    pub max_latency: i64,

    #[serde(default)]
    pub error_codes: Vec<i64>,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_method() -> String {
    "ANY".to_string()
}

fn default_active() -> bool {
    true
}

impl KeyConfig {
    /// Convert into the store's raw record, keyed by the client-facing key.
    pub fn to_record(&self) -> (String, KeyRecord) {
        (
            self.key.clone(),
            KeyRecord {
                id: self.id,
                target_url: self.target_url.clone(),
                method: self.method.clone(),
                fail_rate: self.fail_rate,
                min_latency: self.min_latency,
                max_latency: self.max_latency,
                error_codes: self.error_codes.clone(),
                active: self.active,
            },
        )
    }
}
