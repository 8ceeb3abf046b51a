//! Persistence collaborators.
//!
//! # Data Flow
//! ```text
//! persisted-mode request
//!     → KeyStore::lookup(key)      (read-only, raw KeyRecord)
//!     → policy resolver            (strict validation)
//!     → UsageSink::append(record)  (append-only, best-effort)
//! ```
//!
//! # Design Decisions
//! - Stores hand back raw records; validation lives in the resolver
//! - Both traits must tolerate many concurrent callers
//! - No caching: every lookup sees the current key state

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::KeyId;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A key as stored, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: i64,
    pub target_url: String,
    pub method: String,
    pub fail_rate: i64,
    pub min_latency: i64,
    pub max_latency: i64,
    pub error_codes: Vec<i64>,
    pub active: bool,
}

/// One accounting fact: a request authorized by a key at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageRecord {
    pub key_id: KeyId,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    pub fn now(key_id: KeyId) -> Self {
        Self {
            key_id,
            timestamp: Utc::now(),
        }
    }
}

/// Read-only key lookup.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Returns `Ok(None)` when the key does not exist.
    async fn lookup(&self, key: &str) -> Result<Option<KeyRecord>, StoreError>;
}

/// Append-only usage accounting.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn append(&self, record: &UsageRecord) -> Result<(), StoreError>;
}
