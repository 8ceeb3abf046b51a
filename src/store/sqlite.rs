//! SQLite-backed key store and usage sink.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::policy::KeyId;
use crate::store::{KeyRecord, KeyStore, StoreError, UsageRecord, UsageSink};

/// Key store and usage sink over a pooled SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to the database, creating the file if it does not exist.
    ///
    /// In-memory URLs must use a single connection, otherwise every pooled
    /// connection sees its own empty database.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        tracing::info!(database_url = %database_url, max_connections, "Connected to SQLite");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the key and usage tables if missing.
    ///
    /// A failure to create the usage table is logged and tolerated: the proxy
    /// still serves, the dashboard just sees no usage.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                api_key TEXT NOT NULL UNIQUE,
                target_url TEXT NOT NULL DEFAULT '',
                method TEXT NOT NULL DEFAULT 'ANY',
                fail_rate INTEGER NOT NULL DEFAULT 0,
                min_latency INTEGER NOT NULL DEFAULT 0,
                max_latency INTEGER NOT NULL DEFAULT 0,
                error_codes TEXT NOT NULL DEFAULT '[]',
                is_active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let usage = sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                api_key_id INTEGER NOT NULL REFERENCES api_keys(id) ON DELETE CASCADE,
                requested_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await;

        match usage {
            Ok(_) => {
                sqlx::query("CREATE INDEX IF NOT EXISTS idx_usage_log_key ON usage_log (api_key_id)")
                    .execute(&self.pool)
                    .await?;
                tracing::info!("Usage logging: usage_log table ready");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not ensure usage_log table; usage will not be recorded");
            }
        }
        Ok(())
    }

    /// Insert or replace a key row.
    pub async fn upsert_key(&self, key: &str, record: &KeyRecord) -> Result<(), StoreError> {
        let codes = serde_json::to_string(&record.error_codes)
            .map_err(|e| StoreError::Corrupt(format!("error_codes: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO api_keys
                (id, api_key, target_url, method, fail_rate, min_latency, max_latency, error_codes, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(api_key) DO UPDATE SET
                target_url = excluded.target_url,
                method = excluded.method,
                fail_rate = excluded.fail_rate,
                min_latency = excluded.min_latency,
                max_latency = excluded.max_latency,
                error_codes = excluded.error_codes,
                is_active = excluded.is_active
            "#,
        )
        .bind(record.id)
        .bind(key)
        .bind(&record.target_url)
        .bind(&record.method)
        .bind(record.fail_rate)
        .bind(record.min_latency)
        .bind(record.max_latency)
        .bind(codes)
        .bind(record.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Number of usage rows recorded for a key.
    pub async fn usage_count(&self, key_id: KeyId) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM usage_log WHERE api_key_id = ?1")
            .bind(key_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("cnt")?)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<KeyRecord, StoreError> {
    let raw_codes: Option<String> = row.try_get("error_codes")?;
    let error_codes = match raw_codes.as_deref().map(str::trim) {
        None | Some("") => Vec::new(),
        Some(raw) => serde_json::from_str::<Vec<i64>>(raw)
            .map_err(|e| StoreError::Corrupt(format!("error_codes `{}`: {}", raw, e)))?,
    };

    Ok(KeyRecord {
        id: row.try_get("id")?,
        target_url: row.try_get::<Option<String>, _>("target_url")?.unwrap_or_default(),
        method: row.try_get::<Option<String>, _>("method")?.unwrap_or_default(),
        fail_rate: row.try_get("fail_rate")?,
        min_latency: row.try_get("min_latency")?,
        max_latency: row.try_get("max_latency")?,
        error_codes,
        active: row.try_get("is_active")?,
    })
}

#[async_trait]
impl KeyStore for SqliteStore {
    async fn lookup(&self, key: &str) -> Result<Option<KeyRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, target_url, method, fail_rate, min_latency, max_latency, error_codes, is_active
            FROM api_keys
            WHERE api_key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }
}

#[async_trait]
impl UsageSink for SqliteStore {
    async fn append(&self, record: &UsageRecord) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO usage_log (api_key_id, requested_at) VALUES (?1, ?2)")
            .bind(record.key_id.0)
            .bind(record.timestamp.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
