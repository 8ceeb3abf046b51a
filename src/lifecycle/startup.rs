//! Startup orchestration.
//!
//! # Responsibilities
//! - Open the configured key store and usage sink
//! - Seed keys declared in the config file
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Config keys are upserted into SQLite, so the file wins over stale rows

use std::sync::Arc;

use crate::config::{ProxyConfig, StoreBackend};
use crate::store::{KeyStore, MemoryStore, SqliteStore, StoreError, UsageSink};

/// Error type for startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("store.database_url is required for the sqlite backend")]
    MissingDatabaseUrl,
    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),
}

/// The stores handed to the HTTP server.
pub struct Stores {
    pub key_store: Arc<dyn KeyStore>,
    pub usage_sink: Arc<dyn UsageSink>,
    /// Set for the memory backend, which supports hot reload of `[[keys]]`.
    pub memory: Option<MemoryStore>,
}

/// Open the backend selected in `config.store` and load the configured keys.
pub async fn open_stores(config: &ProxyConfig) -> Result<Stores, StartupError> {
    match config.store.backend {
        StoreBackend::Memory => {
            let store = MemoryStore::with_keys(config.keys.iter().map(|k| k.to_record()));
            tracing::info!(keys = store.key_count(), "Using in-memory key store");
            Ok(Stores {
                key_store: Arc::new(store.clone()),
                usage_sink: Arc::new(store.clone()),
                memory: Some(store),
            })
        }
        StoreBackend::Sqlite => {
            let url = config
                .store
                .database_url
                .as_deref()
                .ok_or(StartupError::MissingDatabaseUrl)?;
            let store = SqliteStore::connect(url, config.store.max_connections).await?;
            store.ensure_schema().await?;
            for key in &config.keys {
                let (name, record) = key.to_record();
                store.upsert_key(&name, &record).await?;
            }
            tracing::info!(seeded_keys = config.keys.len(), "Using SQLite key store");

            let store = Arc::new(store);
            Ok(Stores {
                key_store: store.clone(),
                usage_sink: store,
                memory: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::store::UsageRecord;
    use crate::policy::KeyId;

    const CONFIG: &str = r#"
[[keys]]
key = "k1"
id = 1
target_url = "http://up.test"
"#;

    #[tokio::test]
    async fn test_memory_backend_seeds_keys() {
        let config = parse_config(CONFIG).unwrap();
        let stores = open_stores(&config).await.unwrap();
        let record = stores.key_store.lookup("k1").await.unwrap().unwrap();
        assert_eq!(record.id, 1);
        assert_eq!(record.method, "ANY");

        stores.usage_sink.append(&UsageRecord::now(KeyId(1))).await.unwrap();
        assert_eq!(stores.memory.unwrap().usage_count(KeyId(1)), 1);
    }

    #[tokio::test]
    async fn test_sqlite_backend_seeds_keys() {
        let mut config = parse_config(CONFIG).unwrap();
        config.store.backend = StoreBackend::Sqlite;
        config.store.database_url = Some("sqlite::memory:".to_string());
        config.store.max_connections = 1;

        let stores = open_stores(&config).await.unwrap();
        assert!(stores.memory.is_none());
        let record = stores.key_store.lookup("k1").await.unwrap().unwrap();
        assert_eq!(record.target_url, "http://up.test");
    }

    #[tokio::test]
    async fn test_sqlite_without_url() {
        let mut config = ProxyConfig::default();
        config.store.backend = StoreBackend::Sqlite;
        assert!(matches!(
            open_stores(&config).await,
            Err(StartupError::MissingDatabaseUrl)
        ));
    }
}
