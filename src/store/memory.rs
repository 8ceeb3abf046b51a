//! In-memory key store and usage sink.
//!
//! Keys are held in an atomically swappable table so a config reload can
//! replace them without blocking lookups. Usage is kept as an append-only
//! log plus per-key counters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;

use crate::policy::KeyId;
use crate::store::{KeyRecord, KeyStore, StoreError, UsageRecord, UsageSink};

/// Thread-safe in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    keys: Arc<ArcSwap<HashMap<String, KeyRecord>>>,
    usage_counts: Arc<DashMap<KeyId, u64>>,
    usage_log: Arc<Mutex<Vec<UsageRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with keys.
    pub fn with_keys(keys: impl IntoIterator<Item = (String, KeyRecord)>) -> Self {
        let store = Self::new();
        store.replace_keys(keys.into_iter().collect());
        store
    }

    /// Atomically replace the whole key table.
    pub fn replace_keys(&self, keys: HashMap<String, KeyRecord>) {
        let count = keys.len();
        self.keys.store(Arc::new(keys));
        tracing::info!(keys = count, "Key table replaced");
    }

    pub fn key_count(&self) -> usize {
        self.keys.load().len()
    }

    /// Number of usage records appended for a key.
    pub fn usage_count(&self, key_id: KeyId) -> u64 {
        self.usage_counts.get(&key_id).map(|r| *r.value()).unwrap_or(0)
    }

    /// Snapshot of every usage record, in append order.
    pub fn usage_records(&self) -> Vec<UsageRecord> {
        match self.usage_log.lock() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn lookup(&self, key: &str) -> Result<Option<KeyRecord>, StoreError> {
        Ok(self.keys.load().get(key).cloned())
    }
}

#[async_trait]
impl UsageSink for MemoryStore {
    async fn append(&self, record: &UsageRecord) -> Result<(), StoreError> {
        self.usage_log
            .lock()
            .map_err(|_| StoreError::Unavailable("usage log mutex poisoned".into()))?
            .push(*record);
        *self.usage_counts.entry(record.key_id).or_insert(0) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64) -> KeyRecord {
        KeyRecord {
            id,
            target_url: "http://up.test".into(),
            method: "ANY".into(),
            fail_rate: 0,
            min_latency: 0,
            max_latency: 0,
            error_codes: vec![],
            active: true,
        }
    }

    #[tokio::test]
    async fn test_lookup_and_replace() {
        let store = MemoryStore::with_keys([("k1".to_string(), record(1))]);
        assert_eq!(store.lookup("k1").await.unwrap().unwrap().id, 1);
        assert!(store.lookup("k2").await.unwrap().is_none());

        let mut next = HashMap::new();
        next.insert("k2".to_string(), record(2));
        store.replace_keys(next);

        assert!(store.lookup("k1").await.unwrap().is_none());
        assert_eq!(store.lookup("k2").await.unwrap().unwrap().id, 2);
        assert_eq!(store.key_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends() {
        let store = MemoryStore::new();
        let mut tasks = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.append(&UsageRecord::now(KeyId(i % 2))).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.usage_count(KeyId(0)), 25);
        assert_eq!(store.usage_count(KeyId(1)), 25);
        assert_eq!(store.usage_records().len(), 50);
    }
}
