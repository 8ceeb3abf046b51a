//! Configuration file watcher for hot reload of the key table.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use crate::config::loader::load_config;
use crate::config::schema::ProxyConfig;
use crate::store::MemoryStore;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, reloading...");
                        match load_config(&path) {
                            Ok(new_config) => {
                                let _ = tx.send(new_config);
                            }
                            Err(e) => {
                                tracing::error!(
                                    "Failed to reload config: {}. Keeping current configuration.",
                                    e
                                );
                            }
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Apply reloaded key tables to the memory store until shutdown.
///
/// Only `[[keys]]` is hot reloadable; other sections need a restart.
pub async fn apply_key_updates(
    store: MemoryStore,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(config) = update else { break };
                store.replace_keys(config.keys.iter().map(|k| k.to_record()).collect());
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Key reload task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::KeyConfig;
    use crate::store::KeyStore;

    #[tokio::test]
    async fn test_apply_key_updates_swaps_table() {
        let store = MemoryStore::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(apply_key_updates(store.clone(), rx, shutdown_rx));

        let mut config = ProxyConfig::default();
        config.keys.push(KeyConfig {
            key: "k1".into(),
            id: 1,
            target_url: "http://up.test".into(),
            method: "ANY".into(),
            fail_rate: 0,
            min_latency: 0,
            max_latency: 0,
            error_codes: vec![],
            active: true,
        });
        tx.send(config).unwrap();

        for _ in 0..50 {
            if store.lookup("k1").await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.lookup("k1").await.unwrap().is_some());

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
