//! Best-effort usage recording.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::observability::metrics;
use crate::policy::KeyId;
use crate::store::{UsageRecord, UsageSink};

/// Final state of one usage write, as seen by the response path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageStatus {
    Recorded,
    Failed,
    /// Still running when the grace period ran out. It keeps running detached.
    Pending,
}

impl UsageStatus {
    /// Value of the diagnostic response header.
    pub fn header_value(&self) -> &'static str {
        match self {
            UsageStatus::Recorded => "1",
            UsageStatus::Failed | UsageStatus::Pending => "0",
        }
    }
}

/// Starts usage writes without putting them on the response path.
#[derive(Clone)]
pub struct UsageRecorder {
    sink: Arc<dyn UsageSink>,
    grace: Duration,
}

impl UsageRecorder {
    pub fn new(sink: Arc<dyn UsageSink>, grace: Duration) -> Self {
        Self { sink, grace }
    }

    /// Spawn the write for one accepted request and return immediately.
    ///
    /// The write is a separate task, so it completes even if the inbound
    /// connection goes away.
    pub fn begin(&self, key_id: KeyId) -> PendingUsage {
        let sink = self.sink.clone();
        let record = UsageRecord::now(key_id);
        let handle = tokio::spawn(async move {
            match sink.append(&record).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(
                        key_id = %record.key_id,
                        error = %e,
                        "Usage log insert failed"
                    );
                    metrics::record_usage_failure();
                    false
                }
            }
        });

        PendingUsage {
            handle,
            grace: self.grace,
        }
    }
}

/// A usage write in flight.
pub struct PendingUsage {
    handle: JoinHandle<bool>,
    grace: Duration,
}

impl PendingUsage {
    /// Wait at most the grace period for the write to finish.
    pub async fn settle(self) -> UsageStatus {
        let mut handle = self.handle;
        match tokio::time::timeout(self.grace, &mut handle).await {
            Ok(Ok(true)) => UsageStatus::Recorded,
            Ok(Ok(false)) => UsageStatus::Failed,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Usage task panicked");
                metrics::record_usage_failure();
                UsageStatus::Failed
            }
            Err(_) => {
                tracing::warn!(grace_ms = self.grace.as_millis() as u64, "Usage write still pending");
                UsageStatus::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;

    struct FailingSink;

    #[async_trait]
    impl UsageSink for FailingSink {
        async fn append(&self, _record: &UsageRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }
    }

    struct SlowSink {
        inner: MemoryStore,
    }

    #[async_trait]
    impl UsageSink for SlowSink {
        async fn append(&self, record: &UsageRecord) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.inner.append(record).await
        }
    }

    #[tokio::test]
    async fn test_recorded() {
        let store = MemoryStore::new();
        let recorder = UsageRecorder::new(Arc::new(store.clone()), Duration::from_secs(1));

        let status = recorder.begin(KeyId(3)).settle().await;
        assert_eq!(status, UsageStatus::Recorded);
        assert_eq!(status.header_value(), "1");
        assert_eq!(store.usage_count(KeyId(3)), 1);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let recorder = UsageRecorder::new(Arc::new(FailingSink), Duration::from_secs(1));
        let status = recorder.begin(KeyId(1)).settle().await;
        assert_eq!(status, UsageStatus::Failed);
        assert_eq!(status.header_value(), "0");
    }

    #[tokio::test]
    async fn test_slow_write_completes_detached() {
        let store = MemoryStore::new();
        let sink = SlowSink { inner: store.clone() };
        let recorder = UsageRecorder::new(Arc::new(sink), Duration::from_millis(10));

        assert_eq!(recorder.begin(KeyId(9)).settle().await, UsageStatus::Pending);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.usage_count(KeyId(9)), 1);
    }
}
