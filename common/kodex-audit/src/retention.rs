use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::AuditResult;

/// Storage operation the retention service needs: delete every audit
/// record older than a cutoff and report how many rows were removed.
/// Implementations must be idempotent — running cleanup twice with the
/// same cutoff deletes nothing the second time.
#[async_trait]
pub trait RetentionStore: Send + Sync {
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AuditResult<u64>;
}

/// Applies a configured retention period to an audit store. `cleanup()`
/// is the operation a scheduled sweep calls; `cleanup_older_than` is
/// exposed directly for tests and for hosts that want a one-off cutoff.
pub struct RetentionService<S: RetentionStore> {
    store: S,
    retention_period: Duration,
}

impl<S: RetentionStore> RetentionService<S> {
    pub fn new(store: S, retention_period: Duration) -> Self {
        Self {
            store,
            retention_period,
        }
    }

    pub async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> AuditResult<u64> {
        self.store.delete_older_than(cutoff).await
    }

    pub async fn cleanup(&self) -> AuditResult<u64> {
        let cutoff = Utc::now() - self.retention_period;
        self.cleanup_older_than(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeStore {
        records: Mutex<Vec<DateTime<Utc>>>,
    }

    #[async_trait]
    impl RetentionStore for FakeStore {
        async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AuditResult<u64> {
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|ts| *ts >= cutoff);
            Ok((before - records.len()) as u64)
        }
    }

    #[tokio::test]
    async fn cleanup_removes_only_records_past_the_retention_period() {
        let now = Utc::now();
        let store = FakeStore {
            records: Mutex::new(vec![now - Duration::days(45), now - Duration::days(15)]),
        };
        let service = RetentionService::new(store, Duration::days(30));

        let deleted = service.cleanup().await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(service.store.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let now = Utc::now();
        let store = FakeStore {
            records: Mutex::new(vec![now - Duration::days(45)]),
        };
        let service = RetentionService::new(store, Duration::days(30));

        assert_eq!(service.cleanup().await.unwrap(), 1);
        assert_eq!(service.cleanup().await.unwrap(), 0);
    }
}
