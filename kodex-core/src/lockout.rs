//! Sliding-window failed-login counting with automatic lock/unlock.
//! A lockout is keyed by the normalized identifier a login attempt used
//! (email or phone), not by user id, so an attacker probing a nonexistent
//! account is still rate-limited the same way a real one would be.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kodex_audit::{DomainEvent, EventBus, EventHeader, Severity};
use tracing::warn;
use uuid::Uuid;

use crate::config::LockoutPolicy;
use crate::error::CoreResult;
use crate::metrics::KodexMetrics;
use crate::model::{AccountLockout, FailedLoginAttempt};
use crate::storage::LockoutStore;

/// The outcome of checking whether an identifier is currently locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutStatus {
    NotLocked,
    Locked { unlock_at: Option<DateTime<Utc>> },
}

impl LockoutStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockoutStatus::Locked { .. })
    }
}

/// Owns the sliding-window failure count and the lock it triggers. Holds
/// no per-identifier state itself beyond the configured policy; every
/// count and lock row lives in the storage collaborator so it survives
/// process restarts and is shared across instances.
pub struct LockoutService {
    store: Arc<dyn LockoutStore>,
    bus: Arc<EventBus>,
    metrics: Option<Arc<KodexMetrics>>,
    policy: LockoutPolicy,
}

impl LockoutService {
    pub fn new(
        store: Arc<dyn LockoutStore>,
        bus: Arc<EventBus>,
        metrics: Option<Arc<KodexMetrics>>,
        policy: LockoutPolicy,
    ) -> Self {
        Self {
            store,
            bus,
            metrics,
            policy,
        }
    }

    /// Returns whether `identifier` is currently locked, clearing the lock
    /// first if it has already passed its `unlock_at`.
    pub async fn check_lockout(&self, realm_id: &str, identifier: &str, now: DateTime<Utc>) -> CoreResult<LockoutStatus> {
        let Some(lockout) = self
            .store
            .find_lockout(identifier)
            .await
            .map_err(|e| crate::error::CoreError::Storage(e.to_string()))?
        else {
            return Ok(LockoutStatus::NotLocked);
        };

        if let Some(unlock_at) = lockout.unlock_at {
            if unlock_at <= now {
                self.store
                    .clear_lockout(identifier)
                    .await
                    .map_err(|e| crate::error::CoreError::Storage(e.to_string()))?;
                self.publish_unlocked(realm_id, identifier, None, None);
                return Ok(LockoutStatus::NotLocked);
            }
        }

        Ok(LockoutStatus::Locked {
            unlock_at: lockout.unlock_at,
        })
    }

    /// Inserts a failed-attempt row and, if the sliding window now holds at
    /// least `threshold` rows for this identifier, upserts a lockout and
    /// publishes `ACCOUNT_LOCKED`.
    pub async fn record_failed_attempt(
        &self,
        realm_id: &str,
        identifier: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
        user_id: Option<Uuid>,
        reason: &str,
    ) -> CoreResult<Option<DateTime<Utc>>> {
        let now = Utc::now();

        if self.policy.threshold == u32::MAX {
            // `disabled` policy: never locks, but the attempt is still
            // recorded so a host's own reporting can see it.
            self.store
                .record_failed_attempt(FailedLoginAttempt {
                    identifier: identifier.to_string(),
                    ip: ip.map(str::to_string),
                    user_agent: user_agent.map(str::to_string),
                    timestamp: now,
                    reason: reason.to_string(),
                })
                .await
                .map_err(|e| crate::error::CoreError::Storage(e.to_string()))?;
            return Ok(None);
        }

        self.store
            .record_failed_attempt(FailedLoginAttempt {
                identifier: identifier.to_string(),
                ip: ip.map(str::to_string),
                user_agent: user_agent.map(str::to_string),
                timestamp: now,
                reason: reason.to_string(),
            })
            .await
            .map_err(|e| crate::error::CoreError::Storage(e.to_string()))?;

        let since = now - self.policy.window;
        let count = self
            .store
            .count_recent_attempts(identifier, since)
            .await
            .map_err(|e| crate::error::CoreError::Storage(e.to_string()))?;

        if count < self.policy.threshold as u64 {
            return Ok(None);
        }

        let unlock_at = self.policy.lock_duration.map(|duration| now + duration);
        self.store
            .upsert_lockout(AccountLockout {
                identifier: identifier.to_string(),
                locked_at: now,
                unlock_at,
                reason: reason.to_string(),
            })
            .await
            .map_err(|e| crate::error::CoreError::Storage(e.to_string()))?;

        self.bus
            .publish(DomainEvent::AccountLocked {
                header: EventHeader::new(realm_id.to_string(), Severity::Warning),
                user_id,
                identifier: identifier.to_string(),
                unlock_at,
            })
            .ok();
        if let Some(metrics) = &self.metrics {
            metrics.account_lockouts_total.inc();
        }

        Ok(unlock_at)
    }

    /// Wipes the sliding window for `identifier` on a successful login.
    pub async fn clear_failed_attempts(&self, identifier: &str) -> CoreResult<()> {
        self.store
            .clear_failed_attempts(identifier)
            .await
            .map_err(|e| crate::error::CoreError::Storage(e.to_string()))
    }

    /// Administrative unlock: deletes the lock row regardless of
    /// `unlock_at` and publishes `ACCOUNT_UNLOCKED`.
    pub async fn unlock(&self, realm_id: &str, identifier: &str, admin_id: Option<Uuid>, user_id: Option<Uuid>) -> CoreResult<()> {
        self.store
            .clear_lockout(identifier)
            .await
            .map_err(|e| crate::error::CoreError::Storage(e.to_string()))?;
        self.publish_unlocked(realm_id, identifier, admin_id, user_id);
        Ok(())
    }

    fn publish_unlocked(&self, realm_id: &str, identifier: &str, admin_id: Option<Uuid>, user_id: Option<Uuid>) {
        if let Err(err) = self.bus.publish(DomainEvent::AccountUnlocked {
            header: EventHeader::new(realm_id.to_string(), Severity::Info),
            admin_id,
            user_id,
            identifier: identifier.to_string(),
        }) {
            warn!(error = %err, "failed to publish ACCOUNT_UNLOCKED");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct InMemoryLockouts {
        attempts: Mutex<Vec<FailedLoginAttempt>>,
        locks: Mutex<StdHashMap<String, AccountLockout>>,
    }

    #[async_trait::async_trait]
    impl LockoutStore for InMemoryLockouts {
        async fn record_failed_attempt(&self, attempt: FailedLoginAttempt) -> CoreResult<()> {
            self.attempts.lock().await.push(attempt);
            Ok(())
        }
        async fn count_recent_attempts(&self, identifier: &str, since: DateTime<Utc>) -> CoreResult<u64> {
            Ok(self
                .attempts
                .lock()
                .await
                .iter()
                .filter(|a| a.identifier == identifier && a.timestamp > since)
                .count() as u64)
        }
        async fn upsert_lockout(&self, lockout: AccountLockout) -> CoreResult<()> {
            self.locks.lock().await.insert(lockout.identifier.clone(), lockout);
            Ok(())
        }
        async fn find_lockout(&self, identifier: &str) -> CoreResult<Option<AccountLockout>> {
            Ok(self.locks.lock().await.get(identifier).cloned())
        }
        async fn clear_lockout(&self, identifier: &str) -> CoreResult<()> {
            self.locks.lock().await.remove(identifier);
            Ok(())
        }
        async fn clear_failed_attempts(&self, identifier: &str) -> CoreResult<()> {
            self.attempts.lock().await.retain(|a| a.identifier != identifier);
            Ok(())
        }
    }

    fn bus() -> Arc<EventBus> {
        Arc::new(EventBus::new(kodex_audit::SubscriberRegistry::new()))
    }

    #[tokio::test]
    async fn locks_after_reaching_the_threshold() {
        let service = LockoutService::new(
            Arc::new(InMemoryLockouts::default()),
            bus(),
            None,
            LockoutPolicy::strict(),
        );

        for _ in 0..2 {
            let locked = service
                .record_failed_attempt("acme", "john@example.com", Some("1.2.3.4"), None, None, "bad_password")
                .await
                .unwrap();
            assert!(locked.is_none());
        }

        let locked = service
            .record_failed_attempt("acme", "john@example.com", Some("1.2.3.4"), None, None, "bad_password")
            .await
            .unwrap();
        assert!(locked.is_some());

        let status = service
            .check_lockout("acme", "john@example.com", Utc::now())
            .await
            .unwrap();
        assert!(status.is_locked());
    }

    #[tokio::test]
    async fn expired_lock_is_auto_cleared_on_check() {
        let store = Arc::new(InMemoryLockouts::default());
        store
            .upsert_lockout(AccountLockout {
                identifier: "john@example.com".to_string(),
                locked_at: Utc::now() - chrono::Duration::hours(2),
                unlock_at: Some(Utc::now() - chrono::Duration::hours(1)),
                reason: "too_many_attempts".to_string(),
            })
            .await
            .unwrap();
        let service = LockoutService::new(store, bus(), None, LockoutPolicy::strict());

        let status = service
            .check_lockout("acme", "john@example.com", Utc::now())
            .await
            .unwrap();
        assert_eq!(status, LockoutStatus::NotLocked);
    }

    #[tokio::test]
    async fn clear_failed_attempts_resets_the_window() {
        let service = LockoutService::new(
            Arc::new(InMemoryLockouts::default()),
            bus(),
            None,
            LockoutPolicy::strict(),
        );
        service
            .record_failed_attempt("acme", "john@example.com", None, None, None, "bad_password")
            .await
            .unwrap();
        service.clear_failed_attempts("john@example.com").await.unwrap();

        let locked = service
            .record_failed_attempt("acme", "john@example.com", None, None, None, "bad_password")
            .await
            .unwrap();
        assert!(locked.is_none(), "cleared window should not count toward the new threshold");
    }

    #[tokio::test]
    async fn disabled_policy_never_locks() {
        let service = LockoutService::new(
            Arc::new(InMemoryLockouts::default()),
            bus(),
            None,
            LockoutPolicy::disabled(),
        );
        for _ in 0..50 {
            let locked = service
                .record_failed_attempt("acme", "john@example.com", None, None, None, "bad_password")
                .await
                .unwrap();
            assert!(locked.is_none());
        }
    }
}
