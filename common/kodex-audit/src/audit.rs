use std::sync::Arc;

use async_trait::async_trait;
use kodex_validate::sanitize_json;
use tracing::error;
use uuid::Uuid;

use crate::bus::{EventSubscriber, Interest};
use crate::error::AuditResult;
use crate::event::{ActorType, DomainEvent, EventResult, SessionEventKind};
use crate::record::AuditRecord;

/// The storage collaborator for audit records. Deliberately minimal: a
/// single append operation. Querying and retention are separate concerns
/// ([`crate::retention::RetentionStore`]) so a host can back them with
/// different access patterns (e.g. a write-optimized table plus a
/// time-partitioned archive).
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert(&self, record: AuditRecord) -> AuditResult<()>;
}

/// Subscribes to every event on the bus and produces exactly one audit
/// record per event, sanitizing metadata before it reaches storage.
/// Persistence failures are logged and swallowed: the publisher and other
/// subscribers are never affected by a broken audit sink.
pub struct AuditSubscriber<S: AuditStore> {
    store: Arc<S>,
}

pub const SUBSCRIBER_NAME: &str = "kodex-audit";

impl<S: AuditStore> AuditSubscriber<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: AuditStore> EventSubscriber for AuditSubscriber<S> {
    fn name(&self) -> &str {
        SUBSCRIBER_NAME
    }

    fn interests(&self) -> Interest {
        Interest::All
    }

    fn priority(&self) -> i32 {
        i32::MAX
    }

    async fn handle(&self, event: &DomainEvent) {
        let record = map_event_to_record(event);
        if let Err(err) = self.store.insert(record).await {
            error!(error = %err, event_type = event.event_type(), "failed to persist audit record");
        }
    }
}

fn target(target_type: &str, id: Option<Uuid>) -> (Option<String>, Option<String>) {
    (Some(target_type.to_string()), id.map(|id| id.to_string()))
}

fn target_list(target_type: &str, ids: &[Uuid]) -> (Option<String>, Option<String>) {
    let joined = ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",");
    (Some(target_type.to_string()), Some(joined))
}

/// Maps a domain event onto its audit record per the event-to-record
/// table: actor, target, result, and severity are derived from the event
/// kind, and all metadata is run through the sanitizer before it is
/// attached to the record.
fn map_event_to_record(event: &DomainEvent) -> AuditRecord {
    let header = event.header().clone();
    let event_type = event.event_type();

    let (actor_type, actor_id, target_type, target_id, result, metadata) = match event {
        DomainEvent::LoginSuccess { user_id, metadata, .. } => {
            let (tt, tid) = target("user", Some(*user_id));
            (ActorType::User, Some(*user_id), tt, tid, EventResult::Success, metadata.clone())
        }
        DomainEvent::LoginFailed {
            user_id,
            identifier,
            reason,
            metadata,
            ..
        } => {
            let (actor_type, actor_id) = match user_id {
                Some(id) => (ActorType::User, Some(*id)),
                None => (ActorType::Anonymous, None),
            };
            let (tt, tid) = target("user", *user_id);
            let mut meta = metadata.clone();
            if let Some(obj) = meta.as_object_mut() {
                obj.insert("identifier".to_string(), serde_json::json!(identifier));
                obj.insert("reason".to_string(), serde_json::json!(reason));
            }
            (actor_type, actor_id, tt, tid, EventResult::Failure, meta)
        }
        DomainEvent::PasswordChanged {
            actor_id, user_id, metadata, ..
        } => {
            let (tt, tid) = target("user", Some(*user_id));
            (ActorType::User, Some(*actor_id), tt, tid, EventResult::Success, metadata.clone())
        }
        DomainEvent::PasswordChangeFailed {
            actor_id, user_id, reason, ..
        } => {
            let (tt, tid) = target("user", Some(*user_id));
            (
                ActorType::User,
                Some(*actor_id),
                tt,
                tid,
                EventResult::Failure,
                serde_json::json!({ "reason": reason }),
            )
        }
        DomainEvent::TokenIssued {
            user_id, token_id, metadata, ..
        } => {
            let (tt, tid) = target("token", Some(*token_id));
            (ActorType::User, Some(*user_id), tt, tid, EventResult::Success, metadata.clone())
        }
        DomainEvent::TokenRefreshed {
            user_id,
            old_token_id,
            new_token_id,
            ..
        } => {
            let (tt, tid) = target("token", Some(*new_token_id));
            (
                ActorType::User,
                Some(*user_id),
                tt,
                tid,
                EventResult::Success,
                serde_json::json!({ "oldTokenId": old_token_id, "newTokenId": new_token_id }),
            )
        }
        DomainEvent::TokenRefreshFailed { user_id, reason, .. } => {
            let (actor_type, actor_id) = match user_id {
                Some(id) => (ActorType::User, Some(*id)),
                None => (ActorType::Anonymous, None),
            };
            (
                actor_type,
                actor_id,
                None,
                None,
                EventResult::Failure,
                serde_json::json!({ "reason": reason }),
            )
        }
        DomainEvent::TokenVerifyFailed { reason, .. } => (
            ActorType::Anonymous,
            None,
            None,
            None,
            EventResult::Failure,
            serde_json::json!({ "reason": reason }),
        ),
        DomainEvent::TokenRevoked { user_id, token_ids, .. } => {
            let (tt, tid) = target_list("token", token_ids);
            (ActorType::User, Some(*user_id), tt, tid, EventResult::Success, serde_json::Value::Null)
        }
        DomainEvent::TokenReplayDetected { user_id, token_id, .. } => {
            let (tt, tid) = target("refresh_token", Some(*token_id));
            (ActorType::User, Some(*user_id), tt, tid, EventResult::Failure, serde_json::Value::Null)
        }
        DomainEvent::RateLimitExceeded { identifier, .. } => (
            ActorType::Anonymous,
            None,
            None,
            None,
            EventResult::Failure,
            serde_json::json!({ "identifier": identifier }),
        ),
        DomainEvent::AccountLocked {
            user_id,
            identifier,
            unlock_at,
            ..
        } => {
            let (tt, tid) = match user_id {
                Some(id) => target("user", Some(*id)),
                None => target("identifier", None),
            };
            (
                ActorType::System,
                None,
                tt,
                tid,
                EventResult::Success,
                serde_json::json!({ "unlockAt": unlock_at, "identifier": identifier }),
            )
        }
        DomainEvent::AccountUnlocked {
            admin_id,
            user_id,
            identifier,
            ..
        } => {
            let (tt, tid) = match user_id {
                Some(id) => target("user", Some(*id)),
                None => target("identifier", None),
            };
            let actor_type = if admin_id.is_some() { ActorType::Admin } else { ActorType::System };
            (
                actor_type,
                *admin_id,
                tt,
                tid,
                EventResult::Success,
                serde_json::json!({ "identifier": identifier }),
            )
        }
        DomainEvent::Session {
            kind, session_id, user_id, ..
        } => {
            let (tt, tid) = target("session", Some(*session_id));
            let result = match kind {
                SessionEventKind::Anomaly => EventResult::Failure,
                _ => EventResult::Success,
            };
            (ActorType::User, Some(*user_id), tt, tid, result, serde_json::Value::Null)
        }
        DomainEvent::User { actor_id, user_id, .. } => {
            let (tt, tid) = target("user", Some(*user_id));
            let actor_type = if actor_id.is_some() { ActorType::User } else { ActorType::System };
            (actor_type, *actor_id, tt, tid, EventResult::Success, serde_json::Value::Null)
        }
        DomainEvent::EmailVerification { kind, user_id, .. }
        | DomainEvent::PhoneVerification { kind, user_id, .. } => {
            let (tt, tid) = target("user", Some(*user_id));
            let result = match kind {
                crate::event::VerificationEventKind::Failed => EventResult::Failure,
                _ => EventResult::Success,
            };
            (ActorType::User, Some(*user_id), tt, tid, result, serde_json::Value::Null)
        }
    };

    AuditRecord {
        id: Uuid::new_v4(),
        event_type,
        timestamp: header.timestamp,
        actor_id,
        actor_type,
        target_id,
        target_type,
        result,
        realm_id: header.realm_id,
        severity: header.severity,
        metadata: sanitize_json(metadata),
        session_id: header.session_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventHeader, Severity};
    use std::sync::Mutex;

    struct InMemoryStore {
        records: Mutex<Vec<AuditRecord>>,
    }

    #[async_trait]
    impl AuditStore for InMemoryStore {
        async fn insert(&self, record: AuditRecord) -> AuditResult<()> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    #[tokio::test]
    async fn login_success_maps_to_a_success_record_with_sanitized_metadata() {
        let store = Arc::new(InMemoryStore {
            records: Mutex::new(Vec::new()),
        });
        let subscriber = AuditSubscriber::new(store.clone());
        let user_id = Uuid::new_v4();
        let event = DomainEvent::LoginSuccess {
            header: EventHeader::new("acme", Severity::Info),
            user_id,
            metadata: serde_json::json!({ "password": "shouldnotappear", "ip": "<script>" }),
        };

        subscriber.handle(&event).await;

        let records = store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.event_type, "LOGIN_SUCCESS");
        assert!(matches!(record.result, EventResult::Success));
        assert_eq!(record.metadata["password"], serde_json::json!("[REDACTED]"));
        assert_eq!(record.metadata["ip"], serde_json::json!("&lt;script&gt;"));
    }

    #[tokio::test]
    async fn token_replay_is_a_failure_record_targeting_the_refresh_token() {
        let store = Arc::new(InMemoryStore {
            records: Mutex::new(Vec::new()),
        });
        let subscriber = AuditSubscriber::new(store.clone());
        let token_id = Uuid::new_v4();
        let event = DomainEvent::TokenReplayDetected {
            header: EventHeader::new("acme", Severity::Critical),
            user_id: Uuid::new_v4(),
            token_id,
        };

        subscriber.handle(&event).await;

        let records = store.records.lock().unwrap();
        assert_eq!(records[0].event_type, "SECURITY_VIOLATION");
        assert!(matches!(records[0].result, EventResult::Failure));
        assert_eq!(records[0].target_id.as_deref(), Some(token_id.to_string().as_str()));
    }
}
