use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current revision of the published event schema. Carried on the wire so a
/// consumer can detect and reject events from a future, incompatible shape.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    Admin,
    System,
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub actor_type: ActorType,
    pub id: Option<Uuid>,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            actor_type: ActorType::System,
            id: None,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            actor_type: ActorType::Anonymous,
            id: None,
        }
    }

    pub fn user(id: Uuid) -> Self {
        Self {
            actor_type: ActorType::User,
            id: Some(id),
        }
    }

    pub fn admin(id: Uuid) -> Self {
        Self {
            actor_type: ActorType::Admin,
            id: Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub target_type: String,
    pub id: Option<String>,
}

impl Target {
    pub fn new(target_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            id: Some(id.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventResult {
    Success,
    Failure,
    PartialSuccess,
}

/// The fields every published event carries regardless of kind, per the
/// external event schema: a unique id, timestamp, realm, severity, schema
/// version, and a grab-bag of optional correlation fields plus free-form
/// tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHeader {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub realm_id: String,
    pub severity: Severity,
    pub schema_version: u32,
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub correlation_id: Option<String>,
    pub caused_by_event_id: Option<Uuid>,
    pub tags: HashMap<String, String>,
}

impl EventHeader {
    pub fn new(realm_id: impl Into<String>, severity: Severity) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            realm_id: realm_id.into(),
            severity,
            schema_version: SCHEMA_VERSION,
            request_id: None,
            session_id: None,
            source_ip: None,
            user_agent: None,
            correlation_id: None,
            caused_by_event_id: None,
            tags: HashMap::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = Some(ip.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Created,
    Revoked,
    Expired,
    Activity,
    Anomaly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserEventKind {
    Created,
    Updated,
    Deleted,
    RolesUpdated,
    AttributesUpdated,
    AttributesReplaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationEventKind {
    Sent,
    Verified,
    Failed,
}

/// Every domain event the core publishes, represented as a tagged union: a
/// common [`EventHeader`] plus a payload shaped for that event's kind. One
/// audit record is produced per event by the audit subscriber; the bus
/// itself is indifferent to payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum DomainEvent {
    #[serde(rename = "LOGIN_SUCCESS")]
    LoginSuccess {
        header: EventHeader,
        user_id: Uuid,
        metadata: serde_json::Value,
    },
    #[serde(rename = "LOGIN_FAILED")]
    LoginFailed {
        header: EventHeader,
        user_id: Option<Uuid>,
        identifier: String,
        reason: String,
        metadata: serde_json::Value,
    },
    #[serde(rename = "PASSWORD_CHANGED")]
    PasswordChanged {
        header: EventHeader,
        actor_id: Uuid,
        user_id: Uuid,
        metadata: serde_json::Value,
    },
    #[serde(rename = "PASSWORD_CHANGE_FAILED")]
    PasswordChangeFailed {
        header: EventHeader,
        actor_id: Uuid,
        user_id: Uuid,
        reason: String,
    },
    #[serde(rename = "TOKEN_ISSUED")]
    TokenIssued {
        header: EventHeader,
        user_id: Uuid,
        token_id: Uuid,
        metadata: serde_json::Value,
    },
    #[serde(rename = "TOKEN_REFRESHED")]
    TokenRefreshed {
        header: EventHeader,
        user_id: Uuid,
        old_token_id: Uuid,
        new_token_id: Uuid,
    },
    #[serde(rename = "TOKEN_REFRESH_FAILED")]
    TokenRefreshFailed {
        header: EventHeader,
        user_id: Option<Uuid>,
        reason: String,
    },
    #[serde(rename = "TOKEN_VERIFY_FAILED")]
    TokenVerifyFailed { header: EventHeader, reason: String },
    #[serde(rename = "TOKEN_REVOKED")]
    TokenRevoked {
        header: EventHeader,
        user_id: Uuid,
        token_ids: Vec<Uuid>,
    },
    #[serde(rename = "SECURITY_VIOLATION")]
    TokenReplayDetected {
        header: EventHeader,
        user_id: Uuid,
        token_id: Uuid,
    },
    #[serde(rename = "RATE_LIMIT_EXCEEDED")]
    RateLimitExceeded {
        header: EventHeader,
        identifier: String,
    },
    #[serde(rename = "ACCOUNT_LOCKED")]
    AccountLocked {
        header: EventHeader,
        user_id: Option<Uuid>,
        identifier: String,
        unlock_at: Option<DateTime<Utc>>,
    },
    #[serde(rename = "ACCOUNT_UNLOCKED")]
    AccountUnlocked {
        header: EventHeader,
        admin_id: Option<Uuid>,
        user_id: Option<Uuid>,
        identifier: String,
    },
    Session {
        header: EventHeader,
        kind: SessionEventKind,
        session_id: Uuid,
        user_id: Uuid,
    },
    User {
        header: EventHeader,
        kind: UserEventKind,
        actor_id: Option<Uuid>,
        user_id: Uuid,
    },
    EmailVerification {
        header: EventHeader,
        kind: VerificationEventKind,
        user_id: Uuid,
    },
    PhoneVerification {
        header: EventHeader,
        kind: VerificationEventKind,
        user_id: Uuid,
    },
}

impl DomainEvent {
    pub fn header(&self) -> &EventHeader {
        match self {
            DomainEvent::LoginSuccess { header, .. }
            | DomainEvent::LoginFailed { header, .. }
            | DomainEvent::PasswordChanged { header, .. }
            | DomainEvent::PasswordChangeFailed { header, .. }
            | DomainEvent::TokenIssued { header, .. }
            | DomainEvent::TokenRefreshed { header, .. }
            | DomainEvent::TokenRefreshFailed { header, .. }
            | DomainEvent::TokenVerifyFailed { header, .. }
            | DomainEvent::TokenRevoked { header, .. }
            | DomainEvent::TokenReplayDetected { header, .. }
            | DomainEvent::RateLimitExceeded { header, .. }
            | DomainEvent::AccountLocked { header, .. }
            | DomainEvent::AccountUnlocked { header, .. }
            | DomainEvent::Session { header, .. }
            | DomainEvent::User { header, .. }
            | DomainEvent::EmailVerification { header, .. }
            | DomainEvent::PhoneVerification { header, .. } => header,
        }
    }

    /// The stable event-type string used for subscription filters and for
    /// the audit record's `event_type` column.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::LoginSuccess { .. } => "LOGIN_SUCCESS",
            DomainEvent::LoginFailed { .. } => "LOGIN_FAILED",
            DomainEvent::PasswordChanged { .. } => "PASSWORD_CHANGED",
            DomainEvent::PasswordChangeFailed { .. } => "PASSWORD_CHANGE_FAILED",
            DomainEvent::TokenIssued { .. } => "TOKEN_ISSUED",
            DomainEvent::TokenRefreshed { .. } => "TOKEN_REFRESHED",
            DomainEvent::TokenRefreshFailed { .. } => "TOKEN_REFRESH_FAILED",
            DomainEvent::TokenVerifyFailed { .. } => "TOKEN_VERIFY_FAILED",
            DomainEvent::TokenRevoked { .. } => "TOKEN_REVOKED",
            DomainEvent::TokenReplayDetected { .. } => "SECURITY_VIOLATION",
            DomainEvent::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            DomainEvent::AccountLocked { .. } => "ACCOUNT_LOCKED",
            DomainEvent::AccountUnlocked { .. } => "ACCOUNT_UNLOCKED",
            DomainEvent::Session { kind, .. } => match kind {
                SessionEventKind::Created => "SESSION_CREATED",
                SessionEventKind::Revoked => "SESSION_REVOKED",
                SessionEventKind::Expired => "SESSION_EXPIRED",
                SessionEventKind::Activity => "SESSION_ACTIVITY",
                SessionEventKind::Anomaly => "SESSION_ANOMALY",
            },
            DomainEvent::User { kind, .. } => match kind {
                UserEventKind::Created => "USER_CREATED",
                UserEventKind::Updated => "USER_UPDATED",
                UserEventKind::Deleted => "USER_DELETED",
                UserEventKind::RolesUpdated => "USER_ROLES_UPDATED",
                UserEventKind::AttributesUpdated => "USER_ATTRS_UPDATED",
                UserEventKind::AttributesReplaced => "USER_ATTRS_REPLACED",
            },
            DomainEvent::EmailVerification { kind, .. } => match kind {
                VerificationEventKind::Sent => "EMAIL_VERIFICATION_SENT",
                VerificationEventKind::Verified => "EMAIL_VERIFICATION_VERIFIED",
                VerificationEventKind::Failed => "EMAIL_VERIFICATION_FAILED",
            },
            DomainEvent::PhoneVerification { kind, .. } => match kind {
                VerificationEventKind::Sent => "PHONE_VERIFICATION_SENT",
                VerificationEventKind::Verified => "PHONE_VERIFICATION_VERIFIED",
                VerificationEventKind::Failed => "PHONE_VERIFICATION_FAILED",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_table_for_security_violation() {
        let event = DomainEvent::TokenReplayDetected {
            header: EventHeader::new("acme", Severity::Critical),
            user_id: Uuid::new_v4(),
            token_id: Uuid::new_v4(),
        };
        assert_eq!(event.event_type(), "SECURITY_VIOLATION");
        assert_eq!(event.header().severity, Severity::Critical);
    }

    #[test]
    fn header_builder_sets_optional_fields() {
        let header = EventHeader::new("acme", Severity::Info)
            .with_request_id("req-1")
            .with_session_id("sess-1")
            .with_source_ip("203.0.113.7");
        assert_eq!(header.request_id.as_deref(), Some("req-1"));
        assert_eq!(header.session_id.as_deref(), Some("sess-1"));
        assert_eq!(header.source_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(header.schema_version, SCHEMA_VERSION);
    }
}
