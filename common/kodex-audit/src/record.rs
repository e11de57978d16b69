use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{ActorType, EventResult, Severity};

/// One row of the append-only audit trail, produced by the audit
/// subscriber from exactly one domain event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub event_type: &'static str,
    pub timestamp: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub actor_type: ActorType,
    pub target_id: Option<String>,
    pub target_type: Option<String>,
    pub result: EventResult,
    pub realm_id: String,
    pub severity: Severity,
    pub metadata: serde_json::Value,
    pub session_id: Option<String>,
}
