//! Role membership helpers and the role-assignment command. Role
//! existence is enforced at assignment time, not by a foreign key the
//! storage collaborator is trusted to have: a role must exist before
//! it can be linked to a user.

use std::sync::Arc;

use kodex_audit::{DomainEvent, EventBus, EventHeader, Severity, UserEventKind};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::storage::RoleStore;

/// Replaces a user's full role set, rejecting any name the realm has not
/// registered. All-or-nothing: if any requested role does not exist, no
/// roles are assigned and the caller sees `RoleNotFound`.
pub struct RoleAssignmentService {
    roles: Arc<dyn RoleStore>,
    bus: Arc<EventBus>,
}

impl RoleAssignmentService {
    pub fn new(roles: Arc<dyn RoleStore>, bus: Arc<EventBus>) -> Self {
        Self { roles, bus }
    }

    /// Overwrites the roles assigned to `user_id` with `roles`, after
    /// confirming every one of them exists in `realm_id`. Publishes
    /// `USER_ROLES_UPDATED` on success.
    pub async fn set_roles(
        &self,
        realm_id: &str,
        actor_id: Option<Uuid>,
        user_id: Uuid,
        roles: Vec<String>,
    ) -> CoreResult<()> {
        for role in &roles {
            if !self
                .roles
                .exists(realm_id, role)
                .await
                .map_err(|e| CoreError::Storage(e.to_string()))?
            {
                return Err(CoreError::RoleNotFound(role.clone()));
            }
        }

        self.roles
            .set_roles(user_id, roles)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        self.bus
            .publish(DomainEvent::User {
                header: EventHeader::new(realm_id.to_string(), Severity::Info),
                kind: UserEventKind::RolesUpdated,
                actor_id,
                user_id,
            })
            .ok();

        Ok(())
    }
}

/// Returns whether `roles` contains `required`, exactly as stored (role
/// names are case-sensitive primary keys within a realm).
pub fn has_role(roles: &[String], required: &str) -> bool {
    roles.iter().any(|r| r == required)
}

/// Returns whether `roles` contains any of `required`.
pub fn has_any_role(roles: &[String], required: &[&str]) -> bool {
    required.iter().any(|r| has_role(roles, r))
}

/// Returns whether `roles` contains every role in `required`.
pub fn has_all_roles(roles: &[String], required: &[&str]) -> bool {
    required.iter().all(|r| has_role(roles, r))
}
