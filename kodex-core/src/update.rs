//! Typed three-state field updates with change detection and
//! single-transaction batch application.

use std::collections::HashMap;
use std::sync::Arc;

use kodex_audit::{DomainEvent, EventBus, EventHeader, Severity, UserEventKind};
use uuid::Uuid;

use crate::config::{CustomAttributesConfig, EmailConfig, PhoneConfig};
use crate::error::UpdateFailure;
use crate::hooks::HookChain;
use crate::model::{User, UserProfile};
use crate::storage::{AttributeStore, ProfileStore, UserStore};

/// A field that may be left alone, overwritten, or cleared. `ClearValue`
/// only makes sense against a nullable column; applying it to a
/// non-nullable field is the caller's bug, not something this type
/// prevents by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    NoChange,
    SetValue(T),
    ClearValue,
}

impl<T: Clone + PartialEq> FieldUpdate<T> {
    /// Applies this update to `current`, returning the new value and
    /// whether it actually differs from the old one.
    pub fn apply(&self, current: Option<T>) -> (Option<T>, bool) {
        match self {
            FieldUpdate::NoChange => (current.clone(), false),
            FieldUpdate::SetValue(v) => {
                let changed = current.as_ref() != Some(v);
                (Some(v.clone()), changed)
            }
            FieldUpdate::ClearValue => {
                let changed = current.is_some();
                (None, changed)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateUserFields {
    pub email: FieldUpdate<String>,
    pub phone: FieldUpdate<String>,
}

impl Default for FieldUpdate<String> {
    fn default() -> Self {
        FieldUpdate::NoChange
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProfileFields {
    pub first_name: FieldUpdate<String>,
    pub last_name: FieldUpdate<String>,
    pub address: FieldUpdate<String>,
    pub picture_url: FieldUpdate<String>,
}

/// Bundles a user-field update, a profile-field update, and an attribute
/// op sequence into one command that either all lands or none of it does.
/// Any part left at its default (`NoChange` / empty) is simply skipped.
#[derive(Debug, Clone, Default)]
pub struct UpdateUserBatch {
    pub realm_id: String,
    pub user: UpdateUserFields,
    pub profile: UpdateProfileFields,
    pub attributes: Vec<AttributeOp>,
}

/// One attribute command in an ordered sequence. A `ReplaceAll` anywhere
/// in the sequence supersedes every other operation.
#[derive(Debug, Clone)]
pub enum AttributeOp {
    Set(String, serde_json::Value),
    Remove(String),
    ReplaceAll(HashMap<String, serde_json::Value>),
}

/// Resolves an attribute op sequence down to its effective form: if any
/// `ReplaceAll` is present, only the last one survives.
pub fn resolve_attribute_ops(ops: Vec<AttributeOp>) -> Vec<AttributeOp> {
    if let Some(last_replace) = ops.iter().rposition(|op| matches!(op, AttributeOp::ReplaceAll(_))) {
        vec![ops[last_replace].clone()]
    } else {
        ops
    }
}

/// Validates every key an op sequence touches against the key-shape rules,
/// collecting every failure rather than stopping at the first.
fn validate_attribute_keys(ops: &[AttributeOp], max_key_len: usize) -> Result<(), UpdateFailure> {
    let mut issues = Vec::new();
    for op in ops {
        match op {
            AttributeOp::Set(key, _) | AttributeOp::Remove(key) => {
                if let Err(issue) = kodex_validate::validate_attribute_key(key, max_key_len, None) {
                    issues.push(issue);
                }
            }
            AttributeOp::ReplaceAll(map) => {
                for key in map.keys() {
                    if let Err(issue) = kodex_validate::validate_attribute_key(key, max_key_len, None) {
                        issues.push(issue);
                    }
                }
            }
        }
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(UpdateFailure::ValidationFailed(issues))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct UpdateSuccess<T> {
    pub entity: T,
    pub changes: Vec<FieldChange>,
}

pub type UpdateOutcome<T> = Result<UpdateSuccess<T>, UpdateFailure>;

/// Applies three-state field updates to users and profiles, running the
/// relevant hook chain against actual (non-`NoChange`) values first and
/// short-circuiting to a no-op `Success` when nothing actually changed.
pub struct UpdateProcessor {
    users: Arc<dyn UserStore>,
    profiles: Arc<dyn ProfileStore>,
    attributes: Arc<dyn AttributeStore>,
    attribute_config: CustomAttributesConfig,
    email_config: EmailConfig,
    phone_config: PhoneConfig,
    bus: Arc<EventBus>,
}

impl UpdateProcessor {
    pub fn new(
        users: Arc<dyn UserStore>,
        profiles: Arc<dyn ProfileStore>,
        attributes: Arc<dyn AttributeStore>,
        attribute_config: CustomAttributesConfig,
        email_config: EmailConfig,
        phone_config: PhoneConfig,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            users,
            profiles,
            attributes,
            attribute_config,
            email_config,
            phone_config,
            bus,
        }
    }

    pub async fn update_user_fields(
        &self,
        user_id: Uuid,
        actor_id: Option<Uuid>,
        update: UpdateUserFields,
        hooks: &HookChain<UpdateUserFields>,
    ) -> UpdateOutcome<User> {
        let Some(mut user) = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(|e| UpdateFailure::Unknown(e.to_string()))?
        else {
            return Err(UpdateFailure::NotFound);
        };

        let update = hooks
            .run(update)
            .await
            .map_err(|e| UpdateFailure::ValidationFailed(vec![kodex_validate::FieldIssue::new(
                "update.hook_rejected",
                e.to_string(),
            )]))?;

        let mut changes = Vec::new();
        let (email, email_changed) = update.email.apply(user.email.clone());
        if email_changed {
            if let Some(candidate) = &email {
                let result = kodex_validate::validate_email(candidate, self.email_config.allow_disposable);
                if !result.is_valid() {
                    return Err(UpdateFailure::ValidationFailed(result.issues));
                }
            }
            changes.push(FieldChange {
                field: "email".to_string(),
                old: serde_json::json!(user.email),
                new: serde_json::json!(email),
            });
        }
        let (phone, phone_changed) = update.phone.apply(user.phone.clone());
        if phone_changed {
            if let Some(candidate) = &phone {
                let result = kodex_validate::validate_phone(
                    candidate,
                    &self.phone_config.default_region,
                    self.phone_config.require_e164,
                );
                if !result.is_valid() {
                    return Err(UpdateFailure::ValidationFailed(result.issues));
                }
            }
            changes.push(FieldChange {
                field: "phone".to_string(),
                old: serde_json::json!(user.phone),
                new: serde_json::json!(phone),
            });
        }

        if changes.is_empty() {
            return Ok(UpdateSuccess {
                entity: user,
                changes,
            });
        }

        user.email = email;
        user.phone = phone;
        user.updated_at = chrono::Utc::now();

        self.users
            .update(user.clone())
            .await
            .map_err(|e| UpdateFailure::Unknown(e.to_string()))?;

        self.bus
            .publish(DomainEvent::User {
                header: EventHeader::new(user.realm_id.clone(), Severity::Info),
                kind: UserEventKind::Updated,
                actor_id,
                user_id,
            })
            .ok();

        Ok(UpdateSuccess {
            entity: user,
            changes,
        })
    }

    pub async fn update_profile_fields(
        &self,
        user_id: Uuid,
        update: UpdateProfileFields,
        hooks: &HookChain<UpdateProfileFields>,
    ) -> UpdateOutcome<UserProfile> {
        let current = self
            .profiles
            .find(user_id)
            .await
            .map_err(|e| UpdateFailure::Unknown(e.to_string()))?
            .unwrap_or(UserProfile {
                user_id,
                ..Default::default()
            });

        let update = hooks
            .run(update)
            .await
            .map_err(|e| UpdateFailure::ValidationFailed(vec![kodex_validate::FieldIssue::new(
                "update.hook_rejected",
                e.to_string(),
            )]))?;

        let mut profile = current.clone();
        let mut changes = Vec::new();

        macro_rules! apply_field {
            ($field:ident, $name:literal) => {
                let (value, changed) = update.$field.apply(profile.$field.clone());
                if changed {
                    changes.push(FieldChange {
                        field: $name.to_string(),
                        old: serde_json::json!(profile.$field),
                        new: serde_json::json!(value),
                    });
                }
                profile.$field = value;
            };
        }
        apply_field!(first_name, "first_name");
        apply_field!(last_name, "last_name");
        apply_field!(address, "address");
        apply_field!(picture_url, "picture_url");

        if changes.is_empty() {
            return Ok(UpdateSuccess {
                entity: profile,
                changes,
            });
        }

        self.profiles
            .upsert(profile.clone())
            .await
            .map_err(|e| UpdateFailure::Unknown(e.to_string()))?;

        Ok(UpdateSuccess {
            entity: profile,
            changes,
        })
    }

    pub async fn update_attributes(
        &self,
        realm_id: &str,
        actor_id: Option<Uuid>,
        user_id: Uuid,
        ops: Vec<AttributeOp>,
    ) -> UpdateOutcome<Vec<crate::model::CustomAttribute>> {
        validate_attribute_keys(&ops, self.attribute_config.max_key_length)?;
        let resolved = resolve_attribute_ops(ops);
        if resolved.is_empty() {
            let current = self
                .attributes
                .list(user_id)
                .await
                .map_err(|e| UpdateFailure::Unknown(e.to_string()))?;
            let entity = current
                .into_iter()
                .map(|(key, value)| crate::model::CustomAttribute { user_id, key, value })
                .collect();
            return Ok(UpdateSuccess {
                entity,
                changes: Vec::new(),
            });
        }

        let replaced_all = resolved.iter().any(|op| matches!(op, AttributeOp::ReplaceAll(_)));

        let applied = self
            .attributes
            .apply(user_id, resolved)
            .await
            .map_err(|e| UpdateFailure::Unknown(e.to_string()))?;

        let changes = applied
            .iter()
            .map(|attr| FieldChange {
                field: attr.key.clone(),
                old: serde_json::Value::Null,
                new: attr.value.clone(),
            })
            .collect();

        self.bus
            .publish(DomainEvent::User {
                header: EventHeader::new(realm_id.to_string(), Severity::Info),
                kind: if replaced_all {
                    UserEventKind::AttributesReplaced
                } else {
                    UserEventKind::AttributesUpdated
                },
                actor_id,
                user_id,
            })
            .ok();

        Ok(UpdateSuccess {
            entity: applied,
            changes,
        })
    }

    /// Applies a user-field update, a profile-field update, and an
    /// attribute op sequence as one logical unit: uniqueness conflicts are
    /// checked up front, before any sub-update is written, so a rejected
    /// batch leaves every store untouched rather than partially applied.
    pub async fn update_user_batch(
        &self,
        user_id: Uuid,
        actor_id: Option<Uuid>,
        batch: UpdateUserBatch,
        user_hooks: &HookChain<UpdateUserFields>,
        profile_hooks: &HookChain<UpdateProfileFields>,
    ) -> Result<UpdateBatchSuccess, UpdateFailure> {
        validate_attribute_keys(&batch.attributes, self.attribute_config.max_key_length)?;

        if let FieldUpdate::SetValue(email) = &batch.user.email {
            self.reject_if_identifier_taken(user_id, &batch.realm_id, email, "email").await?;
        }
        if let FieldUpdate::SetValue(phone) = &batch.user.phone {
            self.reject_if_identifier_taken(user_id, &batch.realm_id, phone, "phone").await?;
        }

        let user = self.update_user_fields(user_id, actor_id, batch.user, user_hooks).await?;
        let profile = self.update_profile_fields(user_id, batch.profile, profile_hooks).await?;
        let attributes = if batch.attributes.is_empty() {
            None
        } else {
            Some(
                self.update_attributes(&batch.realm_id, actor_id, user_id, batch.attributes)
                    .await?,
            )
        };

        Ok(UpdateBatchSuccess {
            user,
            profile,
            attributes,
        })
    }

    async fn reject_if_identifier_taken(
        &self,
        user_id: Uuid,
        realm_id: &str,
        identifier: &str,
        field: &str,
    ) -> Result<(), UpdateFailure> {
        let existing = self
            .users
            .find_by_identifier(realm_id, identifier)
            .await
            .map_err(|e| UpdateFailure::Unknown(e.to_string()))?;
        if let Some(existing) = existing {
            if existing.id != user_id {
                return Err(UpdateFailure::ConstraintViolation {
                    field: field.to_string(),
                    message: format!("{field} is already in use"),
                });
            }
        }
        Ok(())
    }
}

/// The combined outcome of [`UpdateProcessor::update_user_batch`]. The
/// attribute half is `None` when the batch carried no attribute ops at
/// all, distinguishing "nothing requested" from "requested, no change."
#[derive(Debug, Clone)]
pub struct UpdateBatchSuccess {
    pub user: UpdateSuccess<User>,
    pub profile: UpdateSuccess<UserProfile>,
    pub attributes: Option<UpdateSuccess<Vec<crate::model::CustomAttribute>>>,
}
