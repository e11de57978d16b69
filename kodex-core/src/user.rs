//! User creation and deletion, the only path a user record is ever written
//! or removed through. Both run their hook chain before anything lands so a
//! host can normalize or veto the request with the same machinery it uses
//! for profile and attribute updates.

use std::sync::Arc;

use chrono::Utc;
use kodex_audit::{DomainEvent, EventBus, EventHeader, Severity, UserEventKind};
use kodex_crypto::PasswordHasherService;
use kodex_validate::FieldIssue;
use uuid::Uuid;

use crate::config::{EmailConfig, PasswordPolicyConfig, PhoneConfig};
use crate::error::{CoreError, CoreResult};
use crate::hooks::HookChain;
use crate::model::{User, UserStatus};
use crate::roles::RoleAssignmentService;
use crate::storage::UserStore;

/// Passed through `beforeUserCreate`. A hook may normalize the email/phone
/// or reject the request outright before anything is validated against
/// storage.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub realm_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: String,
    pub roles: Vec<String>,
}

/// Passed through `beforeUserDelete`. `hard` selects between removing the
/// row outright and disabling it in place.
#[derive(Debug, Clone)]
pub struct UserDeletion {
    pub realm_id: String,
    pub user_id: Uuid,
    pub hard: bool,
}

/// Creates and deletes users. Every write is preceded by the relevant hook
/// chain and followed by a `USER_CREATED`/`USER_DELETED` event; nothing in
/// between talks to storage directly.
pub struct UserLifecycleService {
    users: Arc<dyn UserStore>,
    roles: Arc<RoleAssignmentService>,
    hasher: PasswordHasherService,
    bus: Arc<EventBus>,
    email_config: EmailConfig,
    phone_config: PhoneConfig,
    password_policy: PasswordPolicyConfig,
}

impl UserLifecycleService {
    pub fn new(
        users: Arc<dyn UserStore>,
        roles: Arc<RoleAssignmentService>,
        hasher: PasswordHasherService,
        bus: Arc<EventBus>,
        email_config: EmailConfig,
        phone_config: PhoneConfig,
        password_policy: PasswordPolicyConfig,
    ) -> Self {
        Self {
            users,
            roles,
            hasher,
            bus,
            email_config,
            phone_config,
            password_policy,
        }
    }

    /// Validates the email/phone/password, rejects a taken identifier,
    /// hashes the password, inserts the row, assigns the initial roles (if
    /// any), and publishes `USER_CREATED`. A user needs at least one of
    /// email or phone; `create_user` rejects a request with neither.
    pub async fn create_user(
        &self,
        actor_id: Option<Uuid>,
        request: NewUser,
        before_create: &HookChain<NewUser>,
    ) -> CoreResult<User> {
        let request = before_create.run(request).await.map_err(|e| CoreError::InvalidInput {
            field: "user".to_string(),
            errors: vec![FieldIssue::new("user.hook_rejected", e.to_string())],
        })?;

        let email = match &request.email {
            Some(raw) => {
                let result = kodex_validate::validate_email(raw, self.email_config.allow_disposable);
                if !result.is_valid() {
                    return Err(CoreError::InvalidEmail(result.issues));
                }
                Some(result.normalized)
            }
            None => None,
        };
        let phone = match &request.phone {
            Some(raw) => {
                let result = kodex_validate::validate_phone(
                    raw,
                    &self.phone_config.default_region,
                    self.phone_config.require_e164,
                );
                if !result.is_valid() {
                    return Err(CoreError::InvalidPhone(result.issues));
                }
                result.e164
            }
            None => None,
        };
        if email.is_none() && phone.is_none() {
            return Err(CoreError::InvalidInput {
                field: "identifier".to_string(),
                errors: vec![FieldIssue::new("user.identifier.missing", "a user needs an email or a phone number")],
            });
        }

        let score = kodex_validate::score_password(&request.password);
        if score.score < self.password_policy.min_score {
            return Err(CoreError::WeakPassword);
        }

        if let Some(email) = &email {
            self.reject_if_taken(&request.realm_id, email, CoreError::EmailAlreadyExists).await?;
        }
        if let Some(phone) = &phone {
            self.reject_if_taken(&request.realm_id, phone, CoreError::PhoneAlreadyExists).await?;
        }

        let password_hash = self
            .hasher
            .hash(&request.password)
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            realm_id: request.realm_id.clone(),
            email,
            phone,
            password_hash,
            is_verified: false,
            status: UserStatus::Pending,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };

        self.users
            .insert(user.clone())
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        if !request.roles.is_empty() {
            self.roles
                .set_roles(&request.realm_id, actor_id, user.id, request.roles.clone())
                .await?;
        }

        self.bus
            .publish(DomainEvent::User {
                header: EventHeader::new(request.realm_id.clone(), Severity::Info),
                kind: UserEventKind::Created,
                actor_id,
                user_id: user.id,
            })
            .ok();

        Ok(user)
    }

    async fn reject_if_taken(&self, realm_id: &str, identifier: &str, err: CoreError) -> CoreResult<()> {
        let existing = self
            .users
            .find_by_identifier(realm_id, identifier)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        if existing.is_some() {
            return Err(err);
        }
        Ok(())
    }

    /// Hard-deletes (removes the row) or soft-deletes (marks it disabled)
    /// depending on `deletion.hard`, then publishes `USER_DELETED`. Storage
    /// collaborators are the ones that cascade the removal to tokens and
    /// reset tokens owned by the row.
    pub async fn delete_user(
        &self,
        actor_id: Option<Uuid>,
        deletion: UserDeletion,
        before_delete: &HookChain<UserDeletion>,
    ) -> CoreResult<()> {
        let deletion = before_delete.run(deletion).await.map_err(|e| CoreError::InvalidInput {
            field: "user".to_string(),
            errors: vec![FieldIssue::new("user.hook_rejected", e.to_string())],
        })?;

        let user = self
            .users
            .find_by_id(deletion.user_id)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?
            .ok_or(CoreError::UserNotFound)?;

        if deletion.hard {
            self.users
                .delete(user.id)
                .await
                .map_err(|e| CoreError::Storage(e.to_string()))?;
        } else {
            let mut user = user;
            user.status = UserStatus::Disabled;
            user.updated_at = Utc::now();
            self.users
                .update(user)
                .await
                .map_err(|e| CoreError::Storage(e.to_string()))?;
        }

        self.bus
            .publish(DomainEvent::User {
                header: EventHeader::new(deletion.realm_id.clone(), Severity::Info),
                kind: UserEventKind::Deleted,
                actor_id,
                user_id: deletion.user_id,
            })
            .ok();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::FailureStrategy;
    use crate::storage::RoleStore;
    use kodex_crypto::PasswordHashParams;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct InMemoryUsers(Mutex<HashMap<Uuid, User>>);

    #[async_trait::async_trait]
    impl UserStore for InMemoryUsers {
        async fn find_by_id(&self, id: Uuid) -> CoreResult<Option<User>> {
            Ok(self.0.lock().await.get(&id).cloned())
        }
        async fn find_by_identifier(&self, _realm_id: &str, identifier: &str) -> CoreResult<Option<User>> {
            Ok(self
                .0
                .lock()
                .await
                .values()
                .find(|u| u.email.as_deref() == Some(identifier) || u.phone.as_deref() == Some(identifier))
                .cloned())
        }
        async fn insert(&self, user: User) -> CoreResult<()> {
            self.0.lock().await.insert(user.id, user);
            Ok(())
        }
        async fn update(&self, user: User) -> CoreResult<()> {
            self.0.lock().await.insert(user.id, user);
            Ok(())
        }
        async fn delete(&self, id: Uuid) -> CoreResult<()> {
            self.0.lock().await.remove(&id);
            Ok(())
        }
        async fn update_last_login(&self, _id: Uuid, _at: chrono::DateTime<Utc>) -> CoreResult<()> {
            Ok(())
        }
    }

    struct StaticRoles;
    #[async_trait::async_trait]
    impl RoleStore for StaticRoles {
        async fn exists(&self, _realm_id: &str, _name: &str) -> CoreResult<bool> {
            Ok(true)
        }
        async fn list_for_user(&self, _user_id: Uuid) -> CoreResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn set_roles(&self, _user_id: Uuid, _roles: Vec<String>) -> CoreResult<()> {
            Ok(())
        }
    }

    fn service(users: Arc<InMemoryUsers>) -> UserLifecycleService {
        let bus = Arc::new(EventBus::new(kodex_audit::SubscriberRegistry::new()));
        let roles = Arc::new(RoleAssignmentService::new(Arc::new(StaticRoles), bus.clone()));
        UserLifecycleService::new(
            users,
            roles,
            PasswordHasherService::new(PasswordHashParams::owasp_min()),
            bus,
            EmailConfig::default(),
            PhoneConfig::default(),
            PasswordPolicyConfig::default(),
        )
    }

    fn no_hooks() -> (HookChain<NewUser>, HookChain<UserDeletion>) {
        (
            HookChain::new(FailureStrategy::FailFast),
            HookChain::new(FailureStrategy::FailFast),
        )
    }

    #[tokio::test]
    async fn create_user_hashes_the_password_and_assigns_roles() {
        let users = Arc::new(InMemoryUsers::default());
        let svc = service(users.clone());
        let (before_create, _) = no_hooks();

        let user = svc
            .create_user(
                None,
                NewUser {
                    realm_id: "acme".to_string(),
                    email: Some("new@example.com".to_string()),
                    phone: None,
                    password: "correct horse battery staple".to_string(),
                    roles: vec!["user".to_string()],
                },
                &before_create,
            )
            .await
            .unwrap();

        assert_eq!(user.email.as_deref(), Some("new@example.com"));
        assert_ne!(user.password_hash, "correct horse battery staple");
        assert!(users.find_by_id(user.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn create_user_rejects_a_malformed_email() {
        let users = Arc::new(InMemoryUsers::default());
        let svc = service(users);
        let (before_create, _) = no_hooks();

        let err = svc
            .create_user(
                None,
                NewUser {
                    realm_id: "acme".to_string(),
                    email: Some("not-an-email".to_string()),
                    phone: None,
                    password: "correct horse battery staple".to_string(),
                    roles: Vec::new(),
                },
                &before_create,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::InvalidEmail(_)));
    }

    #[tokio::test]
    async fn create_user_rejects_a_taken_email() {
        let users = Arc::new(InMemoryUsers::default());
        let svc = service(users.clone());
        let (before_create, _) = no_hooks();

        svc.create_user(
            None,
            NewUser {
                realm_id: "acme".to_string(),
                email: Some("taken@example.com".to_string()),
                phone: None,
                password: "correct horse battery staple".to_string(),
                roles: Vec::new(),
            },
            &before_create,
        )
        .await
        .unwrap();

        let err = svc
            .create_user(
                None,
                NewUser {
                    realm_id: "acme".to_string(),
                    email: Some("taken@example.com".to_string()),
                    phone: None,
                    password: "another strong password 456".to_string(),
                    roles: Vec::new(),
                },
                &before_create,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::EmailAlreadyExists));
    }

    #[tokio::test]
    async fn create_user_requires_at_least_one_identifier() {
        let users = Arc::new(InMemoryUsers::default());
        let svc = service(users);
        let (before_create, _) = no_hooks();

        let err = svc
            .create_user(
                None,
                NewUser {
                    realm_id: "acme".to_string(),
                    email: None,
                    phone: None,
                    password: "correct horse battery staple".to_string(),
                    roles: Vec::new(),
                },
                &before_create,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn delete_user_hard_removes_the_row() {
        let users = Arc::new(InMemoryUsers::default());
        let svc = service(users.clone());
        let (before_create, before_delete) = no_hooks();

        let user = svc
            .create_user(
                None,
                NewUser {
                    realm_id: "acme".to_string(),
                    email: Some("gone@example.com".to_string()),
                    phone: None,
                    password: "correct horse battery staple".to_string(),
                    roles: Vec::new(),
                },
                &before_create,
            )
            .await
            .unwrap();

        svc.delete_user(
            None,
            UserDeletion {
                realm_id: "acme".to_string(),
                user_id: user.id,
                hard: true,
            },
            &before_delete,
        )
        .await
        .unwrap();

        assert!(users.find_by_id(user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_user_soft_disables_instead_of_removing() {
        let users = Arc::new(InMemoryUsers::default());
        let svc = service(users.clone());
        let (before_create, before_delete) = no_hooks();

        let user = svc
            .create_user(
                None,
                NewUser {
                    realm_id: "acme".to_string(),
                    email: Some("disabled@example.com".to_string()),
                    phone: None,
                    password: "correct horse battery staple".to_string(),
                    roles: Vec::new(),
                },
                &before_create,
            )
            .await
            .unwrap();

        svc.delete_user(
            None,
            UserDeletion {
                realm_id: "acme".to_string(),
                user_id: user.id,
                hard: false,
            },
            &before_delete,
        )
        .await
        .unwrap();

        let stored = users.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UserStatus::Disabled);
    }

    #[tokio::test]
    async fn delete_user_rejects_an_unknown_id() {
        let users = Arc::new(InMemoryUsers::default());
        let svc = service(users);
        let (_, before_delete) = no_hooks();

        let err = svc
            .delete_user(
                None,
                UserDeletion {
                    realm_id: "acme".to_string(),
                    user_id: Uuid::new_v4(),
                    hard: true,
                },
                &before_delete,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::UserNotFound));
    }
}
