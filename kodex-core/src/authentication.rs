//! Password-based login and password change. Orchestrates the
//! lockout gate, the hook chain, credential verification, and token
//! issuance into the single flow a host actually calls from its login
//! endpoint.

use std::sync::Arc;

use chrono::Utc;
use kodex_audit::{DomainEvent, EventBus, EventHeader, Severity};
use kodex_crypto::PasswordHasherService;
use uuid::Uuid;

use crate::config::PasswordPolicyConfig;
use crate::error::{CoreError, CoreResult};
use crate::hooks::HookChain;
use crate::lockout::LockoutService;
use crate::metrics::KodexMetrics;
use crate::model::User;
use crate::storage::UserStore;
use crate::token::{TokenManager, TokenPair};

/// Passed through the `beforeLogin` hook chain. A hook may normalize
/// `identifier` (trim, lowercase, map a username alias to an email) before
/// the lookup happens.
#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub realm_id: String,
    pub identifier: String,
}

/// Passed through `afterLoginFailure`. Carries the reason for logging
/// purposes only — hooks never see a reason more specific than what a
/// server-side log would already show.
#[derive(Debug, Clone)]
pub struct LoginFailureContext {
    pub realm_id: String,
    pub identifier: String,
    pub reason: String,
}

/// Passed through `afterAuthentication` on a successful login.
#[derive(Debug, Clone)]
pub struct AuthenticatedContext {
    pub user: User,
}

/// Only two outward shapes: credentials were good and the account is
/// usable, or they weren't. Never a third, more specific, wire-visible
/// value — see [`CoreError::InvalidCredentials`].
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub user: User,
    pub tokens: TokenPair,
}

/// Hashing a fixed plaintext once at construction time and reusing the
/// digest for every "user does not exist" branch. Constant relative to
/// the process, never persisted, never logged.
const DUMMY_PASSWORD: &str = "kodex-dummy-credential-for-constant-time-comparison";

pub struct AuthenticationService {
    users: Arc<dyn UserStore>,
    hasher: PasswordHasherService,
    lockout: Arc<LockoutService>,
    tokens: Arc<TokenManager>,
    bus: Arc<EventBus>,
    metrics: Option<Arc<KodexMetrics>>,
    password_policy: PasswordPolicyConfig,
    dummy_hash: String,
}

impl AuthenticationService {
    pub fn new(
        users: Arc<dyn UserStore>,
        hasher: PasswordHasherService,
        lockout: Arc<LockoutService>,
        tokens: Arc<TokenManager>,
        bus: Arc<EventBus>,
        metrics: Option<Arc<KodexMetrics>>,
        password_policy: PasswordPolicyConfig,
    ) -> Self {
        let dummy_hash = hasher.hash(DUMMY_PASSWORD).expect("dummy credential hashes under any valid preset");
        Self {
            users,
            hasher,
            lockout,
            tokens,
            bus,
            metrics,
            password_policy,
            dummy_hash,
        }
    }

    /// Runs the full login flow: lockout gate, `beforeLogin` hooks,
    /// constant-time credential check, failure bookkeeping or success
    /// bookkeeping plus token issuance.
    pub async fn login(
        &self,
        realm_id: &str,
        identifier: &str,
        password: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
        before_login: &HookChain<LoginAttempt>,
        after_login_failure: &HookChain<LoginFailureContext>,
        after_authentication: &HookChain<AuthenticatedContext>,
    ) -> CoreResult<LoginSuccess> {
        let now = Utc::now();

        if let crate::lockout::LockoutStatus::Locked { unlock_at } =
            self.lockout.check_lockout(realm_id, identifier, now).await?
        {
            self.publish_login_failed(realm_id, identifier, None, "account_locked");
            return Err(CoreError::AccountLocked { unlock_at });
        }

        let attempt = before_login
            .run(LoginAttempt {
                realm_id: realm_id.to_string(),
                identifier: identifier.to_string(),
            })
            .await
            .map_err(|e| CoreError::InvalidInput {
                field: "identifier".to_string(),
                errors: vec![kodex_validate::FieldIssue::new("login.hook_rejected", e.to_string())],
            })?;
        let identifier = attempt.identifier;

        let user = self
            .users
            .find_by_identifier(realm_id, &identifier)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        // Constant-time with respect to whether `user` resolved: a missing
        // user still pays for one Argon2 verify, against a fixed dummy
        // digest, so the total latency of this branch does not depend on
        // account existence.
        let credential_ok = match &user {
            Some(user) => self.hasher.verify(password, &user.password_hash),
            None => {
                self.hasher.verify(password, &self.dummy_hash);
                false
            }
        };
        let user_id_hint = user.as_ref().map(|u| u.id);

        let Some(user) = user.filter(|_| credential_ok) else {
            self.record_login_failure(realm_id, &identifier, ip, user_agent, user_id_hint, "invalid_credentials", after_login_failure)
                .await;
            return Err(CoreError::InvalidCredentials);
        };

        if !user.is_verified {
            return Err(CoreError::UnverifiedAccount);
        }

        self.lockout.clear_failed_attempts(&identifier).await?;
        self.users
            .update_last_login(user.id, now)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        let user = after_authentication
            .run(AuthenticatedContext { user })
            .await
            .map_err(|e| CoreError::InvalidInput {
                field: "user".to_string(),
                errors: vec![kodex_validate::FieldIssue::new("login.hook_rejected", e.to_string())],
            })?
            .user;

        self.bus
            .publish(DomainEvent::LoginSuccess {
                header: EventHeader::new(realm_id.to_string(), Severity::Info),
                user_id: user.id,
                metadata: serde_json::json!({ "identifier": identifier, "method": "password" }),
            })
            .ok();
        if let Some(metrics) = &self.metrics {
            metrics.login_attempts_total.with_label_values(&[realm_id]).inc();
        }

        let tokens = self.tokens.issue_for_login(&user).await?;
        Ok(LoginSuccess { user, tokens })
    }

    async fn record_login_failure(
        &self,
        realm_id: &str,
        identifier: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
        user_id: Option<Uuid>,
        reason: &str,
        after_login_failure: &HookChain<LoginFailureContext>,
    ) {
        after_login_failure
            .run(LoginFailureContext {
                realm_id: realm_id.to_string(),
                identifier: identifier.to_string(),
                reason: reason.to_string(),
            })
            .await
            .ok();

        if let Err(err) = self
            .lockout
            .record_failed_attempt(realm_id, identifier, ip, user_agent, user_id, reason)
            .await
        {
            tracing::warn!(error = %err, "failed to record failed login attempt");
        }

        self.publish_login_failed(realm_id, identifier, user_id, reason);
        if let Some(metrics) = &self.metrics {
            metrics.login_attempts_total.with_label_values(&[realm_id]).inc();
            metrics.login_failures_total.with_label_values(&[realm_id, reason]).inc();
        }
    }

    fn publish_login_failed(&self, realm_id: &str, identifier: &str, user_id: Option<Uuid>, reason: &str) {
        self.bus
            .publish(DomainEvent::LoginFailed {
                header: EventHeader::new(realm_id.to_string(), Severity::Warning),
                user_id,
                identifier: identifier.to_string(),
                reason: reason.to_string(),
                metadata: serde_json::Value::Null,
            })
            .ok();
    }

    /// Verifies `old_password` against the stored hash, hashes and stores
    /// `new_password`, and publishes the outcome. Neither hash ever reaches
    /// an event payload.
    pub async fn change_password(
        &self,
        realm_id: &str,
        actor_id: Uuid,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> CoreResult<()> {
        let mut user = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?
            .ok_or(CoreError::UserNotFound)?;

        if !self.hasher.verify(old_password, &user.password_hash) {
            self.publish_password_change_failed(realm_id, actor_id, user_id, "invalid_credentials");
            return Err(CoreError::InvalidCredentials);
        }

        let score = kodex_validate::score_password(new_password);
        if score.score < self.password_policy.min_score {
            self.publish_password_change_failed(realm_id, actor_id, user_id, "weak_password");
            return Err(CoreError::WeakPassword);
        }

        user.password_hash = self.hasher.hash(new_password).map_err(|e| CoreError::Storage(e.to_string()))?;
        user.updated_at = Utc::now();
        self.users
            .update(user)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        self.bus
            .publish(DomainEvent::PasswordChanged {
                header: EventHeader::new(realm_id.to_string(), Severity::Info),
                actor_id,
                user_id,
                metadata: serde_json::Value::Null,
            })
            .ok();
        self.tokens.revoke_all_for_user(user_id).await?;
        Ok(())
    }

    fn publish_password_change_failed(&self, realm_id: &str, actor_id: Uuid, user_id: Uuid, reason: &str) {
        self.bus
            .publish(DomainEvent::PasswordChangeFailed {
                header: EventHeader::new(realm_id.to_string(), Severity::Warning),
                actor_id,
                user_id,
                reason: reason.to_string(),
            })
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockoutPolicy;
    use crate::hooks::FailureStrategy;
    use crate::model::{AccountLockout, FailedLoginAttempt, UserStatus};
    use crate::storage::{LockoutStore, RoleStore, TokenStore};
    use chrono::DateTime;
    use kodex_auth::{JwtConfig, RsaJwtSigner, TokenSigner};
    use kodex_crypto::PasswordHashParams;
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use rsa::RsaPrivateKey;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::Mutex;

    struct InMemoryUsers(Mutex<StdHashMap<Uuid, User>>);

    #[async_trait::async_trait]
    impl UserStore for InMemoryUsers {
        async fn find_by_id(&self, id: Uuid) -> CoreResult<Option<User>> {
            Ok(self.0.lock().await.get(&id).cloned())
        }
        async fn find_by_identifier(&self, _realm_id: &str, identifier: &str) -> CoreResult<Option<User>> {
            Ok(self.0.lock().await.values().find(|u| u.email.as_deref() == Some(identifier)).cloned())
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
        async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<()> {
            if let Some(user) = self.0.lock().await.get_mut(&id) {
                user.last_login_at = Some(at);
            }
            Ok(())
        }
    }

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
            Ok(self.attempts.lock().await.iter().filter(|a| a.identifier == identifier && a.timestamp > since).count() as u64)
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

    struct InMemoryTokens(Mutex<StdHashMap<Uuid, crate::model::Token>>);

    #[async_trait::async_trait]
    impl TokenStore for InMemoryTokens {
        async fn insert(&self, token: crate::model::Token) -> CoreResult<()> {
            self.0.lock().await.insert(token.id, token);
            Ok(())
        }
        async fn find_by_hash(&self, token_hash: &str) -> CoreResult<Option<crate::model::Token>> {
            Ok(self.0.lock().await.values().find(|t| t.token_hash == token_hash).cloned())
        }
        async fn find_by_parent(&self, parent_token_id: Uuid) -> CoreResult<Option<crate::model::Token>> {
            Ok(self.0.lock().await.values().find(|t| t.parent_token_id == Some(parent_token_id)).cloned())
        }
        async fn mark_first_used(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<bool> {
            let mut rows = self.0.lock().await;
            let Some(row) = rows.get_mut(&id) else { return Ok(false) };
            if row.first_used_at.is_none() {
                row.first_used_at = Some(now);
                Ok(true)
            } else {
                Ok(false)
            }
        }
        async fn touch_last_used(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<()> {
            if let Some(row) = self.0.lock().await.get_mut(&id) {
                row.last_used_at = Some(now);
            }
            Ok(())
        }
        async fn revoke(&self, id: Uuid) -> CoreResult<()> {
            if let Some(row) = self.0.lock().await.get_mut(&id) {
                row.revoked = true;
            }
            Ok(())
        }
        async fn revoke_all_for_user(&self, user_id: Uuid) -> CoreResult<u64> {
            let mut rows = self.0.lock().await;
            let mut count = 0;
            for row in rows.values_mut() {
                if row.user_id == user_id && !row.revoked {
                    row.revoked = true;
                    count += 1;
                }
            }
            Ok(count)
        }
        async fn revoke_family(&self, token_family: Uuid) -> CoreResult<u64> {
            let mut rows = self.0.lock().await;
            let mut count = 0;
            for row in rows.values_mut() {
                if row.token_family == token_family && !row.revoked {
                    row.revoked = true;
                    count += 1;
                }
            }
            Ok(count)
        }
    }

    struct StaticRoles;
    #[async_trait::async_trait]
    impl RoleStore for StaticRoles {
        async fn exists(&self, _realm_id: &str, _name: &str) -> CoreResult<bool> {
            Ok(true)
        }
        async fn list_for_user(&self, _user_id: Uuid) -> CoreResult<Vec<String>> {
            Ok(vec!["user".to_string()])
        }
        async fn set_roles(&self, _user_id: Uuid, _roles: Vec<String>) -> CoreResult<()> {
            Ok(())
        }
    }

    fn test_signer() -> Arc<dyn TokenSigner> {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 2048).expect("key");
        let pem = private.to_pkcs8_pem(LineEnding::LF).expect("pem").to_string();
        Arc::new(RsaJwtSigner::new(JwtConfig::new("kodex", "kodex-clients"), "kid", &pem).expect("signer"))
    }

    fn test_user(email: &str, password_hash: String) -> User {
        User {
            id: Uuid::new_v4(),
            realm_id: "acme".to_string(),
            email: Some(email.to_string()),
            phone: None,
            password_hash,
            is_verified: true,
            status: UserStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_login_at: None,
        }
    }

    fn service(users: Arc<InMemoryUsers>, lockout_policy: LockoutPolicy) -> AuthenticationService {
        let bus = Arc::new(EventBus::new(kodex_audit::SubscriberRegistry::new()));
        let hasher = PasswordHasherService::new(PasswordHashParams::owasp_min());
        let lockout = Arc::new(LockoutService::new(
            Arc::new(InMemoryLockouts::default()),
            bus.clone(),
            None,
            lockout_policy,
        ));
        let tokens = Arc::new(TokenManager::new(
            test_signer(),
            Arc::new(InMemoryTokens(Mutex::new(StdHashMap::new()))),
            Arc::new(StaticRoles),
            bus.clone(),
            None,
            crate::config::TokenConfig::default(),
        ));
        AuthenticationService::new(users, hasher, lockout, tokens, bus, None, PasswordPolicyConfig::default())
    }

    fn empty_chains() -> (
        HookChain<LoginAttempt>,
        HookChain<LoginFailureContext>,
        HookChain<AuthenticatedContext>,
    ) {
        (
            HookChain::new(FailureStrategy::FailFast),
            HookChain::new(FailureStrategy::FailFast),
            HookChain::new(FailureStrategy::FailFast),
        )
    }

    #[tokio::test]
    async fn correct_password_issues_tokens() {
        let hasher = PasswordHasherService::new(PasswordHashParams::owasp_min());
        let hash = hasher.hash("correct horse battery staple").unwrap();
        let user = test_user("jane@example.com", hash);
        let user_id = user.id;
        let mut map = StdHashMap::new();
        map.insert(user.id, user);
        let users = Arc::new(InMemoryUsers(Mutex::new(map)));
        let svc = service(users, LockoutPolicy::strict());
        let (before, after_fail, after_auth) = empty_chains();

        let outcome = svc
            .login(
                "acme",
                "jane@example.com",
                "correct horse battery staple",
                Some("203.0.113.1"),
                None,
                &before,
                &after_fail,
                &after_auth,
            )
            .await
            .expect("login succeeds");
        assert_eq!(outcome.user.id, user_id);
        assert!(!outcome.tokens.access_token.is_empty());
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_with_an_opaque_error() {
        let hasher = PasswordHasherService::new(PasswordHashParams::owasp_min());
        let hash = hasher.hash("correct horse battery staple").unwrap();
        let user = test_user("jane@example.com", hash);
        let mut map = StdHashMap::new();
        map.insert(user.id, user);
        let users = Arc::new(InMemoryUsers(Mutex::new(map)));
        let svc = service(users, LockoutPolicy::strict());
        let (before, after_fail, after_auth) = empty_chains();

        let outcome = svc
            .login("acme", "jane@example.com", "wrong-password", None, None, &before, &after_fail, &after_auth)
            .await;
        assert!(matches!(outcome, Err(CoreError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn nonexistent_user_gets_the_same_error_as_a_wrong_password() {
        let users = Arc::new(InMemoryUsers(Mutex::new(StdHashMap::new())));
        let svc = service(users, LockoutPolicy::strict());
        let (before, after_fail, after_auth) = empty_chains();

        let outcome = svc
            .login("acme", "ghost@example.com", "anything", None, None, &before, &after_fail, &after_auth)
            .await;
        assert!(matches!(outcome, Err(CoreError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn repeated_failures_eventually_lock_the_account() {
        let hasher = PasswordHasherService::new(PasswordHashParams::owasp_min());
        let hash = hasher.hash("correct horse battery staple").unwrap();
        let user = test_user("jane@example.com", hash);
        let mut map = StdHashMap::new();
        map.insert(user.id, user);
        let users = Arc::new(InMemoryUsers(Mutex::new(map)));
        let svc = service(users, LockoutPolicy::strict());
        let (before, after_fail, after_auth) = empty_chains();

        for _ in 0..3 {
            let _ = svc
                .login("acme", "jane@example.com", "wrong-password", None, None, &before, &after_fail, &after_auth)
                .await;
        }

        let outcome = svc
            .login("acme", "jane@example.com", "correct horse battery staple", None, None, &before, &after_fail, &after_auth)
            .await;
        assert!(matches!(outcome, Err(CoreError::AccountLocked { .. })));
    }

    #[tokio::test]
    async fn unverified_account_fails_even_with_the_right_password() {
        let hasher = PasswordHasherService::new(PasswordHashParams::owasp_min());
        let hash = hasher.hash("correct horse battery staple").unwrap();
        let mut user = test_user("jane@example.com", hash);
        user.is_verified = false;
        let mut map = StdHashMap::new();
        map.insert(user.id, user);
        let users = Arc::new(InMemoryUsers(Mutex::new(map)));
        let svc = service(users, LockoutPolicy::strict());
        let (before, after_fail, after_auth) = empty_chains();

        let outcome = svc
            .login("acme", "jane@example.com", "correct horse battery staple", None, None, &before, &after_fail, &after_auth)
            .await;
        assert!(matches!(outcome, Err(CoreError::UnverifiedAccount)));
    }

    #[tokio::test]
    async fn change_password_requires_the_old_one_and_revokes_existing_sessions() {
        let hasher = PasswordHasherService::new(PasswordHashParams::owasp_min());
        let hash = hasher.hash("old-password-123").unwrap();
        let user = test_user("jane@example.com", hash);
        let user_id = user.id;
        let mut map = StdHashMap::new();
        map.insert(user.id, user);
        let users = Arc::new(InMemoryUsers(Mutex::new(map)));
        let svc = service(users.clone(), LockoutPolicy::strict());

        let wrong_old = svc
            .change_password("acme", user_id, user_id, "not-the-old-password", "brand-new-password-456")
            .await;
        assert!(matches!(wrong_old, Err(CoreError::InvalidCredentials)));

        svc.change_password("acme", user_id, user_id, "old-password-123", "brand-new-password-456")
            .await
            .expect("change succeeds");

        let updated = users.find_by_id(user_id).await.unwrap().unwrap();
        assert!(hasher.verify("brand-new-password-456", &updated.password_hash));
        assert_ne!(updated.password_hash, "old-password-123");
    }
}
