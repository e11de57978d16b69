//! Storage interfaces the core consumes but never implements. The JDBC/ORM
//! layer is explicitly out of scope; a host supplies implementations
//! backed by whatever database it runs, and the core only relies on the
//! atomicity guarantees called out on each method (conditional updates,
//! single-transaction batches).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreResult;
use crate::model::{
    AccountLockout, CustomAttribute, FailedLoginAttempt, PasswordResetToken, Token, User,
    UserProfile,
};
use crate::update::AttributeOp;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> CoreResult<Option<User>>;
    /// Looks a user up by normalized email or E.164 phone, whichever the
    /// caller already determined `identifier` to be.
    async fn find_by_identifier(&self, realm_id: &str, identifier: &str) -> CoreResult<Option<User>>;
    async fn insert(&self, user: User) -> CoreResult<()>;
    async fn update(&self, user: User) -> CoreResult<()>;
    async fn delete(&self, id: Uuid) -> CoreResult<()>;
    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<()>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn exists(&self, realm_id: &str, name: &str) -> CoreResult<bool>;
    async fn list_for_user(&self, user_id: Uuid) -> CoreResult<Vec<String>>;
    async fn set_roles(&self, user_id: Uuid, roles: Vec<String>) -> CoreResult<()>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find(&self, user_id: Uuid) -> CoreResult<Option<UserProfile>>;
    async fn upsert(&self, profile: UserProfile) -> CoreResult<()>;
}

#[async_trait]
pub trait AttributeStore: Send + Sync {
    async fn list(&self, user_id: Uuid) -> CoreResult<HashMap<String, serde_json::Value>>;
    /// Applies an ordered sequence of attribute operations as a single
    /// transaction. A `ReplaceAll` anywhere in `ops` supersedes every
    /// other operation in the same call.
    async fn apply(&self, user_id: Uuid, ops: Vec<AttributeOp>) -> CoreResult<Vec<CustomAttribute>>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: Token) -> CoreResult<()>;
    async fn find_by_hash(&self, token_hash: &str) -> CoreResult<Option<Token>>;
    async fn find_by_parent(&self, parent_token_id: Uuid) -> CoreResult<Option<Token>>;
    /// Conditional update: `SET firstUsedAt = now WHERE id = ? AND
    /// firstUsedAt IS NULL`. Returns whether this call was the one that
    /// flipped it (i.e. the row was previously unused).
    async fn mark_first_used(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<bool>;
    /// Records that `id` was presented again (grace-window retry, or an
    /// access-only refresh under the fixed-rotation policy).
    async fn touch_last_used(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<()>;
    async fn revoke(&self, id: Uuid) -> CoreResult<()>;
    async fn revoke_all_for_user(&self, user_id: Uuid) -> CoreResult<u64>;
    async fn revoke_family(&self, token_family: Uuid) -> CoreResult<u64>;
}

#[async_trait]
pub trait PasswordResetStore: Send + Sync {
    async fn insert(&self, token: PasswordResetToken) -> CoreResult<()>;
    async fn find_by_hash(&self, token_hash: &str) -> CoreResult<Option<PasswordResetToken>>;
    /// Conditional update: `SET usedAt = now WHERE tokenHash = ? AND usedAt
    /// IS NULL`. Returns whether exactly one row was updated.
    async fn consume(&self, token_hash: &str, now: DateTime<Utc>) -> CoreResult<bool>;
    async fn revoke_all_for_user(&self, user_id: Uuid) -> CoreResult<u64>;
}

#[async_trait]
pub trait LockoutStore: Send + Sync {
    async fn record_failed_attempt(&self, attempt: FailedLoginAttempt) -> CoreResult<()>;
    async fn count_recent_attempts(&self, identifier: &str, since: DateTime<Utc>) -> CoreResult<u64>;
    async fn upsert_lockout(&self, lockout: AccountLockout) -> CoreResult<()>;
    async fn find_lockout(&self, identifier: &str) -> CoreResult<Option<AccountLockout>>;
    async fn clear_lockout(&self, identifier: &str) -> CoreResult<()>;
    async fn clear_failed_attempts(&self, identifier: &str) -> CoreResult<()>;
}

/// Backs the two-phase rate-limit reservation in the password-reset
/// pipeline. A single sliding-window counter keyed by an arbitrary string
/// (per-user, per-identifier, or per-ip, as the caller decides).
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically tests whether incrementing the window's counter would
    /// exceed `max_count`; if not, increments it and returns `true`.
    async fn reserve(
        &self,
        key: &str,
        window: chrono::Duration,
        max_count: u32,
        now: DateTime<Utc>,
    ) -> CoreResult<bool>;
    /// Makes a prior reservation permanent. A no-op for stores that only
    /// track the count, present for stores that track pending vs.
    /// committed entries separately.
    async fn commit(&self, key: &str) -> CoreResult<()>;
    /// Releases a reservation that will not be used (dispatch failed, or a
    /// sibling limiter rejected the request).
    async fn rollback(&self, key: &str, now: DateTime<Utc>) -> CoreResult<()>;
    /// Returns the timestamp of the most recently *committed* reservation
    /// for `key`, used to enforce a cooldown period independent of the
    /// sliding window count.
    async fn last_committed_at(&self, key: &str) -> CoreResult<Option<DateTime<Utc>>>;
}
