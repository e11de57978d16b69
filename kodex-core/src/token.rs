//! Access/refresh issuance, rotation, and replay detection. Both token
//! kinds are signed JWTs through the same
//! [`TokenSigner`]; the refresh token's compact string is additionally
//! digested and persisted so a one-time-use check survives the fact that
//! JWTs are otherwise stateless.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use kodex_audit::{DomainEvent, EventBus, EventHeader, Severity};
use kodex_auth::{Claims, SigningClaims, TokenSigner, TokenType as SignerTokenType};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::config::{RotationPolicy, TokenConfig};
use crate::error::{CoreError, CoreResult};
use crate::metrics::KodexMetrics;
use crate::model::{Token, TokenType, User};
use crate::storage::{RoleStore, TokenStore};

/// An issued or re-issued access/refresh pair, handed back to whatever
/// called into login or refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub token_family: Uuid,
}

struct CachedReuse {
    pair: TokenPair,
    issued_at: DateTime<Utc>,
}

/// Owns token issuance, verification, rotation, and revocation. Holds no
/// user data of its own beyond what it needs to sign and persist tokens;
/// everything else is read back out of the claims it verifies.
pub struct TokenManager {
    signer: Arc<dyn TokenSigner>,
    tokens: Arc<dyn TokenStore>,
    roles: Arc<dyn RoleStore>,
    bus: Arc<EventBus>,
    metrics: Option<Arc<KodexMetrics>>,
    config: TokenConfig,
    /// Serves the grace-window "return the same child pair" contract
    /// without ever persisting a refresh secret in plaintext: the pair
    /// issued on first use is cached in memory, keyed by the *parent*
    /// token's id, and evicted once it falls outside the grace window.
    /// This is a process-local convenience, consistent with the core's
    /// non-goal of distributed coordination beyond what the database
    /// provides — a retry that lands on a different process during the
    /// grace window fails closed rather than risk a spurious replay.
    reuse_cache: RwLock<HashMap<Uuid, CachedReuse>>,
}

impl TokenManager {
    pub fn new(
        signer: Arc<dyn TokenSigner>,
        tokens: Arc<dyn TokenStore>,
        roles: Arc<dyn RoleStore>,
        bus: Arc<EventBus>,
        metrics: Option<Arc<KodexMetrics>>,
        config: TokenConfig,
    ) -> Self {
        Self {
            signer,
            tokens,
            roles,
            bus,
            metrics,
            config,
            reuse_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Issues a fresh token pair at login, rooted in a brand-new token
    /// family with no parent.
    pub async fn issue_for_login(&self, user: &User) -> CoreResult<TokenPair> {
        let roles = self
            .roles
            .list_for_user(user.id)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        let family = Uuid::new_v4();
        let pair = self
            .issue_pair(user.id, &user.realm_id, &roles, family, None)
            .await?;

        self.bus
            .publish(DomainEvent::TokenIssued {
                header: EventHeader::new(user.realm_id.clone(), Severity::Info),
                user_id: user.id,
                token_id: self.jti_of(&pair.refresh_token)?,
                metadata: serde_json::json!({ "method": "password" }),
            })
            .ok();
        if let Some(metrics) = &self.metrics {
            metrics.tokens_issued_total.inc();
        }
        Ok(pair)
    }

    /// Decodes and validates a bearer access token against `realm_id`.
    /// Does not consult storage unless access tokens are configured to be
    /// persisted, in which case a revoked record also fails verification.
    pub async fn verify_access(&self, token: &str, realm_id: &str) -> CoreResult<Claims> {
        let claims = self.verify_claims(token, SignerTokenType::Access, realm_id)?;

        if self.config.persist_access {
            let digest = kodex_crypto::digest_hex(token);
            match self.tokens.find_by_hash(&digest).await {
                Ok(Some(record)) if record.revoked => return Err(CoreError::TokenRevoked),
                Ok(_) => {}
                Err(e) => return Err(CoreError::Storage(e.to_string())),
            }
        }

        Ok(claims)
    }

    /// Runs the refresh state machine: first use rotates
    /// (or, under the fixed policy, just mints a new access token); a
    /// repeat use inside the grace period replays the cached pair; a
    /// repeat use outside it revokes the whole family as a replay.
    pub async fn refresh(&self, presented_refresh_token: &str, realm_id: &str) -> CoreResult<TokenPair> {
        let now = Utc::now();
        let claims = self.verify_claims(presented_refresh_token, SignerTokenType::Refresh, realm_id)?;

        let digest = kodex_crypto::digest_hex(presented_refresh_token);
        let record = self
            .tokens
            .find_by_hash(&digest)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?
            .ok_or(CoreError::TokenNotFound)?;

        if record.revoked {
            return Err(CoreError::TokenRevoked);
        }
        if record.is_expired(now) {
            return Err(CoreError::TokenExpired);
        }

        match self.config.rotation_policy {
            RotationPolicy::Fixed => {
                self.refresh_fixed(&record, &claims, presented_refresh_token, now).await
            }
            RotationPolicy::Rotate => self.refresh_rotate(&record, &claims, realm_id, now).await,
        }
    }

    async fn refresh_fixed(
        &self,
        record: &Token,
        claims: &Claims,
        presented_refresh_token: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<TokenPair> {
        self.tokens
            .touch_last_used(record.id, now)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        let roles = self
            .roles
            .list_for_user(record.user_id)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        let jti = Uuid::new_v4();
        let access_expires_at = now + self.config.access_validity;
        let access_token = self
            .signer
            .sign(&SigningClaims {
                subject: record.user_id,
                realm: claims.realm.clone(),
                token_family: record.token_family,
                roles,
                jti,
                token_type: SignerTokenType::Access,
                issued_at: now,
                expires_at: access_expires_at,
            })
            .map_err(CoreError::Signing)?;

        Ok(TokenPair {
            access_token,
            refresh_token: presented_refresh_token.to_string(),
            access_expires_at,
            refresh_expires_at: record.expires_at,
            token_family: record.token_family,
        })
    }

    async fn refresh_rotate(
        &self,
        record: &Token,
        claims: &Claims,
        realm_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<TokenPair> {
        let was_first_use = self
            .tokens
            .mark_first_used(record.id, now)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        if was_first_use {
            self.tokens
                .touch_last_used(record.id, now)
                .await
                .map_err(|e| CoreError::Storage(e.to_string()))?;

            let roles = self
                .roles
                .list_for_user(record.user_id)
                .await
                .map_err(|e| CoreError::Storage(e.to_string()))?;
            let pair = self
                .issue_pair(record.user_id, &claims.realm, &roles, record.token_family, Some(record.id))
                .await?;

            self.reuse_cache.write().await.insert(
                record.id,
                CachedReuse {
                    pair: pair.clone(),
                    issued_at: now,
                },
            );

            self.bus
                .publish(DomainEvent::TokenRefreshed {
                    header: EventHeader::new(realm_id.to_string(), Severity::Info),
                    user_id: record.user_id,
                    old_token_id: record.id,
                    new_token_id: self.jti_of(&pair.refresh_token)?,
                })
                .ok();
            if let Some(metrics) = &self.metrics {
                metrics.tokens_issued_total.inc();
            }
            return Ok(pair);
        }

        let first_used_at = record.first_used_at.unwrap_or(now);
        let delta = now - first_used_at;

        if delta <= self.config.replay_grace_period {
            if let Some(cached) = self.reuse_cache.read().await.get(&record.id) {
                return Ok(cached.pair.clone());
            }
            warn!(
                token_id = %record.id,
                "grace-window refresh retry missed the local reuse cache; failing closed"
            );
            return Err(CoreError::TokenNotFound);
        }

        self.tokens
            .revoke_family(record.token_family)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        self.bus
            .publish(DomainEvent::TokenReplayDetected {
                header: EventHeader::new(realm_id.to_string(), Severity::Critical),
                user_id: record.user_id,
                token_id: record.id,
            })
            .ok();
        if let Some(metrics) = &self.metrics {
            metrics.token_replays_detected_total.inc();
        }
        Err(CoreError::TokenReplayDetected)
    }

    pub async fn revoke(&self, token_id: Uuid) -> CoreResult<()> {
        self.tokens
            .revoke(token_id)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))
    }

    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> CoreResult<u64> {
        self.tokens
            .revoke_all_for_user(user_id)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))
    }

    pub async fn revoke_family(&self, family: Uuid) -> CoreResult<u64> {
        self.tokens
            .revoke_family(family)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))
    }

    async fn issue_pair(
        &self,
        user_id: Uuid,
        realm: &str,
        roles: &[String],
        family: Uuid,
        parent_token_id: Option<Uuid>,
    ) -> CoreResult<TokenPair> {
        let now = Utc::now();
        let access_jti = Uuid::new_v4();
        let refresh_jti = Uuid::new_v4();
        let access_expires_at = now + self.config.access_validity;
        let refresh_expires_at = now + self.config.refresh_validity;

        let refresh_token = self
            .signer
            .sign(&SigningClaims {
                subject: user_id,
                realm: realm.to_string(),
                token_family: family,
                roles: roles.to_vec(),
                jti: refresh_jti,
                token_type: SignerTokenType::Refresh,
                issued_at: now,
                expires_at: refresh_expires_at,
            })
            .map_err(CoreError::Signing)?;

        let access_token = self
            .signer
            .sign(&SigningClaims {
                subject: user_id,
                realm: realm.to_string(),
                token_family: family,
                roles: roles.to_vec(),
                jti: access_jti,
                token_type: SignerTokenType::Access,
                issued_at: now,
                expires_at: access_expires_at,
            })
            .map_err(CoreError::Signing)?;

        self.tokens
            .insert(Token {
                id: refresh_jti,
                user_id,
                token_hash: kodex_crypto::digest_hex(&refresh_token),
                token_type: TokenType::Refresh,
                revoked: false,
                created_at: now,
                expires_at: refresh_expires_at,
                token_family: family,
                parent_token_id,
                first_used_at: None,
                last_used_at: None,
            })
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        if self.config.persist_access {
            self.tokens
                .insert(Token {
                    id: access_jti,
                    user_id,
                    token_hash: kodex_crypto::digest_hex(&access_token),
                    token_type: TokenType::Access,
                    revoked: false,
                    created_at: now,
                    expires_at: access_expires_at,
                    token_family: family,
                    parent_token_id: None,
                    first_used_at: None,
                    last_used_at: None,
                })
                .await
                .map_err(|e| CoreError::Storage(e.to_string()))?;
        }

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
            token_family: family,
        })
    }

    fn verify_claims(&self, token: &str, expected: SignerTokenType, realm_id: &str) -> CoreResult<Claims> {
        let claims = self.signer.verify(token, expected).map_err(CoreError::Signing)?;
        if claims.realm != realm_id {
            return Err(CoreError::Signing(kodex_auth::AuthError::RealmMismatch {
                expected: realm_id.to_string(),
                found: claims.realm.clone(),
            }));
        }
        Ok(claims)
    }

    fn jti_of(&self, token: &str) -> CoreResult<Uuid> {
        // The refresh token was just signed by this process; its claims
        // always parse. Any failure here is an implementation bug, not an
        // externally triggerable error.
        let claims = self
            .signer
            .verify(token, SignerTokenType::Refresh)
            .map_err(CoreError::Signing)?;
        Ok(claims.jti)
    }
}

/// Prunes reuse-cache entries once they are certainly outside any
/// reasonable grace period, so a long-lived process does not grow this
/// map unboundedly. Intended to run from a periodic background task the
/// host schedules alongside the audit retention sweep.
impl TokenManager {
    pub async fn prune_reuse_cache(&self, max_age: Duration) {
        let cutoff = Utc::now() - max_age;
        self.reuse_cache.write().await.retain(|_, cached| cached.issued_at > cutoff);
    }
}
