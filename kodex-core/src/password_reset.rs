//! Reservation-based rate-limited password reset. The enumeration
//! guarantee is structural: every outward branch of [`PasswordResetService::request`]
//! returns the same `Success`, whether or not the identifier resolved to a
//! real user.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kodex_audit::{DomainEvent, EventBus, EventHeader, Severity};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::warn;
use uuid::Uuid;

use crate::config::PasswordResetConfig;
use crate::error::{CoreError, CoreResult};
use crate::metrics::KodexMetrics;
use crate::model::PasswordResetToken;
use crate::storage::{PasswordResetStore, RateLimitStore, UserStore};

/// Something the host wires up to actually deliver the reset token (email,
/// SMS). The core only needs to know whether the attempt succeeded.
#[async_trait::async_trait]
pub trait ResetSender: Send + Sync {
    async fn send(&self, contact_value: &str, token: &str) -> Result<(), String>;
}

/// Always `Success`: the enumeration-safe contract means a caller
/// can never distinguish "no such user" from "reset dispatched" from this
/// return value alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Success;

pub struct PasswordResetService {
    users: Arc<dyn UserStore>,
    tokens: Arc<dyn PasswordResetStore>,
    rate_limits: Arc<dyn RateLimitStore>,
    sender: Arc<dyn ResetSender>,
    bus: Arc<EventBus>,
    metrics: Option<Arc<KodexMetrics>>,
    config: PasswordResetConfig,
}

const RESET_TOKEN_BYTES: usize = 32;

impl PasswordResetService {
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: Arc<dyn PasswordResetStore>,
        rate_limits: Arc<dyn RateLimitStore>,
        sender: Arc<dyn ResetSender>,
        bus: Arc<EventBus>,
        metrics: Option<Arc<KodexMetrics>>,
        config: PasswordResetConfig,
    ) -> Self {
        Self {
            users,
            tokens,
            rate_limits,
            sender,
            bus,
            metrics,
            config,
        }
    }

    /// Runs the full reservation → lookup → issue → dispatch pipeline.
    /// Always resolves to [`Success`]; rate-limit and cooldown rejections
    /// are reported via the `RateLimitExceeded` error instead, since those
    /// are legitimate signals the caller (not an attacker probing for
    /// valid accounts) needs to see and back off on.
    pub async fn request(
        &self,
        realm_id: &str,
        identifier: &str,
        ip: Option<&str>,
        user_id_hint: Option<Uuid>,
    ) -> CoreResult<Success> {
        let now = Utc::now();

        if let Some(cooldown) = self.config.cooldown_period {
            let last = self
                .rate_limits
                .last_committed_at(&Self::user_key(identifier))
                .await
                .map_err(|e| CoreError::Storage(e.to_string()))?;
            if let Some(last) = last {
                if now - last < cooldown {
                    return Err(CoreError::RateLimitExceeded {
                        reason: "cooldown: too soon since last reset request".to_string(),
                    });
                }
            }
        }

        let keys = [
            Self::user_key(identifier),
            Self::identifier_key(identifier),
            ip.map(Self::ip_key),
        ];

        let mut reserved = Vec::new();
        let limits = [
            (&keys[0], self.config.max_attempts_per_user),
            (&keys[1], self.config.max_attempts_per_identifier),
        ];

        for (key, max_count) in limits {
            let ok = self
                .rate_limits
                .reserve(key, self.config.rate_limit_window, max_count, now)
                .await
                .map_err(|e| CoreError::Storage(e.to_string()))?;
            if !ok {
                self.rollback_all(&reserved, now).await;
                self.publish_rate_limited(realm_id, identifier);
                return Err(CoreError::RateLimitExceeded {
                    reason: format!("sliding-window limit exceeded for {key}"),
                });
            }
            reserved.push(key.clone());
        }

        if let Some(ip_key) = &keys[2] {
            let ok = self
                .rate_limits
                .reserve(ip_key, self.config.rate_limit_window, self.config.max_attempts_per_ip, now)
                .await
                .map_err(|e| CoreError::Storage(e.to_string()))?;
            if !ok {
                self.rollback_all(&reserved, now).await;
                self.publish_rate_limited(realm_id, identifier);
                return Err(CoreError::RateLimitExceeded {
                    reason: format!("sliding-window limit exceeded for {ip_key}"),
                });
            }
            reserved.push(ip_key.clone());
        }

        let user = match user_id_hint {
            Some(id) => self
                .users
                .find_by_id(id)
                .await
                .map_err(|e| CoreError::Storage(e.to_string()))?,
            None => self
                .users
                .find_by_identifier(realm_id, identifier)
                .await
                .map_err(|e| CoreError::Storage(e.to_string()))?,
        };

        let Some(user) = user else {
            // No account: go through every outward motion except actually
            // minting and dispatching a token, so the response is
            // indistinguishable from the success path.
            self.rollback_all(&reserved, now).await;
            return Ok(Success);
        };

        let secret = Self::generate_secret();
        let expires_at = now + self.config.token_validity;
        let reset_token = PasswordResetToken {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: kodex_crypto::digest_hex(&secret),
            contact_value: identifier.to_string(),
            created_at: now,
            expires_at,
            used_at: None,
            ip_address: ip.map(|s| s.to_string()),
        };

        match self.sender.send(identifier, &secret).await {
            Ok(()) => {
                self.tokens
                    .insert(reset_token)
                    .await
                    .map_err(|e| CoreError::Storage(e.to_string()))?;
                for key in &reserved {
                    self.rate_limits
                        .commit(key)
                        .await
                        .map_err(|e| CoreError::Storage(e.to_string()))?;
                }
                if let Some(metrics) = &self.metrics {
                    metrics.password_resets_requested_total.inc();
                }
            }
            Err(reason) => {
                warn!(user_id = %user.id, reason, "password reset dispatch failed");
                self.rollback_all(&reserved, now).await;
            }
        }

        Ok(Success)
    }

    /// Returns the owning user id iff `token` matches a live (unexpired,
    /// unconsumed) reset record. Does not consume it.
    pub async fn verify(&self, token: &str) -> CoreResult<Uuid> {
        let digest = kodex_crypto::digest_hex(token);
        let record = self
            .tokens
            .find_by_hash(&digest)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?
            .ok_or(CoreError::TokenNotFound)?;

        if !record.is_live(Utc::now()) {
            return Err(CoreError::TokenExpired);
        }
        Ok(record.user_id)
    }

    /// Consumes `token` via the conditional `usedAt` update; succeeds iff
    /// exactly one row flipped.
    pub async fn consume(&self, token: &str) -> CoreResult<Uuid> {
        let digest = kodex_crypto::digest_hex(token);
        let now = Utc::now();
        let record = self
            .tokens
            .find_by_hash(&digest)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?
            .ok_or(CoreError::TokenNotFound)?;

        if !record.is_live(now) {
            return Err(CoreError::TokenExpired);
        }

        let consumed = self
            .tokens
            .consume(&digest, now)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        if !consumed {
            return Err(CoreError::TokenNotFound);
        }
        Ok(record.user_id)
    }

    pub async fn revoke_all_reset_tokens(&self, user_id: Uuid) -> CoreResult<u64> {
        self.tokens
            .revoke_all_for_user(user_id)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))
    }

    async fn rollback_all(&self, keys: &[String], now: DateTime<Utc>) {
        for key in keys {
            if let Err(err) = self.rate_limits.rollback(key, now).await {
                warn!(key, error = %err, "failed to roll back rate-limit reservation");
            }
        }
    }

    fn publish_rate_limited(&self, realm_id: &str, identifier: &str) {
        self.bus
            .publish(DomainEvent::RateLimitExceeded {
                header: EventHeader::new(realm_id.to_string(), Severity::Warning),
                identifier: identifier.to_string(),
            })
            .ok();
    }

    fn user_key(identifier: &str) -> String {
        format!("pwreset:user:{identifier}")
    }

    fn identifier_key(identifier: &str) -> String {
        format!("pwreset:identifier:{identifier}")
    }

    fn ip_key(ip: &str) -> String {
        format!("pwreset:ip:{ip}")
    }

    fn generate_secret() -> String {
        let mut bytes = [0u8; RESET_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}
