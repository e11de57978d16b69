//! Configuration surface. Every knob here corresponds to an explicit
//! effect named in the external interface: nothing is inferred from
//! environment ambience the way the host's own config DSL might do it.

use std::collections::HashSet;

use chrono::Duration;

use crate::hooks::FailureStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    Rotate,
    Fixed,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub access_validity: Duration,
    pub refresh_validity: Duration,
    pub persist_access: bool,
    pub rotation_policy: RotationPolicy,
    pub replay_grace_period: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_validity: Duration::minutes(15),
            refresh_validity: Duration::days(30),
            persist_access: false,
            rotation_policy: RotationPolicy::Rotate,
            replay_grace_period: Duration::seconds(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PasswordResetConfig {
    pub token_validity: Duration,
    pub max_attempts_per_user: u32,
    pub max_attempts_per_identifier: u32,
    pub max_attempts_per_ip: u32,
    pub rate_limit_window: Duration,
    pub cooldown_period: Option<Duration>,
}

impl Default for PasswordResetConfig {
    fn default() -> Self {
        Self {
            token_validity: Duration::hours(1),
            max_attempts_per_user: 5,
            max_attempts_per_identifier: 5,
            max_attempts_per_ip: 10,
            rate_limit_window: Duration::hours(1),
            cooldown_period: Some(Duration::seconds(60)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub window: Duration,
    pub lock_duration: Option<Duration>,
}

impl LockoutPolicy {
    pub fn strict() -> Self {
        Self {
            threshold: 3,
            window: Duration::minutes(5),
            lock_duration: Some(Duration::minutes(30)),
        }
    }

    pub fn moderate() -> Self {
        Self {
            threshold: 5,
            window: Duration::minutes(15),
            lock_duration: Some(Duration::hours(1)),
        }
    }

    pub fn lenient() -> Self {
        Self {
            threshold: 10,
            window: Duration::minutes(60),
            lock_duration: Some(Duration::hours(2)),
        }
    }

    pub fn disabled() -> Self {
        Self {
            threshold: u32::MAX,
            window: Duration::minutes(1),
            lock_duration: None,
        }
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::moderate()
    }
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub retention_period: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_period: Duration::days(90),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PasswordPolicyConfig {
    pub min_length: usize,
    pub min_score: u8,
}

impl Default for PasswordPolicyConfig {
    fn default() -> Self {
        Self {
            min_length: kodex_validate::PASSWORD_MIN_LEN,
            min_score: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub allow_disposable: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            allow_disposable: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhoneConfig {
    pub default_region: String,
    pub require_e164: bool,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            default_region: "US".to_string(),
            require_e164: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CustomAttributesConfig {
    pub max_key_length: usize,
    pub max_value_length: usize,
    pub max_attributes: usize,
    pub allowed_keys: Option<HashSet<String>>,
}

impl Default for CustomAttributesConfig {
    fn default() -> Self {
        Self {
            max_key_length: kodex_validate::DEFAULT_MAX_KEY_LEN,
            max_value_length: kodex_validate::DEFAULT_MAX_VALUE_LEN,
            max_attributes: kodex_validate::DEFAULT_MAX_ATTRIBUTES,
            allowed_keys: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HooksConfig {
    pub failure_strategy: FailureStrategy,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            failure_strategy: FailureStrategy::FailFast,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KodexConfig {
    pub token: TokenConfig,
    pub password_reset: PasswordResetConfig,
    pub lockout: LockoutPolicy,
    pub audit: AuditConfig,
    pub password: PasswordPolicyConfig,
    pub email: EmailConfig,
    pub phone: PhoneConfig,
    pub custom_attributes: CustomAttributesConfig,
    pub hooks: HooksConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_the_documented_bounds() {
        let config = KodexConfig::default();
        assert!(config.password_reset.token_validity >= Duration::minutes(5));
        assert!(config.password_reset.token_validity <= Duration::hours(24));
        assert!(config.token.replay_grace_period >= Duration::zero());
    }
}
