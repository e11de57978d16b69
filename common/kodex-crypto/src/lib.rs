use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use rand::rngs::OsRng as RandOsRng;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Errors produced by the hashing helpers.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid hashing parameters: {0}")]
    InvalidParams(String),
    #[error("password hashing failed: {0}")]
    HashFailure(String),
}

/// Tunable Argon2id parameters. Values below the floor required by the core
/// (memory >= 19 MiB, iterations >= 2, parallelism >= 1) are rejected at
/// construction time rather than silently clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordHashParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

const MIN_MEMORY_KIB: u32 = 19 * 1024;
const MIN_ITERATIONS: u32 = 2;
const MIN_PARALLELISM: u32 = 1;

impl PasswordHashParams {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, HashError> {
        if memory_kib < MIN_MEMORY_KIB {
            return Err(HashError::InvalidParams(format!(
                "memory {memory_kib} KiB is below the required floor of {MIN_MEMORY_KIB} KiB"
            )));
        }
        if iterations < MIN_ITERATIONS {
            return Err(HashError::InvalidParams(format!(
                "iterations {iterations} is below the required floor of {MIN_ITERATIONS}"
            )));
        }
        if parallelism < MIN_PARALLELISM {
            return Err(HashError::InvalidParams(format!(
                "parallelism {parallelism} is below the required floor of {MIN_PARALLELISM}"
            )));
        }
        Ok(Self {
            memory_kib,
            iterations,
            parallelism,
        })
    }

    /// OWASP cheat-sheet minimum: m=19 MiB, t=2, p=1.
    pub fn owasp_min() -> Self {
        Self {
            memory_kib: MIN_MEMORY_KIB,
            iterations: 2,
            parallelism: 1,
        }
    }

    /// A heavier preset for services that can absorb more latency per login.
    pub fn balanced() -> Self {
        Self {
            memory_kib: 46 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }

    /// Mirrors Spring Security's `Argon2PasswordEncoder` defaults (v5.8+).
    pub fn spring_like() -> Self {
        Self {
            memory_kib: MIN_MEMORY_KIB,
            iterations: 2,
            parallelism: 1,
        }
    }

    /// Mirrors Keycloak's default Argon2 policy (more iterations, floor memory).
    pub fn keycloak_like() -> Self {
        Self {
            memory_kib: MIN_MEMORY_KIB,
            iterations: 5,
            parallelism: 1,
        }
    }
}

impl Default for PasswordHashParams {
    fn default() -> Self {
        Self::owasp_min()
    }
}

/// Memory-hard password hashing, encoded as a standard unpadded-base64 PHC string:
/// `$argon2id$v=19$m=<KiB>,t=<iter>,p=<par>$<salt>$<hash>`.
#[derive(Debug, Clone)]
pub struct PasswordHasherService {
    params: PasswordHashParams,
}

impl PasswordHasherService {
    pub fn new(params: PasswordHashParams) -> Self {
        Self { params }
    }

    fn argon2(&self) -> Result<Argon2<'static>, HashError> {
        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            None,
        )
        .map_err(|err| HashError::InvalidParams(err.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Hash a plaintext password. Each call draws a fresh random salt, so two
    /// successive calls for the same plaintext never produce the same string.
    pub fn hash(&self, plain: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut RandOsRng);
        let argon2 = self.argon2()?;
        let hash = argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|err| HashError::HashFailure(err.to_string()))?;
        Ok(hash.to_string())
    }

    /// Verify a plaintext against a previously stored digest. Parameters are
    /// read back out of the stored string itself, so verification never
    /// depends on this instance's configured preset. Malformed input returns
    /// `false` rather than raising an error.
    pub fn verify(&self, plain: &str, stored: &str) -> bool {
        let parsed = match PasswordHash::new(stored) {
            Ok(hash) => hash,
            Err(_) => return false,
        };
        Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    }
}

impl Default for PasswordHasherService {
    fn default() -> Self {
        Self::new(PasswordHashParams::default())
    }
}

const TOKEN_SALT_LEN: usize = 16;

/// Fast salted digest used to store opaque bearer-token secrets (refresh
/// tokens, password-reset tokens). Never use this for passwords.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenHasher;

impl TokenHasher {
    pub fn hash(&self, secret: &str) -> String {
        let mut salt = [0u8; TOKEN_SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let digest = Self::digest(&salt, secret);
        let mut combined = Vec::with_capacity(TOKEN_SALT_LEN + digest.len());
        combined.extend_from_slice(&salt);
        combined.extend_from_slice(&digest);
        BASE64_STANDARD.encode(combined)
    }

    /// Constant-time verification: cost does not depend on where (or
    /// whether) the digests first differ.
    pub fn verify(&self, secret: &str, stored: &str) -> bool {
        let Ok(combined) = BASE64_STANDARD.decode(stored) else {
            return false;
        };
        if combined.len() <= TOKEN_SALT_LEN {
            return false;
        }
        let (salt, expected_digest) = combined.split_at(TOKEN_SALT_LEN);
        let actual_digest = Self::digest(salt, secret);
        bool::from(actual_digest.as_slice().ct_eq(expected_digest))
    }

    fn digest(salt: &[u8], secret: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(secret.as_bytes());
        hasher.finalize().to_vec()
    }
}

/// Deterministic SHA-256 hex digest of a high-entropy bearer secret
/// (refresh tokens, password-reset tokens). Unlike [`TokenHasher`], this
/// carries no per-call salt: the secrets it digests are generated with
/// enough entropy (>= 128 random bits) that a rainbow-table precompute is
/// infeasible, so the digest can double as an equality-indexed lookup key
/// for the row that owns it — exactly what a one-time-use token table
/// needs to find its record before it can check revocation/expiry.
pub fn digest_hex(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
