use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use serde_json::Value;
use tracing::debug;

use crate::claims::{Claims, ClaimsRepr, SigningClaims, TokenType};
use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult};

/// The seam the core's token manager signs and verifies through. Fixes the
/// claim contract, not the signing algorithm: a host may substitute any
/// implementation (HSM-backed, EdDSA, a remote KMS call) as long as it
/// round-trips [`SigningClaims`] through [`Claims`].
pub trait TokenSigner: Send + Sync {
    fn sign(&self, claims: &SigningClaims) -> AuthResult<String>;
    fn verify(&self, token: &str, expected_type: TokenType) -> AuthResult<Claims>;
}

/// Thread-safe store for decoding keys, keyed by `kid`. Supports rotation:
/// an old key stays registered for verification after a new one becomes
/// active for signing.
#[derive(Clone, Default)]
pub struct InMemoryKeyStore {
    inner: Arc<RwLock<HashMap<String, DecodingKey>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, kid: impl Into<String>, key: DecodingKey) {
        let mut guard = self.inner.write().expect("rwlock poisoned");
        guard.insert(kid.into(), key);
    }

    pub fn get(&self, kid: &str) -> Option<DecodingKey> {
        let guard = self.inner.read().expect("rwlock poisoned");
        guard.get(kid).cloned()
    }
}

struct ActiveKey {
    kid: String,
    encoding_key: EncodingKey,
}

/// Default [`TokenSigner`] implementation: RS256 via `jsonwebtoken`, keys
/// supplied as PKCS#8 PEM, generalized to the access/refresh claim
/// contract.
pub struct RsaJwtSigner {
    config: JwtConfig,
    active_key: ActiveKey,
    store: InMemoryKeyStore,
}

impl RsaJwtSigner {
    /// Build a signer from a single PKCS#8 RSA private key PEM. The matching
    /// public key is derived and registered for verification under `kid`.
    pub fn new(config: JwtConfig, kid: impl Into<String>, private_pem: &str) -> AuthResult<Self> {
        let kid = kid.into();
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|err| AuthError::KeyParse(kid.clone(), err.to_string()))?;

        let private = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .map_err(|err| AuthError::KeyParse(kid.clone(), err.to_string()))?;
        let public_pem = private
            .to_public_key()
            .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|err| AuthError::KeyParse(kid.clone(), err.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|err| AuthError::KeyParse(kid.clone(), err.to_string()))?;

        let store = InMemoryKeyStore::new();
        store.insert(kid.clone(), decoding_key);

        Ok(Self {
            config,
            active_key: ActiveKey { kid, encoding_key },
            store,
        })
    }

    /// Register an additional verification-only key, e.g. the previous
    /// active key during a rotation window.
    pub fn add_verification_key(&self, kid: impl Into<String>, public_pem_pkcs1: &str) -> AuthResult<()> {
        let kid = kid.into();
        let decoding_key = DecodingKey::from_rsa_pem(public_pem_pkcs1.as_bytes())
            .map_err(|err| AuthError::KeyParse(kid.clone(), err.to_string()))?;
        self.store.insert(kid, decoding_key);
        Ok(())
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }
}

impl TokenSigner for RsaJwtSigner {
    fn sign(&self, claims: &SigningClaims) -> AuthResult<String> {
        let repr = ClaimsRepr {
            sub: claims.subject.to_string(),
            realm: claims.realm.clone(),
            token_family: claims.token_family.to_string(),
            roles: claims.roles.clone(),
            jti: claims.jti.to_string(),
            typ: claims.token_type.as_str().to_string(),
            exp: claims.expires_at.timestamp(),
            iat: claims.issued_at.timestamp(),
            iss: self.config.issuer.clone(),
            aud: Some(crate::claims::AudienceRepr::Single(
                self.config.audience.clone(),
            )),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.active_key.kid.clone());

        encode(&header, &repr, &self.active_key.encoding_key).map_err(AuthError::from)
    }

    fn verify(&self, token: &str, expected_type: TokenType) -> AuthResult<Claims> {
        let header = decode_header(token).map_err(|err| AuthError::InvalidHeader(err.to_string()))?;
        let kid = header.kid.ok_or(AuthError::MissingKeyId)?;
        let key = self
            .store
            .get(&kid)
            .ok_or_else(|| AuthError::UnknownKeyId(kid.clone()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.config.issuer.clone()]);
        validation.set_audience(&[self.config.audience.clone()]);
        validation.leeway = self.config.leeway_seconds.into();

        let token_data = decode::<Value>(token, &key, &validation)?;
        let claims = Claims::try_from(token_data.claims)?;

        if claims.token_type != expected_type {
            return Err(AuthError::WrongTokenType {
                expected: expected_type.as_str(),
                found: claims.token_type.as_str().to_string(),
            });
        }

        debug!(kid, typ = expected_type.as_str(), "verified JWT successfully");
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use uuid::Uuid;

    fn test_signer() -> RsaJwtSigner {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 2048).expect("generate key");
        let pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .expect("encode pkcs8")
            .to_string();
        RsaJwtSigner::new(JwtConfig::new("kodex", "kodex-clients"), "test-kid", &pem)
            .expect("build signer")
    }

    fn sample_claims(token_type: TokenType) -> SigningClaims {
        let now = Utc::now();
        SigningClaims {
            subject: Uuid::new_v4(),
            realm: "acme".to_string(),
            token_family: Uuid::new_v4(),
            roles: vec!["user".to_string()],
            jti: Uuid::new_v4(),
            token_type,
            issued_at: now,
            expires_at: now + Duration::minutes(15),
        }
    }

    #[test]
    fn sign_then_verify_round_trips_claims() {
        let signer = test_signer();
        let claims = sample_claims(TokenType::Access);
        let token = signer.sign(&claims).expect("sign");
        let verified = signer.verify(&token, TokenType::Access).expect("verify");
        assert_eq!(verified.subject, claims.subject);
        assert_eq!(verified.realm, claims.realm);
        assert_eq!(verified.token_family, claims.token_family);
        assert_eq!(verified.roles, claims.roles);
    }

    #[test]
    fn verify_rejects_mismatched_token_type() {
        let signer = test_signer();
        let claims = sample_claims(TokenType::Refresh);
        let token = signer.sign(&claims).expect("sign");
        let err = signer
            .verify(&token, TokenType::Access)
            .expect_err("should reject refresh presented as access");
        assert!(matches!(err, AuthError::WrongTokenType { .. }));
    }

    #[test]
    fn verify_rejects_unknown_kid() {
        let signer = test_signer();
        let other = test_signer();
        let claims = sample_claims(TokenType::Access);
        let token = other.sign(&claims).expect("sign with other key");
        let err = signer
            .verify(&token, TokenType::Access)
            .expect_err("should reject foreign kid");
        assert!(matches!(err, AuthError::UnknownKeyId(_)));
    }
}
