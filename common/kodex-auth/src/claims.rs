use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Which side of a token pair a claim set describes. Carried as the `typ`
/// claim so a verifier can reject an access token presented where a refresh
/// token is expected, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// The claim set handed to a [`crate::signer::TokenSigner`] for encoding.
#[derive(Debug, Clone)]
pub struct SigningClaims {
    pub subject: Uuid,
    pub realm: String,
    pub token_family: Uuid,
    pub roles: Vec<String>,
    pub jti: Uuid,
    pub token_type: TokenType,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Application-facing representation of a verified token's claims.
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    pub subject: Uuid,
    pub realm: String,
    pub token_family: Uuid,
    pub roles: Vec<String>,
    pub jti: Uuid,
    pub token_type: TokenType,
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub issuer: String,
    pub audience: Vec<String>,
    pub raw: serde_json::Value,
}

impl Claims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|value| value == role)
    }
}

/// Wire representation matching the minimum claim contract: `sub`, `iat`,
/// `exp`, `realm`, `tokenFamily`, `roles`, `jti`, `typ`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimsRepr {
    pub sub: String,
    pub realm: String,
    #[serde(rename = "tokenFamily")]
    pub token_family: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub jti: String,
    pub typ: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    #[serde(default)]
    pub aud: Option<AudienceRepr>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AudienceRepr {
    Single(String),
    Many(Vec<String>),
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        let subject = Uuid::parse_str(&value.sub)
            .map_err(|_| AuthError::InvalidClaim("sub", value.sub.clone()))?;
        let token_family = Uuid::parse_str(&value.token_family)
            .map_err(|_| AuthError::InvalidClaim("tokenFamily", value.token_family.clone()))?;
        let jti = Uuid::parse_str(&value.jti)
            .map_err(|_| AuthError::InvalidClaim("jti", value.jti.clone()))?;
        let token_type = match value.typ.as_str() {
            "access" => TokenType::Access,
            "refresh" => TokenType::Refresh,
            other => return Err(AuthError::InvalidClaim("typ", other.to_string())),
        };

        let expires_at = Utc
            .timestamp_opt(value.exp, 0)
            .single()
            .ok_or_else(|| AuthError::InvalidClaim("exp", value.exp.to_string()))?;
        let issued_at = Some(
            Utc.timestamp_opt(value.iat, 0)
                .single()
                .ok_or_else(|| AuthError::InvalidClaim("iat", value.iat.to_string()))?,
        );

        let audience = match value.aud {
            Some(AudienceRepr::Single(item)) => vec![item],
            Some(AudienceRepr::Many(items)) => items,
            None => Vec::new(),
        };

        Ok(Self {
            subject,
            realm: value.realm,
            token_family,
            roles: value.roles,
            jti,
            token_type,
            expires_at,
            issued_at,
            issuer: value.iss,
            audience,
            raw: serde_json::Value::Null,
        })
    }
}

impl TryFrom<serde_json::Value> for Claims {
    type Error = AuthError;

    fn try_from(value: serde_json::Value) -> AuthResult<Self> {
        let repr: ClaimsRepr = serde_json::from_value(value.clone())
            .map_err(|err| AuthError::InvalidJson(err.to_string()))?;
        let mut claims = Claims::try_from(repr)?;
        claims.raw = value;
        Ok(claims)
    }
}
