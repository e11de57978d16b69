use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token missing kid header")]
    MissingKeyId,
    #[error("no decoding key registered for kid '{0}'")]
    UnknownKeyId(String),
    #[error("failed to decode token header: {0}")]
    InvalidHeader(String),
    #[error("token verification failed: {0}")]
    Verification(String),
    #[error("invalid claim '{0}' with value '{1}'")]
    InvalidClaim(&'static str, String),
    #[error("malformed claim payload: {0}")]
    InvalidJson(String),
    #[error("failed to parse signing key for kid '{0}': {1}")]
    KeyParse(String, String),
    #[error("expected token type '{expected}' but found '{found}'")]
    WrongTokenType {
        expected: &'static str,
        found: String,
    },
    #[error("token realm '{found}' does not match expected realm '{expected}'")]
    RealmMismatch { expected: String, found: String },
    #[error("no active signing key configured")]
    NoActiveKey,
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        Self::Verification(value.to_string())
    }
}
