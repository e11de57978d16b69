use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// The error taxonomy every public operation reports through. Credential
/// and validation failures return the same shape regardless of the
/// underlying reason (see [`CoreError::InvalidCredentials`]); infrastructure
/// failures propagate from the storage collaborator unchanged.
#[derive(Debug, Error)]
pub enum CoreError {
    // --- Validation ---
    #[error("invalid email address")]
    InvalidEmail(Vec<kodex_validate::FieldIssue>),
    #[error("invalid phone number")]
    InvalidPhone(Vec<kodex_validate::FieldIssue>),
    #[error("password does not meet strength requirements")]
    WeakPassword,
    #[error("invalid input for field '{field}'")]
    InvalidInput {
        field: String,
        errors: Vec<kodex_validate::FieldIssue>,
    },
    #[error("invalid custom attribute key '{0}'")]
    InvalidCustomAttribute(String),

    // --- Authorization ---
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is not verified")]
    UnverifiedAccount,
    #[error("account is locked until {unlock_at:?}")]
    AccountLocked {
        unlock_at: Option<chrono::DateTime<chrono::Utc>>,
    },

    // --- Conflict ---
    #[error("email already in use")]
    EmailAlreadyExists,
    #[error("phone already in use")]
    PhoneAlreadyExists,
    #[error("role '{0}' not found")]
    RoleNotFound(String),

    // --- NotFound ---
    #[error("user not found")]
    UserNotFound,
    #[error("token not found")]
    TokenNotFound,
    #[error("profile not found")]
    ProfileNotFound,

    // --- Security ---
    #[error("token replay detected")]
    TokenReplayDetected,
    #[error("token has been revoked")]
    TokenRevoked,
    #[error("token has expired")]
    TokenExpired,
    #[error("rate limit exceeded: {reason}")]
    RateLimitExceeded { reason: String },

    // --- Infrastructure ---
    #[error("storage error: {0}")]
    Storage(String),
    #[error("signing error: {0}")]
    Signing(#[from] kodex_auth::AuthError),
}

/// Outcome of an update-processor command: a typed success or a typed
/// failure, never a thrown validation exception.
#[derive(Debug, Error)]
pub enum UpdateFailure {
    #[error("entity not found")]
    NotFound,
    #[error("validation failed")]
    ValidationFailed(Vec<kodex_validate::FieldIssue>),
    #[error("constraint violated on '{field}': {message}")]
    ConstraintViolation { field: String, message: String },
    #[error("unknown failure: {0}")]
    Unknown(String),
}
