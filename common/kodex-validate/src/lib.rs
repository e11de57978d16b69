//! Input validation and sanitization for identity-bearing fields: email,
//! phone, password strength, and free-text metadata headed for storage or
//! an audit trail.
//!
//! Every validator here is pure and allocation-light: no I/O, no database
//! lookups beyond an in-memory blocklist. Validators normalize their input
//! (trim, lowercase, canonicalize) and report every violation found rather
//! than failing fast on the first one, so a caller can surface all of them
//! to a user in one round trip.

pub mod attributes;
pub mod email;
pub mod password;
pub mod phone;
pub mod sanitize;

pub use attributes::{validate_attribute_key, AttributeKeyIssue};
pub use email::{validate_email, EmailIssue, EmailValidation};
pub use password::{score_password, PasswordScore, PASSWORD_MAX_LEN, PASSWORD_MIN_LEN};
pub use phone::{validate_phone, PhoneIssue, PhoneValidation};
pub use sanitize::{
    cap_attributes, escape_html, redact_sensitive, sanitize_json, sanitize_key, DEFAULT_MAX_ATTRIBUTES,
    DEFAULT_MAX_KEY_LEN, DEFAULT_MAX_VALUE_LEN,
};

/// A single field-level validation failure, carrying a stable machine code
/// alongside a human-readable message. Stable codes let a host map failures
/// to its own localized copy without parsing `message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub code: &'static str,
    pub message: String,
}

impl FieldIssue {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
