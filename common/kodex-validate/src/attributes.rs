use once_cell::sync::Lazy;
use regex::Regex;

use crate::FieldIssue;

static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("static attribute key pattern compiles"));

/// Keys that collide with columns the core manages directly; a custom
/// attribute can't shadow them.
const RESERVED_KEYS: &[&str] = &["id", "user_id", "password", "password_hash", "email", "phone", "status", "realm_id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKeyIssue {
    Empty,
    TooLong,
    InvalidCharacters,
    Reserved,
}

impl AttributeKeyIssue {
    pub fn code(&self) -> &'static str {
        match self {
            AttributeKeyIssue::Empty => "attribute.key.empty",
            AttributeKeyIssue::TooLong => "attribute.key.too_long",
            AttributeKeyIssue::InvalidCharacters => "attribute.key.invalid_characters",
            AttributeKeyIssue::Reserved => "attribute.key.reserved",
        }
    }

    fn issue(&self, key: &str) -> FieldIssue {
        let message = match self {
            AttributeKeyIssue::Empty => "attribute key is empty".to_string(),
            AttributeKeyIssue::TooLong => format!("attribute key '{key}' exceeds the configured length limit"),
            AttributeKeyIssue::InvalidCharacters => {
                format!("attribute key '{key}' must match [A-Za-z0-9_.-]+")
            }
            AttributeKeyIssue::Reserved => format!("attribute key '{key}' is reserved"),
        };
        FieldIssue::new(self.code(), message)
    }
}

/// Validates a custom-attribute key against the shape the core requires:
/// non-empty, `[A-Za-z0-9_.-]+`, under `max_len`, and not one of the
/// reserved column names or (when configured) outside an explicit allow
/// list.
pub fn validate_attribute_key(
    key: &str,
    max_len: usize,
    allowed_keys: Option<&std::collections::HashSet<String>>,
) -> Result<(), FieldIssue> {
    if key.is_empty() {
        return Err(AttributeKeyIssue::Empty.issue(key));
    }
    if key.chars().count() > max_len {
        return Err(AttributeKeyIssue::TooLong.issue(key));
    }
    if !KEY_PATTERN.is_match(key) {
        return Err(AttributeKeyIssue::InvalidCharacters.issue(key));
    }
    if RESERVED_KEYS.contains(&key) {
        return Err(AttributeKeyIssue::Reserved.issue(key));
    }
    if let Some(allowed) = allowed_keys {
        if !allowed.contains(key) {
            return Err(AttributeKeyIssue::Reserved.issue(key));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_well_formed_key() {
        assert!(validate_attribute_key("favorite.color-1", 128, None).is_ok());
    }

    #[test]
    fn rejects_disallowed_characters() {
        let err = validate_attribute_key("favorite color!", 128, None).unwrap_err();
        assert_eq!(err.code, AttributeKeyIssue::InvalidCharacters.code());
    }

    #[test]
    fn rejects_reserved_keys() {
        let err = validate_attribute_key("password_hash", 128, None).unwrap_err();
        assert_eq!(err.code, AttributeKeyIssue::Reserved.code());
    }

    #[test]
    fn rejects_keys_outside_an_explicit_allow_list() {
        let allowed: std::collections::HashSet<String> = ["newsletter_opt_in".to_string()].into_iter().collect();
        assert!(validate_attribute_key("newsletter_opt_in", 128, Some(&allowed)).is_ok());
        assert!(validate_attribute_key("anything_else", 128, Some(&allowed)).is_err());
    }

    #[test]
    fn rejects_overlong_keys() {
        let key = "a".repeat(10);
        assert!(validate_attribute_key(&key, 5, None).is_err());
    }
}
