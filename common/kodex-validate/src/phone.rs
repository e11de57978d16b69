use std::str::FromStr;

use phonenumber::country::Id as CountryId;
use phonenumber::Mode;

use crate::FieldIssue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneIssue {
    Empty,
    UnknownRegion,
    Unparseable,
    Invalid,
    MissingPlusPrefix,
}

impl PhoneIssue {
    pub fn code(&self) -> &'static str {
        match self {
            PhoneIssue::Empty => "phone.empty",
            PhoneIssue::UnknownRegion => "phone.unknown_region",
            PhoneIssue::Unparseable => "phone.unparseable",
            PhoneIssue::Invalid => "phone.invalid",
            PhoneIssue::MissingPlusPrefix => "phone.missing_plus_prefix",
        }
    }

    fn issue(&self) -> FieldIssue {
        let message = match self {
            PhoneIssue::Empty => "phone number is empty".to_string(),
            PhoneIssue::UnknownRegion => "default region code is not recognized".to_string(),
            PhoneIssue::Unparseable => "phone number could not be parsed".to_string(),
            PhoneIssue::Invalid => "phone number is not a valid number for its region".to_string(),
            PhoneIssue::MissingPlusPrefix => "phone number must be in E.164 form, starting with '+'".to_string(),
        };
        FieldIssue::new(self.code(), message)
    }
}

#[derive(Debug, Clone)]
pub struct PhoneValidation {
    /// E.164 form (`+<country code><subscriber number>`), present whenever
    /// the input parsed, even if it failed the validity check.
    pub e164: Option<String>,
    pub issues: Vec<FieldIssue>,
}

impl PhoneValidation {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Strips every character that is not an ASCII digit, except a single
/// leading `+`, so callers can hand this function unfiltered user input.
fn strip_to_digits(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (idx, ch) in trimmed.chars().enumerate() {
        if ch == '+' && idx == 0 {
            out.push(ch);
        } else if ch.is_ascii_digit() {
            out.push(ch);
        }
    }
    out
}

/// Validates a phone number against a default region (used when the input
/// has no leading `+` country code), returning its canonical E.164 form.
/// When `require_e164` is set, the raw input must itself start with `+`;
/// numbers that only parse by way of `default_region` are rejected.
pub fn validate_phone(raw: &str, default_region: &str, require_e164: bool) -> PhoneValidation {
    let cleaned = strip_to_digits(raw);
    if cleaned.is_empty() {
        return PhoneValidation {
            e164: None,
            issues: vec![PhoneIssue::Empty.issue()],
        };
    }

    if require_e164 && !cleaned.starts_with('+') {
        return PhoneValidation {
            e164: None,
            issues: vec![PhoneIssue::MissingPlusPrefix.issue()],
        };
    }

    let region = match CountryId::from_str(&default_region.to_uppercase()) {
        Ok(region) => Some(region),
        Err(_) => {
            return PhoneValidation {
                e164: None,
                issues: vec![PhoneIssue::UnknownRegion.issue()],
            }
        }
    };

    match phonenumber::parse(region, &cleaned) {
        Ok(number) => {
            let e164 = number.format().mode(Mode::E164).to_string();
            if phonenumber::is_valid(&number) {
                PhoneValidation {
                    e164: Some(e164),
                    issues: Vec::new(),
                }
            } else {
                PhoneValidation {
                    e164: Some(e164),
                    issues: vec![PhoneIssue::Invalid.issue()],
                }
            }
        }
        Err(_) => PhoneValidation {
            e164: None,
            issues: vec![PhoneIssue::Unparseable.issue()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_e164_input_regardless_of_default_region() {
        let result = validate_phone("+14155552671", "US", false);
        assert!(result.is_valid(), "{:?}", result.issues);
        assert_eq!(result.e164.as_deref(), Some("+14155552671"));
    }

    #[test]
    fn fills_in_default_region_for_local_numbers() {
        let result = validate_phone("(415) 555-2671", "US", false);
        assert!(result.is_valid(), "{:?}", result.issues);
        assert_eq!(result.e164.as_deref(), Some("+14155552671"));
    }

    #[test]
    fn rejects_empty_input() {
        let result = validate_phone("   ", "US", false);
        assert!(!result.is_valid());
        assert!(result.issues.iter().any(|i| i.code == PhoneIssue::Empty.code()));
    }

    #[test]
    fn rejects_unknown_default_region() {
        let result = validate_phone("5551234", "ZZ", false);
        assert!(result
            .issues
            .iter()
            .any(|i| i.code == PhoneIssue::UnknownRegion.code()));
    }

    #[test]
    fn rejects_garbage_input() {
        let result = validate_phone("not a phone number", "US", false);
        assert!(!result.is_valid());
    }

    #[test]
    fn require_e164_rejects_local_format_even_if_parseable() {
        let result = validate_phone("(415) 555-2671", "US", true);
        assert!(!result.is_valid());
        assert!(result.issues.iter().any(|i| i.code == PhoneIssue::MissingPlusPrefix.code()));
    }

    #[test]
    fn require_e164_accepts_plus_prefixed_input() {
        let result = validate_phone("+14155552671", "US", true);
        assert!(result.is_valid(), "{:?}", result.issues);
    }
}
