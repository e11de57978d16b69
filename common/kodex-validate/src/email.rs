use once_cell::sync::Lazy;
use regex::Regex;

use crate::FieldIssue;

/// RFC 5321 envelope limits: 64 octets for the local part, 255 for the
/// domain, 320 for the address as a whole.
const LOCAL_PART_MAX_LEN: usize = 64;
const DOMAIN_MAX_LEN: usize = 255;
const ADDRESS_MAX_LEN: usize = 320;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9!#$%&'*+/=?^_`{|}~.-]+@[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)+$")
        .expect("static email pattern compiles")
});

/// Domains that only exist to receive disposable addresses. Small and
/// illustrative; a host with a real need should swap this for a maintained
/// list fetched at startup.
const DISPOSABLE_DOMAINS: &[&str] = &[
    "mailinator.com",
    "10minutemail.com",
    "guerrillamail.com",
    "tempmail.com",
    "yopmail.com",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailIssue {
    /// Empty, or the whole address exceeds [`ADDRESS_MAX_LEN`].
    Length,
    /// Not exactly one `@`, or an empty local/domain part.
    Structure,
    /// Structurally shaped but fails the character-class regex.
    Format,
    LocalPartLength,
    DomainLength,
    DisposableDomain,
}

impl EmailIssue {
    /// Stable machine codes, part of the external validation contract. A
    /// host maps these to its own localized copy rather than matching on
    /// `message`, so renaming one is a breaking change.
    pub fn code(&self) -> &'static str {
        match self {
            EmailIssue::Length => "email.length",
            EmailIssue::Structure => "email.structure",
            EmailIssue::Format => "email.format",
            EmailIssue::LocalPartLength => "email.local_part.length",
            EmailIssue::DomainLength => "email.domain.length",
            EmailIssue::DisposableDomain => "email.disposable",
        }
    }

    fn issue(&self) -> FieldIssue {
        let message = match self {
            EmailIssue::Length => format!("email address is empty or exceeds {ADDRESS_MAX_LEN} characters"),
            EmailIssue::Structure => "email address must contain exactly one '@' with a non-empty local part and domain".to_string(),
            EmailIssue::Format => "email address is not a valid format".to_string(),
            EmailIssue::LocalPartLength => format!("local part exceeds {LOCAL_PART_MAX_LEN} characters"),
            EmailIssue::DomainLength => format!("domain exceeds {DOMAIN_MAX_LEN} characters"),
            EmailIssue::DisposableDomain => "email domain is a known disposable provider".to_string(),
        };
        FieldIssue::new(self.code(), message)
    }
}

#[derive(Debug, Clone)]
pub struct EmailValidation {
    /// Trimmed, lowercased form used for storage and comparison.
    pub normalized: String,
    pub issues: Vec<FieldIssue>,
}

impl EmailValidation {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Normalizes and validates an email address. Always returns a normalized
/// form, even when `issues` is non-empty, so a caller can echo it back for
/// correction without re-deriving it. `allow_disposable` lets a host accept
/// addresses at a known disposable provider rather than rejecting them.
pub fn validate_email(raw: &str, allow_disposable: bool) -> EmailValidation {
    let normalized = raw.trim().to_lowercase();
    let mut issues = Vec::new();

    if normalized.is_empty() {
        issues.push(EmailIssue::Length.issue());
        return EmailValidation { normalized, issues };
    }

    if normalized.len() > ADDRESS_MAX_LEN {
        issues.push(EmailIssue::Length.issue());
    }

    match normalized.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            if local.len() > LOCAL_PART_MAX_LEN {
                issues.push(EmailIssue::LocalPartLength.issue());
            }
            if domain.len() > DOMAIN_MAX_LEN {
                issues.push(EmailIssue::DomainLength.issue());
            }
            if !allow_disposable && DISPOSABLE_DOMAINS.iter().any(|blocked| domain == *blocked || domain.ends_with(&format!(".{blocked}"))) {
                issues.push(EmailIssue::DisposableDomain.issue());
            }
            if !EMAIL_PATTERN.is_match(&normalized) {
                issues.push(EmailIssue::Format.issue());
            }
        }
        _ => issues.push(EmailIssue::Structure.issue()),
    }

    EmailValidation { normalized, issues }
}
