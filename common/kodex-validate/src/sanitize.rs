use serde_json::Value;

const REDACTED_PLACEHOLDER: &str = "[REDACTED]";
pub const DEFAULT_MAX_KEY_LEN: usize = 128;
pub const DEFAULT_MAX_VALUE_LEN: usize = 4096;
pub const DEFAULT_MAX_ATTRIBUTES: usize = 50;

/// Substrings that mark a field as sensitive wherever they appear, e.g.
/// `user_password`, `oauthToken`, `zip_code`. Deliberately broad: a false
/// positive here only costs an extra redaction, a false negative leaks a
/// secret into an audit trail.
const SENSITIVE_SUBSTRINGS: &[&str] = &[
    "password",
    "token",
    "secret",
    "credential",
    "authorization",
    "otp",
    "code",
];

/// Names explicitly carved out of the `key` word-match below even though
/// they contain `key` as a standalone token once split on case and `_`
/// boundaries. `primaryKey`/`primary_key` are ordinary identifier fields,
/// not secrets, and the word-match rule alone cannot tell them apart from
/// `apiKey`/`api_key` — so they are allowlisted by name instead.
const ALLOWED_KEY_NAMES: &[&str] = &["primarykey"];

/// Splits `name` on `_`/`-`/`.`/whitespace and on lower-to-upper case
/// transitions, so `apiKey`, `api_key`, and `api-key` all tokenize to
/// `["api", "key"]` while `keyboard`, `monkey`, and `turkey` stay a single
/// token that is not the word `key`.
fn tokenize(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase();
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens.into_iter().map(|t| t.to_lowercase()).collect()
}

/// A substring-plus-word-boundary rule: `password`, `token`, `secret`,
/// `credential`, `authorization`, `otp`, and `code` match anywhere in the
/// name; `key` only matches as a whole word once the name is tokenized on
/// case transitions and separators, so `apiKey` and `api_key` are caught
/// the same way `key` alone would be, while `keyboard`, `monkey`,
/// `turkey`, and `author` stay untouched. `primaryKey` is the one name
/// that would otherwise tokenize to a `key` word and is allowlisted
/// explicitly — see [`ALLOWED_KEY_NAMES`].
pub fn is_sensitive_key(name: &str) -> bool {
    let lower = name.to_lowercase();
    if SENSITIVE_SUBSTRINGS.iter().any(|needle| lower.contains(needle)) {
        return true;
    }
    let tokens = tokenize(name);
    if ALLOWED_KEY_NAMES.contains(&tokens.join("").as_str()) {
        return false;
    }
    tokens.iter().any(|t| t == "key")
}

/// HTML-entity escapes the five characters that matter for breaking out of
/// an HTML attribute or element body, and strips every ISO control
/// character (null, CR, LF, tab, bell, backspace, form feed, vertical tab)
/// rather than just the obviously dangerous ones.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Strips a field/attribute key down to `[A-Za-z0-9_.-]` and a bounded
/// length, so an arbitrary string can't be used to inject structure into a
/// downstream log line or storage key.
pub fn sanitize_key(key: &str) -> String {
    sanitize_key_capped(key, DEFAULT_MAX_KEY_LEN)
}

pub fn sanitize_key_capped(key: &str, max_len: usize) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.' || *c == '-')
        .take(max_len)
        .collect()
}

fn truncate_chars(value: &str, max_len: usize) -> String {
    value.chars().take(max_len).collect()
}

/// Recursively HTML-escapes string leaves and redacts sensitive-named
/// object fields throughout a JSON value tree. Keys are cleaned to the
/// safe character set and string values are length-capped.
pub fn sanitize_json(value: Value) -> Value {
    sanitize_json_capped(value, DEFAULT_MAX_KEY_LEN, DEFAULT_MAX_VALUE_LEN)
}

pub fn sanitize_json_capped(value: Value, max_key_len: usize, max_value_len: usize) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_chars(&escape_html(&s), max_value_len)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| sanitize_json_capped(item, max_key_len, max_value_len))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                let sanitized_value = if is_sensitive_key(&key) {
                    Value::String(REDACTED_PLACEHOLDER.to_string())
                } else {
                    sanitize_json_capped(val, max_key_len, max_value_len)
                };
                out.insert(sanitize_key_capped(&key, max_key_len), sanitized_value);
            }
            Value::Object(out)
        }
        other => other,
    }
}

/// Returns the field's value unchanged unless its key is sensitive, in
/// which case it is replaced with a fixed placeholder string.
pub fn redact_sensitive(key: &str, value: Value) -> Value {
    if is_sensitive_key(key) {
        return Value::String(REDACTED_PLACEHOLDER.to_string());
    }
    sanitize_json(value)
}

/// Applies [`sanitize_json_capped`] to a user's custom-attribute map and
/// then drops attributes beyond `max_attributes`, preserving insertion
/// order so the same truncation happens deterministically on retry.
pub fn cap_attributes(
    attributes: serde_json::Map<String, Value>,
    max_attributes: usize,
) -> serde_json::Map<String, Value> {
    let mut sanitized = serde_json::Map::with_capacity(attributes.len().min(max_attributes));
    for (key, value) in attributes {
        if sanitized.len() >= max_attributes {
            break;
        }
        let clean_key = sanitize_key(&key);
        let clean_value = if is_sensitive_key(&key) {
            Value::String(REDACTED_PLACEHOLDER.to_string())
        } else {
            sanitize_json(value)
        };
        sanitized.insert(clean_key, clean_value);
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escapes_html_special_characters() {
        assert_eq!(
            escape_html("<script>alert('x')</script>"),
            "&lt;script&gt;alert(&#x27;x&#x27;)&lt;&#x2F;script&gt;"
        );
    }

    #[test]
    fn strips_all_control_characters() {
        let input = "line1\nline2\ttabbed\u{0007}bell\r\nend";
        let out = escape_html(input);
        assert_eq!(out, "line1line2tabbedbellend");
    }

    #[test]
    fn flags_known_sensitive_field_names() {
        for name in [
            "password",
            "apiKey",
            "api_key",
            "authToken",
            "client_secret",
            "SSN_CODE",
            "otp",
        ] {
            assert!(is_sensitive_key(name), "{name} should be sensitive");
        }
    }

    #[test]
    fn does_not_flag_words_that_merely_contain_key_as_a_substring() {
        for name in ["keyboard", "monkey", "turkey", "primaryKey"] {
            assert!(!is_sensitive_key(name), "{name} should not be sensitive");
        }
    }

    #[test]
    fn author_is_not_flagged_by_the_authorization_substring() {
        assert!(!is_sensitive_key("author"));
    }

    #[test]
    fn redacts_sensitive_fields_in_nested_json() {
        let input = json!({
            "username": "alice",
            "password": "hunter2",
            "profile": { "authToken": "abc", "primaryKey": 42, "bio": "<b>hi</b>" }
        });
        let sanitized = sanitize_json(input);
        assert_eq!(sanitized["password"], json!("[REDACTED]"));
        assert_eq!(sanitized["profile"]["authToken"], json!("[REDACTED]"));
        assert_eq!(sanitized["profile"]["primaryKey"], json!(42));
        assert_eq!(sanitized["profile"]["bio"], json!("&lt;b&gt;hi&lt;&#x2F;b&gt;"));
    }

    #[test]
    fn sanitize_key_strips_disallowed_characters() {
        assert_eq!(sanitize_key("user name!@#"), "username");
    }

    #[test]
    fn caps_attribute_count_and_preserves_order() {
        let mut map = serde_json::Map::new();
        for i in 0..5 {
            map.insert(format!("attr{i}"), json!(i));
        }
        let capped = cap_attributes(map, 3);
        assert_eq!(capped.len(), 3);
        assert!(capped.contains_key("attr0"));
        assert!(!capped.contains_key("attr4"));
    }

    #[test]
    fn value_length_is_capped() {
        let long = "a".repeat(10);
        let sanitized = sanitize_json_capped(json!(long), DEFAULT_MAX_KEY_LEN, 4);
        assert_eq!(sanitized, json!("aaaa"));
    }
}
