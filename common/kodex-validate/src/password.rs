use once_cell::sync::Lazy;
use std::collections::HashSet;

pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 256;

const LOWER_POOL: f64 = 26.0;
const UPPER_POOL: f64 = 26.0;
const DIGIT_POOL: f64 = 10.0;
const SYMBOL_POOL: f64 = 32.0;

/// Attacker throughput assumed for the crack-time estimate: ten billion
/// guesses per second, roughly an offline GPU cluster against an unsalted
/// fast hash. Deliberately pessimistic; Argon2id in front of this in
/// practice buys several more orders of magnitude.
const ASSUMED_GUESSES_PER_SECOND: f64 = 1e10;

/// A small sample of the most common leaked passwords. A production
/// deployment should back this with a much larger frequency list; this is
/// enough to catch the obvious cases and exercise the scoring logic.
static COMMON_PASSWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password", "123456", "12345678", "qwerty", "abc123", "letmein", "monkey123",
        "iloveyou", "admin", "welcome", "password1", "123456789", "football", "dragon",
        "master", "sunshine", "princess", "trustno1",
    ]
    .into_iter()
    .collect()
});

static KEYBOARD_RUNS: &[&str] = &[
    "qwerty", "asdf", "zxcv", "qazwsx", "1qaz", "wasd", "poiuy", "lkjh",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordIssue {
    TooShort,
    TooLong,
}

#[derive(Debug, Clone)]
pub struct PasswordScore {
    /// 0 (trivially guessable) through 4 (very strong).
    pub score: u8,
    pub entropy_bits: f64,
    pub crack_time_seconds: f64,
    pub length_issue: Option<PasswordIssue>,
    pub feedback: Vec<String>,
}

impl PasswordScore {
    pub fn meets_minimum(&self, minimum: u8) -> bool {
        self.length_issue.is_none() && self.score >= minimum
    }
}

fn character_pool_size(password: &str) -> f64 {
    let mut pool = 0.0;
    if password.chars().any(|c| c.is_ascii_lowercase()) {
        pool += LOWER_POOL;
    }
    if password.chars().any(|c| c.is_ascii_uppercase()) {
        pool += UPPER_POOL;
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        pool += DIGIT_POOL;
    }
    if password.chars().any(|c| !c.is_ascii_alphanumeric()) {
        pool += SYMBOL_POOL;
    }
    pool
}

fn entropy_to_base_score(bits: f64) -> u8 {
    if bits < 28.0 {
        0
    } else if bits < 36.0 {
        1
    } else if bits < 60.0 {
        2
    } else if bits < 120.0 {
        3
    } else {
        4
    }
}

/// Counts maximal ascending or descending runs of length >= 3 in the
/// password's byte sequence, e.g. "abc", "987", "cba".
fn count_sequential_runs(password: &str) -> u32 {
    let bytes: Vec<u8> = password.bytes().collect();
    let mut count = 0;
    let mut run_len = 1;
    for window in bytes.windows(2) {
        let step = window[1] as i16 - window[0] as i16;
        if step == 1 || step == -1 {
            run_len += 1;
        } else {
            if run_len >= 3 {
                count += 1;
            }
            run_len = 1;
        }
    }
    if run_len >= 3 {
        count += 1;
    }
    count
}

/// Counts maximal runs of the same repeated character with length >= 3,
/// e.g. "aaa", "111".
fn count_repeat_runs(password: &str) -> u32 {
    let bytes: Vec<u8> = password.bytes().collect();
    let mut count = 0;
    let mut run_len = 1;
    for window in bytes.windows(2) {
        if window[0] == window[1] {
            run_len += 1;
        } else {
            if run_len >= 3 {
                count += 1;
            }
            run_len = 1;
        }
    }
    if run_len >= 3 {
        count += 1;
    }
    count
}

fn count_keyboard_patterns(lowercase: &str) -> u32 {
    KEYBOARD_RUNS
        .iter()
        .filter(|pattern| lowercase.contains(*pattern))
        .count() as u32
}

/// Scores a candidate password on a 0-4 scale, combining a Shannon-entropy
/// estimate over the active character pool with penalties for common
/// passwords, sequential runs, repeated characters, and keyboard walks.
///
/// The final score is `max(0, base_score - penalty)`: penalties subtract
/// whole score points rather than entropy bits, so one matched weakness
/// never drops a long, varied password by more than a point.
pub fn score_password(password: &str) -> PasswordScore {
    let length_issue = if password.chars().count() < PASSWORD_MIN_LEN {
        Some(PasswordIssue::TooShort)
    } else if password.chars().count() > PASSWORD_MAX_LEN {
        Some(PasswordIssue::TooLong)
    } else {
        None
    };

    let pool = character_pool_size(password);
    let entropy_bits = if pool > 0.0 {
        password.chars().count() as f64 * pool.log2()
    } else {
        0.0
    };
    let crack_time_seconds = 2f64.powf(entropy_bits) / ASSUMED_GUESSES_PER_SECOND;

    let lowercase = password.to_lowercase();
    let mut feedback = Vec::new();
    let mut penalty: u8 = 0;

    if COMMON_PASSWORDS.contains(lowercase.as_str()) {
        penalty = penalty.saturating_add(4);
        feedback.push("this is one of the most commonly used passwords".to_string());
    }

    let sequential = count_sequential_runs(password);
    if sequential > 0 {
        penalty = penalty.saturating_add(sequential.min(4) as u8);
        feedback.push("avoid sequences like \"abc\" or \"321\"".to_string());
    }

    let repeats = count_repeat_runs(password);
    if repeats > 0 {
        penalty = penalty.saturating_add(repeats.min(4) as u8);
        feedback.push("avoid repeated characters like \"aaa\"".to_string());
    }

    let keyboard = count_keyboard_patterns(&lowercase);
    if keyboard > 0 {
        penalty = penalty.saturating_add(keyboard.min(4) as u8);
        feedback.push("avoid keyboard patterns like \"qwerty\"".to_string());
    }

    let base_score = entropy_to_base_score(entropy_bits);
    let score = base_score.saturating_sub(penalty);

    if score < 3 && feedback.is_empty() {
        feedback.push("add more character variety or length".to_string());
    }

    PasswordScore {
        score,
        entropy_bits,
        crack_time_seconds,
        length_issue,
        feedback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_too_short_password() {
        let score = score_password("Abc1!");
        assert_eq!(score.length_issue, Some(PasswordIssue::TooShort));
    }

    #[test]
    fn common_password_scores_zero_even_if_long_enough() {
        let score = score_password("password1");
        assert_eq!(score.score, 0);
        assert!(score.feedback.iter().any(|f| f.contains("commonly used")));
    }

    #[test]
    fn long_varied_password_scores_high() {
        let score = score_password("Tr4ck!ngHe$itance9xQ");
        assert!(score.score >= 3, "expected high score, got {}", score.score);
        assert!(score.entropy_bits > 60.0);
    }

    #[test]
    fn sequential_and_repeat_runs_lower_the_score() {
        let clean = score_password("xQ9#vLmZ8kP2");
        let sequential = score_password("xQ9#abcZ8kP2");
        assert!(sequential.score <= clean.score);
    }

    #[test]
    fn keyboard_pattern_is_penalized() {
        let score = score_password("qwerty123456");
        assert!(score.feedback.iter().any(|f| f.contains("keyboard")));
    }

    #[test]
    fn score_never_goes_below_zero() {
        let score = score_password("passwordpasswordpassword");
        assert_eq!(score.score, 0);
    }
}
