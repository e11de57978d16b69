use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Counters a host can scrape to watch the credential and token paths
/// without reaching into application logs. Registered against whatever
/// [`Registry`] the host's metrics endpoint already serves.
pub struct KodexMetrics {
    pub login_attempts_total: IntCounterVec,
    pub login_failures_total: IntCounterVec,
    pub tokens_issued_total: IntCounter,
    pub token_replays_detected_total: IntCounter,
    pub account_lockouts_total: IntCounter,
    pub password_resets_requested_total: IntCounter,
}

impl KodexMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let login_attempts_total = IntCounterVec::new(
            Opts::new("kodex_login_attempts_total", "Total login attempts"),
            &["realm"],
        )?;
        let login_failures_total = IntCounterVec::new(
            Opts::new("kodex_login_failures_total", "Total failed login attempts"),
            &["realm", "reason"],
        )?;
        let tokens_issued_total = IntCounter::new("kodex_tokens_issued_total", "Total tokens issued")?;
        let token_replays_detected_total = IntCounter::new(
            "kodex_token_replays_detected_total",
            "Total refresh-token replay detections",
        )?;
        let account_lockouts_total =
            IntCounter::new("kodex_account_lockouts_total", "Total accounts locked")?;
        let password_resets_requested_total = IntCounter::new(
            "kodex_password_resets_requested_total",
            "Total password reset requests accepted",
        )?;

        registry.register(Box::new(login_attempts_total.clone()))?;
        registry.register(Box::new(login_failures_total.clone()))?;
        registry.register(Box::new(tokens_issued_total.clone()))?;
        registry.register(Box::new(token_replays_detected_total.clone()))?;
        registry.register(Box::new(account_lockouts_total.clone()))?;
        registry.register(Box::new(password_resets_requested_total.clone()))?;

        Ok(Self {
            login_attempts_total,
            login_failures_total,
            tokens_issued_total,
            token_replays_detected_total,
            account_lockouts_total,
            password_resets_requested_total,
        })
    }
}
