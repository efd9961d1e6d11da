//! Engine configuration.
//!
//! Builder-style with sane defaults; the CLI layer fills it from environment
//! variables. Signing secrets are held as [`SecretString`] so they never show
//! up in debug output.

use secrecy::{ExposeSecret, SecretString};

use crate::attempts::LockoutClass;

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 2 * 24 * 60 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 2 * 24 * 60 * 60;
const DEFAULT_REAUTH_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_OTP_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_OTP_MAX_ATTEMPTS: i32 = 5;
const DEFAULT_RECOVERY_CODE_BATCH: usize = 10;
const DEFAULT_STATE_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_VERIFICATION_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_TOKEN_ISSUER: &str = "warden";
const DEFAULT_TOTP_ISSUER: &str = "Warden";

/// Failure-count thresholds mapped to lockout classes, highest first.
pub type EscalationTable = Vec<(u32, LockoutClass)>;

fn default_escalation_table() -> EscalationTable {
    vec![
        (15, LockoutClass::OneDay),
        (10, LockoutClass::ThirtyMinutes),
        (5, LockoutClass::FiveMinutes),
    ]
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    token_secret: SecretString,
    state_secret: SecretString,
    token_issuer: String,
    totp_issuer: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    session_ttl_seconds: i64,
    reauth_ttl_seconds: i64,
    otp_ttl_seconds: i64,
    otp_max_attempts: i32,
    recovery_code_batch: usize,
    state_ttl_seconds: i64,
    verification_ttl_seconds: i64,
    escalation_table: EscalationTable,
}

impl EngineConfig {
    /// `token_secret` signs access tokens (combined with the per-identity
    /// secret); `state_secret` signs OAuth state. Nothing else is ever signed.
    #[must_use]
    pub fn new(token_secret: SecretString, state_secret: SecretString) -> Self {
        Self {
            token_secret,
            state_secret,
            token_issuer: DEFAULT_TOKEN_ISSUER.to_string(),
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            reauth_ttl_seconds: DEFAULT_REAUTH_TTL_SECONDS,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            otp_max_attempts: DEFAULT_OTP_MAX_ATTEMPTS,
            recovery_code_batch: DEFAULT_RECOVERY_CODE_BATCH,
            state_ttl_seconds: DEFAULT_STATE_TTL_SECONDS,
            verification_ttl_seconds: DEFAULT_VERIFICATION_TTL_SECONDS,
            escalation_table: default_escalation_table(),
        }
    }

    #[must_use]
    pub fn with_token_issuer(mut self, issuer: String) -> Self {
        self.token_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reauth_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reauth_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_max_attempts(mut self, attempts: i32) -> Self {
        self.otp_max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_recovery_code_batch(mut self, batch: usize) -> Self {
        self.recovery_code_batch = batch.max(1);
        self
    }

    #[must_use]
    pub fn with_state_ttl_seconds(mut self, seconds: i64) -> Self {
        self.state_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verification_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_ttl_seconds = seconds;
        self
    }

    /// Replace the lockout escalation table. Entries are (failure count
    /// threshold, lockout class); the table is sorted highest threshold first.
    #[must_use]
    pub fn with_escalation_table(mut self, mut table: EscalationTable) -> Self {
        table.sort_by(|a, b| b.0.cmp(&a.0));
        self.escalation_table = table;
        self
    }

    pub(crate) fn token_secret(&self) -> &str {
        self.token_secret.expose_secret()
    }

    pub(crate) fn state_secret(&self) -> &str {
        self.state_secret.expose_secret()
    }

    #[must_use]
    pub fn token_issuer(&self) -> &str {
        &self.token_issuer
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn reauth_ttl_seconds(&self) -> i64 {
        self.reauth_ttl_seconds
    }

    #[must_use]
    pub fn otp_ttl_seconds(&self) -> i64 {
        self.otp_ttl_seconds
    }

    #[must_use]
    pub fn otp_max_attempts(&self) -> i32 {
        self.otp_max_attempts
    }

    #[must_use]
    pub fn recovery_code_batch(&self) -> usize {
        self.recovery_code_batch
    }

    #[must_use]
    pub fn state_ttl_seconds(&self) -> i64 {
        self.state_ttl_seconds
    }

    #[must_use]
    pub fn verification_ttl_seconds(&self) -> i64 {
        self.verification_ttl_seconds
    }

    #[must_use]
    pub fn escalation_table(&self) -> &[(u32, LockoutClass)] {
        &self.escalation_table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::new(
            SecretString::from("token-secret".to_string()),
            SecretString::from("state-secret".to_string()),
        )
    }

    #[test]
    fn defaults_match_documented_lifetimes() {
        let config = config();
        assert_eq!(config.access_token_ttl_seconds(), 30 * 60);
        assert_eq!(config.refresh_token_ttl_seconds(), 2 * 24 * 60 * 60);
        assert_eq!(config.reauth_ttl_seconds(), 5 * 60);
        assert_eq!(config.otp_ttl_seconds(), 5 * 60);
        assert_eq!(config.otp_max_attempts(), 5);
        assert_eq!(config.recovery_code_batch(), 10);
        assert_eq!(config.state_ttl_seconds(), 5 * 60);
        assert_eq!(config.token_issuer(), "warden");
    }

    #[test]
    fn default_escalation_table_is_descending() {
        let config = config();
        let thresholds: Vec<u32> = config.escalation_table().iter().map(|(n, _)| *n).collect();
        assert_eq!(thresholds, vec![15, 10, 5]);
    }

    #[test]
    fn custom_escalation_table_is_sorted() {
        let config = config().with_escalation_table(vec![
            (3, LockoutClass::FiveMinutes),
            (20, LockoutClass::OneDay),
        ]);
        let thresholds: Vec<u32> = config.escalation_table().iter().map(|(n, _)| *n).collect();
        assert_eq!(thresholds, vec![20, 3]);
    }

    #[test]
    fn overrides_stick() {
        let config = config()
            .with_access_token_ttl_seconds(60)
            .with_otp_max_attempts(0)
            .with_recovery_code_batch(8);
        assert_eq!(config.access_token_ttl_seconds(), 60);
        // Caps are clamped to at least one attempt.
        assert_eq!(config.otp_max_attempts(), 1);
        assert_eq!(config.recovery_code_batch(), 8);
    }

    #[test]
    fn debug_does_not_leak_secrets() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("token-secret"));
        assert!(!rendered.contains("state-secret"));
    }
}
