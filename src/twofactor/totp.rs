//! TOTP factor backend (RFC 6238, SHA-1, 6 digits, 30-second steps).

use anyhow::{anyhow, Result};
use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
/// Accept one step of clock skew in either direction.
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

/// Generate a fresh base32 shared secret for enrollment.
pub(crate) fn generate_secret() -> Result<String> {
    match Secret::generate_secret().to_encoded() {
        Secret::Encoded(encoded) => Ok(encoded),
        Secret::Raw(_) => Err(anyhow!("failed to encode totp secret")),
    }
}

fn build(secret_base32: &str, issuer: Option<&str>, account: &str) -> Result<TOTP> {
    let secret = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|err| anyhow!("invalid totp secret: {err:?}"))?;
    TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        SKEW,
        STEP_SECONDS,
        secret,
        issuer.map(ToString::to_string),
        account.to_string(),
    )
    .map_err(|err| anyhow!("totp init error: {err}"))
}

/// Provisioning payload for authenticator apps (`otpauth://` URL).
pub(crate) fn provisioning_url(secret_base32: &str, issuer: &str, account: &str) -> Result<String> {
    let totp = build(secret_base32, Some(issuer), account)?;
    Ok(totp.get_url())
}

/// Check a code at the given Unix timestamp. Malformed secrets verify false.
pub(crate) fn verify(secret_base32: &str, code: &str, timestamp: u64) -> bool {
    build(secret_base32, None, "account")
        .map(|totp| totp.check(code, timestamp))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "JBSWY3DPEHPK3PXP";
    const T0: u64 = 1_700_000_000;

    fn code_at(timestamp: u64) -> String {
        build(SECRET, None, "account").unwrap().generate(timestamp)
    }

    #[test]
    fn generated_secrets_are_base32_and_unique() {
        let first = generate_secret().unwrap();
        let second = generate_secret().unwrap();
        assert_ne!(first, second);
        assert!(first
            .chars()
            .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c)));
    }

    #[test]
    fn provisioning_url_carries_issuer_and_account() {
        let url = provisioning_url(SECRET, "Warden", "alice@example.com").unwrap();
        assert!(url.starts_with("otpauth://totp/"));
        assert!(url.contains("Warden"));
        assert!(url.contains("secret="));
    }

    #[test]
    fn current_code_verifies() {
        assert!(verify(SECRET, &code_at(T0), T0));
    }

    #[test]
    fn adjacent_step_is_accepted() {
        // Skew of one step in either direction.
        assert!(verify(SECRET, &code_at(T0), T0 + STEP_SECONDS));
        assert!(verify(SECRET, &code_at(T0 + STEP_SECONDS), T0));
    }

    #[test]
    fn distant_step_is_rejected() {
        assert!(!verify(SECRET, &code_at(T0), T0 + 3 * STEP_SECONDS));
    }

    #[test]
    fn wrong_code_is_rejected() {
        let wrong = if code_at(T0) == "000000" { "111111" } else { "000000" };
        assert!(!verify(SECRET, wrong, T0));
    }

    #[test]
    fn malformed_secret_verifies_false() {
        assert!(!verify("not base32!!", "123456", T0));
    }
}
