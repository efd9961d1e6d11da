//! Small helpers shared by the token ledgers and login flows.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Create a new opaque token (refresh, re-auth, verification). The raw value
/// is only returned to the caller; the database stores a hash.
pub(crate) fn generate_opaque_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate opaque token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash an opaque token so raw values never touch the database.
/// The hash is used for lookups when the token is presented again.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Constant-time hash comparison.
pub(crate) fn hashes_match(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Coarse device class derived from the user agent, for audit metadata.
pub(crate) fn device_class(user_agent: Option<&str>) -> &'static str {
    let Some(ua) = user_agent else {
        return "unknown";
    };
    let ua = ua.to_ascii_lowercase();
    if ua.contains("mobile") || ua.contains("android") || ua.contains("iphone") {
        "mobile"
    } else if ua.contains("curl") || ua.contains("wget") || ua.contains("http") {
        "cli"
    } else {
        "desktop"
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn opaque_tokens_decode_to_32_bytes() {
        let decoded_len = generate_opaque_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn opaque_tokens_are_unique() {
        assert_ne!(
            generate_opaque_token().unwrap(),
            generate_opaque_token().unwrap()
        );
    }

    #[test]
    fn hash_token_stable() {
        let first = hash_token("token");
        let second = hash_token("token");
        let different = hash_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(first.len(), 32);
    }

    #[test]
    fn hashes_match_compares_exact_bytes() {
        let a = hash_token("token");
        let b = hash_token("token");
        let c = hash_token("other");
        assert!(hashes_match(&a, &b));
        assert!(!hashes_match(&a, &c));
        assert!(!hashes_match(&a, &a[..16]));
    }

    #[test]
    fn device_class_buckets() {
        assert_eq!(device_class(None), "unknown");
        assert_eq!(
            device_class(Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)")),
            "mobile"
        );
        assert_eq!(device_class(Some("curl/8.4.0")), "cli");
        assert_eq!(
            device_class(Some("Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0")),
            "desktop"
        );
    }
}
