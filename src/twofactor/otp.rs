//! Email OTP factor backend: short-lived hashed one-time codes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

use super::storage;
use crate::auth::utils::{hash_token, hashes_match};

/// What a code check against the active challenge concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChallengeOutcome {
    Valid,
    Invalid,
    /// This wrong code was one too many; the challenge is now dead.
    Locked,
    /// No open challenge, or the open one has expired.
    Missing,
}

/// Generate a new one-time code: eight uppercase hex characters.
pub(crate) fn generate_code() -> Result<String> {
    let mut bytes = [0u8; 4];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate otp code")?;
    Ok(bytes.iter().map(|byte| format!("{byte:02X}")).collect())
}

pub(crate) fn normalize_code(input: &str) -> String {
    input.trim().to_ascii_uppercase()
}

/// Start a fresh challenge: invalidate any open one, store the hash of a new
/// code, and return the raw code for delivery.
pub(crate) async fn create_challenge(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    now: DateTime<Utc>,
    ttl_seconds: i64,
) -> Result<String> {
    let code = generate_code()?;
    storage::create_challenge(tx, identity_id, &hash_token(&code), now, ttl_seconds).await?;
    Ok(code)
}

/// Check a code against the identity's open challenge.
///
/// Wrong codes bump the challenge's failure counter; the counter reaching
/// `max_attempts` kills the challenge (`Locked`). A used or expired challenge
/// is `Missing`; the caller must request a new one.
pub(crate) async fn verify_challenge(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    code: &str,
    now: DateTime<Utc>,
    max_attempts: i32,
) -> Result<ChallengeOutcome> {
    let Some(challenge) = storage::latest_open_challenge(tx, identity_id).await? else {
        return Ok(ChallengeOutcome::Missing);
    };

    if challenge.expires_at <= now {
        return Ok(ChallengeOutcome::Missing);
    }

    let presented = hash_token(&normalize_code(code));
    if hashes_match(&challenge.code_hash, &presented) {
        storage::mark_challenge_used(tx, challenge.id).await?;
        return Ok(ChallengeOutcome::Valid);
    }

    let failures = storage::bump_challenge_failures(tx, challenge.id).await?;
    if failures >= max_attempts {
        storage::mark_challenge_used(tx, challenge.id).await?;
        return Ok(ChallengeOutcome::Locked);
    }

    Ok(ChallengeOutcome::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_eight_uppercase_hex_chars() {
        let code = generate_code().unwrap();
        assert_eq!(code.len(), 8);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn codes_are_unique() {
        assert_ne!(generate_code().unwrap(), generate_code().unwrap());
    }

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize_code(" ab12cd34 "), "AB12CD34");
    }
}
