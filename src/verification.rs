//! Email-verification and password-reset tokens.
//!
//! Both flows share one ledger of hashed single-use tokens, distinguished by
//! purpose. The raw token only ever travels inside the emailed link.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::utils::{generate_opaque_token, hash_token};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TokenPurpose {
    VerifyEmail,
    PasswordReset,
}

impl TokenPurpose {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::VerifyEmail => "verify_email",
            Self::PasswordReset => "password_reset",
        }
    }
}

/// Issue a fresh token for the identity, returning the raw value for the
/// emailed link. Prior unconsumed tokens of the same purpose are invalidated.
pub(crate) async fn issue(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    purpose: TokenPurpose,
    now: DateTime<Utc>,
    ttl_seconds: i64,
) -> Result<String> {
    let query = r"
        UPDATE verification_tokens
        SET consumed_at = $3
        WHERE identity_id = $1
          AND purpose = $2
          AND consumed_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity_id)
        .bind(purpose.as_str())
        .bind(now)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to invalidate prior verification tokens")?;

    let token = generate_opaque_token()?;
    let expires_at = now + Duration::seconds(ttl_seconds);

    let query = r"
        INSERT INTO verification_tokens (identity_id, purpose, token_hash, created_at, expires_at)
        VALUES ($1, $2, $3, $4, $5)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity_id)
        .bind(purpose.as_str())
        .bind(hash_token(&token))
        .bind(now)
        .bind(expires_at)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert verification token")?;

    Ok(token)
}

/// Consume a presented token if still valid; returns the owning identity.
/// A single conditional update makes consumption race-free.
pub(crate) async fn consume(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    raw_token: &str,
    purpose: TokenPurpose,
    now: DateTime<Utc>,
) -> Result<Option<Uuid>> {
    let query = r"
        UPDATE verification_tokens
        SET consumed_at = $3
        WHERE token_hash = $1
          AND purpose = $2
          AND consumed_at IS NULL
          AND expires_at > $3
        RETURNING identity_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(hash_token(raw_token))
        .bind(purpose.as_str())
        .bind(now)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume verification token")?;

    Ok(row.map(|row| row.get("identity_id")))
}

#[cfg(test)]
mod tests {
    use super::TokenPurpose;

    #[test]
    fn purposes_have_stable_names() {
        assert_eq!(TokenPurpose::VerifyEmail.as_str(), "verify_email");
        assert_eq!(TokenPurpose::PasswordReset.as_str(), "password_reset");
    }
}
