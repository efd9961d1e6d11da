//! Database helpers for the step-up ledger.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::Instrument;
use uuid::Uuid;

pub(crate) async fn insert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    token_hash: &[u8],
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        INSERT INTO reauth_tokens (identity_id, token_hash, created_at, expires_at)
        VALUES ($1, $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity_id)
        .bind(token_hash)
        .bind(now)
        .bind(expires_at)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert reauth token")?;
    Ok(())
}

/// Fetch the stored hash for a live (unrevoked, unexpired) token matching the
/// presented hash.
pub(crate) async fn fetch_live(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    token_hash: &[u8],
    now: DateTime<Utc>,
) -> Result<Option<Vec<u8>>> {
    let query = r"
        SELECT token_hash
        FROM reauth_tokens
        WHERE identity_id = $1
          AND token_hash = $2
          AND revoked = FALSE
          AND expires_at > $3
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identity_id)
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lookup reauth token")?;
    Ok(row.map(|row| row.get("token_hash")))
}

/// Revoke every token for the identity, live or not.
pub(crate) async fn revoke_all(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
) -> Result<u64> {
    let query = "UPDATE reauth_tokens SET revoked = TRUE WHERE identity_id = $1 AND revoked = FALSE";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(identity_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to revoke reauth tokens")?;
    Ok(result.rows_affected())
}
