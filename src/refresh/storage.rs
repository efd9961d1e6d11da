//! Database helpers for the refresh token ledger.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::Instrument;
use uuid::Uuid;

use super::{ConsumeFailure, RotatedSession};

pub(crate) async fn insert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    session_id: Uuid,
    token_hash: &[u8],
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        INSERT INTO refresh_tokens (session_id, token_hash, created_at, expires_at)
        VALUES ($1, $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session_id)
        .bind(token_hash)
        .bind(now)
        .bind(expires_at)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert refresh token")?;
    Ok(())
}

/// Look up a token by hash and revoke it if still live. The revocation is a
/// conditional update, so two concurrent consumers of the same token resolve
/// to exactly one `Ok` and one `Replayed`.
pub(crate) async fn consume(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    token_hash: &[u8],
    now: DateTime<Utc>,
) -> Result<Result<RotatedSession, ConsumeFailure>> {
    let query = r"
        SELECT rt.id, rt.session_id, rt.expires_at,
               s.identity_id, s.is_active AS session_active,
               s.expires_at AS session_expires_at
        FROM refresh_tokens rt
        JOIN auth_sessions s ON s.id = rt.session_id
        WHERE rt.token_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lookup refresh token")?;

    let Some(row) = row else {
        return Ok(Err(ConsumeFailure::Missing));
    };

    let expires_at: DateTime<Utc> = row.get("expires_at");
    if expires_at <= now {
        return Ok(Err(ConsumeFailure::Expired));
    }

    let id: Uuid = row.get("id");
    let query = "UPDATE refresh_tokens SET revoked = TRUE WHERE id = $1 AND revoked = FALSE";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to revoke refresh token")?;

    if result.rows_affected() == 0 {
        return Ok(Err(ConsumeFailure::Replayed));
    }

    Ok(Ok(RotatedSession {
        session_id: row.get("session_id"),
        identity_id: row.get("identity_id"),
        session_active: row.get("session_active"),
        session_expires_at: row.get("session_expires_at"),
    }))
}

/// Revoke every live token for one session (single-device logout).
pub(crate) async fn revoke_for_session(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    session_id: Uuid,
) -> Result<u64> {
    let query = "UPDATE refresh_tokens SET revoked = TRUE WHERE session_id = $1 AND revoked = FALSE";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(session_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to revoke session refresh tokens")?;
    Ok(result.rows_affected())
}

/// Revoke every live token for an identity (logout-all), optionally sparing
/// the caller's own session.
pub(crate) async fn revoke_for_identity(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    except_session: Option<Uuid>,
) -> Result<u64> {
    let query = r"
        UPDATE refresh_tokens
        SET revoked = TRUE
        WHERE revoked = FALSE
          AND session_id IN (
              SELECT id FROM auth_sessions
              WHERE identity_id = $1
                AND ($2::uuid IS NULL OR id <> $2)
          )
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(identity_id)
        .bind(except_session)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to revoke identity refresh tokens")?;
    Ok(result.rows_affected())
}
