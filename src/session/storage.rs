//! Database helpers for device sessions.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::SessionRecord;

fn record_from_row(row: &sqlx::postgres::PgRow) -> SessionRecord {
    SessionRecord {
        id: row.get("id"),
        identity_id: row.get("identity_id"),
        device_id: row.get("device_id"),
        ip: row.get("ip"),
        user_agent: row.get("user_agent"),
        is_active: row.get("is_active"),
        expires_at: row.get("expires_at"),
    }
}

const SELECT_SESSION: &str = r"
    SELECT id, identity_id, device_id, ip, user_agent, is_active, expires_at
    FROM auth_sessions
";

/// Create the session for (identity, device), or reactivate and refresh the
/// existing row. The upsert keeps concurrent logins for the same device from
/// ever producing two rows.
pub(crate) async fn upsert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    device_id: &str,
    ip: Option<&str>,
    user_agent: Option<&str>,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<Uuid> {
    let query = r"
        INSERT INTO auth_sessions
            (identity_id, device_id, ip, user_agent, is_active, created_at, updated_at, expires_at)
        VALUES ($1, $2, $3, $4, TRUE, $5, $5, $6)
        ON CONFLICT (identity_id, device_id) DO UPDATE
        SET is_active = TRUE,
            ip = EXCLUDED.ip,
            user_agent = EXCLUDED.user_agent,
            updated_at = EXCLUDED.updated_at,
            expires_at = EXCLUDED.expires_at
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identity_id)
        .bind(device_id)
        .bind(ip)
        .bind(user_agent)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to upsert session")?;
    Ok(row.get("id"))
}

pub(crate) async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<SessionRecord>> {
    let query = format!("{SELECT_SESSION} WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch session")?;
    Ok(row.map(|row| record_from_row(&row)))
}

pub(crate) async fn find_by_device(
    pool: &PgPool,
    identity_id: Uuid,
    device_id: &str,
) -> Result<Option<SessionRecord>> {
    let query = format!("{SELECT_SESSION} WHERE identity_id = $1 AND device_id = $2");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(identity_id)
        .bind(device_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch session by device")?;
    Ok(row.map(|row| record_from_row(&row)))
}

pub(crate) async fn list_for_identity(
    pool: &PgPool,
    identity_id: Uuid,
) -> Result<Vec<SessionRecord>> {
    let query = format!("{SELECT_SESSION} WHERE identity_id = $1 ORDER BY created_at");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(identity_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list sessions")?;
    Ok(rows.iter().map(record_from_row).collect())
}

pub(crate) async fn deactivate(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    session_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = "UPDATE auth_sessions SET is_active = FALSE, updated_at = $2 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session_id)
        .bind(now)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to deactivate session")?;
    Ok(())
}

/// Deactivate every session for an identity, optionally sparing one (the
/// caller's own, during logout-all).
pub(crate) async fn deactivate_all(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    except: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<u64> {
    let query = r"
        UPDATE auth_sessions
        SET is_active = FALSE, updated_at = $3
        WHERE identity_id = $1
          AND is_active = TRUE
          AND ($2::uuid IS NULL OR id <> $2)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(identity_id)
        .bind(except)
        .bind(now)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to deactivate sessions")?;
    Ok(result.rows_affected())
}
