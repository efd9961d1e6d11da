//! Database helpers for the failed-login counter.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;

use super::lockout_for;
use crate::attempts::LockoutClass;

/// Current counter state for an email, if any failures are on record.
#[derive(Debug, Clone)]
pub(crate) struct AttemptRecord {
    pub(crate) attempts: i32,
    pub(crate) blocked_until: Option<DateTime<Utc>>,
}

pub(crate) async fn fetch(pool: &PgPool, email: &str) -> Result<Option<AttemptRecord>> {
    let query = "SELECT attempts, blocked_until FROM auth_attempts WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch attempt record")?;

    Ok(row.map(|row| AttemptRecord {
        attempts: row.get("attempts"),
        blocked_until: row.get("blocked_until"),
    }))
}

/// Record one more failure and recompute `blocked_until` from the escalation
/// table. Returns the new counter value and lockout class, if any.
pub(crate) async fn record_failure(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
    ip: Option<&str>,
    now: DateTime<Utc>,
    table: &[(u32, LockoutClass)],
) -> Result<(i32, Option<LockoutClass>)> {
    let query = r"
        INSERT INTO auth_attempts (email, attempts, last_ip, updated_at)
        VALUES ($1, 1, $2, $3)
        ON CONFLICT (email) DO UPDATE
        SET attempts = auth_attempts.attempts + 1,
            last_ip = EXCLUDED.last_ip,
            updated_at = EXCLUDED.updated_at
        RETURNING attempts
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(ip)
        .bind(now)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to record login failure")?;

    let attempts: i32 = row.get("attempts");
    let class = lockout_for(u32::try_from(attempts).unwrap_or(0), table);
    let blocked_until = class.map(|class| now + class.duration());

    let query = "UPDATE auth_attempts SET blocked_until = $2 WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(blocked_until)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update lockout window")?;

    Ok((attempts, class))
}

/// Forget all failures for an email. Only the successful-authentication path
/// calls this.
pub(crate) async fn reset(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
) -> Result<()> {
    let query = "DELETE FROM auth_attempts WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to reset attempt record")?;
    Ok(())
}
