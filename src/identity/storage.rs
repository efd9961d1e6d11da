//! Database helpers for identity rows.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{generate_identity_secret, AccountStatus, IdentityRecord};
use crate::auth::utils::is_unique_violation;

/// Outcome when attempting to create a new identity.
#[derive(Debug)]
pub(crate) enum InsertIdentityOutcome {
    Created(Uuid),
    Conflict,
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<IdentityRecord> {
    let status: String = row.get("status");
    let status = AccountStatus::from_str(&status)
        .with_context(|| format!("unknown account status: {status}"))?;
    Ok(IdentityRecord {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        secret: row.get("secret"),
        status,
        permissions: row.get("permissions"),
    })
}

const SELECT_IDENTITY: &str = r"
    SELECT id, email, password_hash, secret, status, permissions
    FROM identities
    WHERE deleted_at IS NULL
";

pub(crate) async fn lookup_by_email(pool: &PgPool, email: &str) -> Result<Option<IdentityRecord>> {
    let query = format!("{SELECT_IDENTITY} AND email = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup identity by email")?;
    row.map(|row| record_from_row(&row)).transpose()
}

pub(crate) async fn lookup_by_id(pool: &PgPool, id: Uuid) -> Result<Option<IdentityRecord>> {
    let query = format!("{SELECT_IDENTITY} AND id = $1");
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
        .context("failed to lookup identity by id")?;
    row.map(|row| record_from_row(&row)).transpose()
}

/// Insert a new identity. A fresh signing-key secret is generated here;
/// duplicate emails map to `Conflict` via the unique constraint.
pub(crate) async fn insert_identity(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
    password_hash: Option<&str>,
    status: AccountStatus,
    now: DateTime<Utc>,
) -> Result<InsertIdentityOutcome> {
    let query = r"
        INSERT INTO identities (email, password_hash, secret, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $5)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(password_hash)
        .bind(generate_identity_secret())
        .bind(status.as_str())
        .bind(now)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(InsertIdentityOutcome::Created(row.get("id"))),
        Err(err) if is_unique_violation(&err) => Ok(InsertIdentityOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert identity"),
    }
}

/// Swap the password hash and rotate the signing-key secret in one update,
/// killing every access token signed under the old secret.
pub(crate) async fn update_password_hash(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    password_hash: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE identities
        SET password_hash = $2,
            secret = $3,
            updated_at = $4
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .bind(password_hash)
        .bind(generate_identity_secret())
        .bind(now)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update password hash")?;
    Ok(())
}

/// Flip a pending identity to active after email verification.
pub(crate) async fn activate(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE identities
        SET status = 'active',
            email_verified_at = $2,
            updated_at = $2
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .bind(now)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to activate identity")?;
    Ok(())
}

/// Current signing-key secret for access-token verification. Always read
/// from the row; no caching, or rotation would stop being instant.
pub(crate) async fn fetch_secret(pool: &PgPool, id: Uuid) -> Result<Option<String>> {
    let query = "SELECT secret FROM identities WHERE id = $1 AND deleted_at IS NULL";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch identity secret")?;
    Ok(row.map(|row| row.get("secret")))
}

#[cfg(test)]
mod tests {
    use super::InsertIdentityOutcome;

    #[test]
    fn insert_outcome_debug_names() {
        let created = InsertIdentityOutcome::Created(uuid::Uuid::nil());
        assert!(format!("{created:?}").starts_with("Created"));
        assert_eq!(format!("{:?}", InsertIdentityOutcome::Conflict), "Conflict");
    }
}
