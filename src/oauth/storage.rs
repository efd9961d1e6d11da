//! Database helpers for provider links.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

/// An existing (provider, provider id) → identity link.
#[derive(Debug, Clone)]
pub(crate) struct OAuthLinkRecord {
    pub(crate) identity_id: Uuid,
}

pub(crate) async fn find_link(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    provider: &str,
    provider_id: &str,
) -> Result<Option<OAuthLinkRecord>> {
    let query = r"
        SELECT identity_id
        FROM oauth_links
        WHERE provider = $1 AND provider_id = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(provider)
        .bind(provider_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lookup oauth link")?;

    Ok(row.map(|row| OAuthLinkRecord {
        identity_id: row.get("identity_id"),
    }))
}

/// Create the link if it does not exist. The unique constraint on
/// (provider, provider_id) makes a second login with the same provider
/// identity a no-op rather than a duplicate.
pub(crate) async fn insert_link(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    provider: &str,
    provider_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        INSERT INTO oauth_links (identity_id, provider, provider_id, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (provider, provider_id) DO NOTHING
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity_id)
        .bind(provider)
        .bind(provider_id)
        .bind(now)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert oauth link")?;
    Ok(())
}

/// Providers linked to an identity, for account settings surfaces.
pub(crate) async fn list_for_identity(pool: &PgPool, identity_id: Uuid) -> Result<Vec<String>> {
    let query = r"
        SELECT provider
        FROM oauth_links
        WHERE identity_id = $1
        ORDER BY provider
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(identity_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list oauth links")?;
    Ok(rows.iter().map(|row| row.get("provider")).collect())
}
