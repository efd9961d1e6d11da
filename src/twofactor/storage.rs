//! Database helpers for two-factor configuration, challenges, and recovery
//! codes.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{FactorKind, TwoFactorConfig};

/// One open email-OTP challenge.
#[derive(Debug, Clone)]
pub(crate) struct ChallengeRecord {
    pub(crate) id: Uuid,
    pub(crate) code_hash: Vec<u8>,
    pub(crate) expires_at: DateTime<Utc>,
}

pub(crate) async fn get_config(
    pool: &PgPool,
    identity_id: Uuid,
) -> Result<Option<TwoFactorConfig>> {
    let query = r"
        SELECT identity_id, enabled, factor_type, factor_data, last_changed_at
        FROM two_factor_configs
        WHERE identity_id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identity_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch two-factor config")?;

    Ok(row.map(|row| {
        let factor_type: Option<String> = row.get("factor_type");
        TwoFactorConfig {
            identity_id: row.get("identity_id"),
            enabled: row.get("enabled"),
            factor_type: factor_type.as_deref().and_then(FactorKind::from_str),
            factor_data: row.get("factor_data"),
            last_changed_at: row.get("last_changed_at"),
        }
    }))
}

/// Create the (disabled) config row at registration; idempotent.
pub(crate) async fn insert_config(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
) -> Result<()> {
    let query = r"
        INSERT INTO two_factor_configs (identity_id)
        VALUES ($1)
        ON CONFLICT (identity_id) DO NOTHING
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert two-factor config")?;
    Ok(())
}

/// Stage an enrollment: factor chosen, not yet confirmed.
pub(crate) async fn set_pending(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    factor: FactorKind,
    factor_data: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE two_factor_configs
        SET enabled = FALSE,
            factor_type = $2,
            factor_data = $3,
            last_changed_at = $4
        WHERE identity_id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity_id)
        .bind(factor.as_str())
        .bind(factor_data)
        .bind(now)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to stage two-factor enrollment")?;
    Ok(())
}

/// Freeze the confirmed factor and flip `enabled` on.
pub(crate) async fn set_enabled(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE two_factor_configs
        SET enabled = TRUE,
            last_changed_at = $2
        WHERE identity_id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity_id)
        .bind(now)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to enable two-factor")?;
    Ok(())
}

/// Clear the factor entirely (disable).
pub(crate) async fn clear(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE two_factor_configs
        SET enabled = FALSE,
            factor_type = NULL,
            factor_data = NULL,
            last_changed_at = $2
        WHERE identity_id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity_id)
        .bind(now)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to disable two-factor")?;
    Ok(())
}

/// Invalidate open challenges and store a new one.
pub(crate) async fn create_challenge(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    code_hash: &[u8],
    now: DateTime<Utc>,
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        UPDATE two_factor_challenges
        SET used = TRUE
        WHERE identity_id = $1 AND used = FALSE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to invalidate open challenges")?;

    let query = r"
        INSERT INTO two_factor_challenges (identity_id, kind, code_hash, created_at, expires_at)
        VALUES ($1, 'email', $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity_id)
        .bind(code_hash)
        .bind(now)
        .bind(now + Duration::seconds(ttl_seconds))
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert challenge")?;
    Ok(())
}

/// The newest open challenge, locked for this transaction so concurrent
/// verifications serialize on the failure counter.
pub(crate) async fn latest_open_challenge(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
) -> Result<Option<ChallengeRecord>> {
    let query = r"
        SELECT id, code_hash, expires_at
        FROM two_factor_challenges
        WHERE identity_id = $1 AND used = FALSE
        ORDER BY created_at DESC
        LIMIT 1
        FOR UPDATE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identity_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to fetch open challenge")?;

    Ok(row.map(|row| ChallengeRecord {
        id: row.get("id"),
        code_hash: row.get("code_hash"),
        expires_at: row.get("expires_at"),
    }))
}

pub(crate) async fn bump_challenge_failures(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    challenge_id: Uuid,
) -> Result<i32> {
    let query = r"
        UPDATE two_factor_challenges
        SET failed_attempts = failed_attempts + 1
        WHERE id = $1
        RETURNING failed_attempts
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(challenge_id)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to bump challenge failures")?;
    Ok(row.get("failed_attempts"))
}

pub(crate) async fn mark_challenge_used(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    challenge_id: Uuid,
) -> Result<()> {
    let query = "UPDATE two_factor_challenges SET used = TRUE WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(challenge_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to close challenge")?;
    Ok(())
}

/// Replace the identity's recovery codes with a new batch of hashes.
pub(crate) async fn replace_recovery_codes(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    code_hashes: &[Vec<u8>],
    now: DateTime<Utc>,
) -> Result<()> {
    let query = "DELETE FROM recovery_codes WHERE identity_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to delete old recovery codes")?;

    let query = r"
        INSERT INTO recovery_codes (identity_id, code_hash, created_at)
        SELECT $1, hash, $3
        FROM UNNEST($2::bytea[]) AS hash
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity_id)
        .bind(code_hashes)
        .bind(now)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert recovery codes")?;
    Ok(())
}

/// Consume a recovery code: one conditional update, single-use by
/// construction. Returns whether a live code matched.
pub(crate) async fn consume_recovery_code(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    code_hash: &[u8],
    now: DateTime<Utc>,
) -> Result<bool> {
    let query = r"
        UPDATE recovery_codes
        SET used = TRUE, used_at = $3
        WHERE identity_id = $1
          AND code_hash = $2
          AND used = FALSE
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identity_id)
        .bind(code_hash)
        .bind(now)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume recovery code")?;
    Ok(row.is_some())
}
