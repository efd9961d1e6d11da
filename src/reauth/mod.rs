//! Step-up re-authentication ledger.
//!
//! A re-auth token proves a very recent password re-entry. At most one is
//! ever valid per identity: issuing revokes all predecessors, and consuming
//! one revokes the whole ledger for that identity (consume-once semantics
//! across the ledger, not just the presented token).

pub(crate) mod storage;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::auth::utils::{generate_opaque_token, hash_token, hashes_match};
use crate::error::{AuthError, AuthResult};

/// A freshly issued step-up grant, returned to the caller once.
#[derive(Debug, Clone)]
pub struct ReauthGrant {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Revoke all prior tokens for the identity and issue a fresh one.
pub(crate) async fn issue(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    now: DateTime<Utc>,
    ttl_seconds: i64,
) -> anyhow::Result<ReauthGrant> {
    storage::revoke_all(tx, identity_id).await?;

    let token = generate_opaque_token()?;
    let expires_at = now + Duration::seconds(ttl_seconds);
    storage::insert(tx, identity_id, &hash_token(&token), now, expires_at).await?;

    Ok(ReauthGrant { token, expires_at })
}

/// Validate and consume a presented token. Success revokes every token for
/// the identity; any mismatch, expiry, or prior revocation fails with
/// `TokenExpiredOrRevoked`.
pub(crate) async fn consume(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity_id: Uuid,
    raw_token: &str,
    now: DateTime<Utc>,
) -> AuthResult<()> {
    let presented = hash_token(raw_token);
    let record = storage::fetch_live(tx, identity_id, &presented, now)
        .await
        .map_err(AuthError::from)?;

    let Some(stored_hash) = record else {
        return Err(AuthError::TokenExpiredOrRevoked);
    };
    if !hashes_match(&stored_hash, &presented) {
        return Err(AuthError::TokenExpiredOrRevoked);
    }

    storage::revoke_all(tx, identity_id)
        .await
        .map_err(AuthError::from)?;
    Ok(())
}
