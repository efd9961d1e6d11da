//! Refresh token ledger.
//!
//! Tokens are opaque 32-byte random values, stored only as sha256 hashes and
//! scoped to exactly one session. Rotation-on-use is a single conditional
//! update: of two racing consumers of the same token, exactly one wins and
//! the other sees a replay.

pub(crate) mod storage;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::utils::{generate_opaque_token, hash_token};

/// Session resolved by a successful rotation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RotatedSession {
    pub(crate) session_id: Uuid,
    pub(crate) identity_id: Uuid,
    pub(crate) session_active: bool,
    pub(crate) session_expires_at: DateTime<Utc>,
}

impl RotatedSession {
    /// The owning session must itself still be live for the rotation to
    /// yield new tokens.
    pub(crate) fn session_live(&self, now: DateTime<Utc>) -> bool {
        self.session_active && self.session_expires_at > now
    }
}

/// Why a consume attempt failed, before mapping to the public error.
#[derive(Debug)]
pub(crate) enum ConsumeFailure {
    Missing,
    Expired,
    Replayed,
}

/// Mint and store a fresh refresh token for a session, returning the raw
/// value. Only the hash reaches the database.
pub(crate) async fn issue(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    session_id: Uuid,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> anyhow::Result<String> {
    let token = generate_opaque_token()?;
    let token_hash = hash_token(&token);
    storage::insert(tx, session_id, &token_hash, now, expires_at).await?;
    Ok(token)
}

/// Consume a presented token: revoke it and return its session so the caller
/// can mint a fresh pair. Absent, expired, and replayed tokens all come back
/// as a [`ConsumeFailure`]; the orchestrator maps every one of them to the
/// same public error and keeps the replay distinction for the audit trail.
pub(crate) async fn rotate(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    raw_token: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Result<RotatedSession, ConsumeFailure>> {
    let token_hash = hash_token(raw_token);
    storage::consume(tx, &token_hash, now).await
}

impl ConsumeFailure {
    pub(crate) fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_detection_flag() {
        assert!(ConsumeFailure::Replayed.is_replay());
        assert!(!ConsumeFailure::Missing.is_replay());
        assert!(!ConsumeFailure::Expired.is_replay());
    }
}
