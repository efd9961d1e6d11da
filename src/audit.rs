//! Append-only audit trail.
//!
//! Writes are best-effort and happen after the primary transaction commits:
//! a failed audit insert is logged and swallowed, never rolled into the flow
//! outcome.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::fmt;
use tracing::{warn, Instrument};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuditEvent {
    LoginSuccess,
    LoginFailed,
    TwoFactorFailed,
    RefreshRotated,
    RefreshReplayed,
    MfaEnabled,
    MfaDisabled,
    RecoveryCodesRegenerated,
    PasswordChanged,
    EmailVerified,
    ReauthIssued,
    LogoutSession,
    LogoutAll,
    OauthLogin,
    OauthLinked,
}

impl AuditEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginSuccess => "login_success",
            Self::LoginFailed => "login_failed",
            Self::TwoFactorFailed => "two_factor_failed",
            Self::RefreshRotated => "refresh_rotated",
            Self::RefreshReplayed => "refresh_replayed",
            Self::MfaEnabled => "mfa_enabled",
            Self::MfaDisabled => "mfa_disabled",
            Self::RecoveryCodesRegenerated => "recovery_codes_regenerated",
            Self::PasswordChanged => "password_changed",
            Self::EmailVerified => "email_verified",
            Self::ReauthIssued => "reauth_issued",
            Self::LogoutSession => "logout_session",
            Self::LogoutAll => "logout_all",
            Self::OauthLogin => "oauth_login",
            Self::OauthLinked => "oauth_linked",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit entry; `metadata` carries flow-specific structured detail.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub event: AuditEvent,
    pub actor_id: Option<Uuid>,
    pub target_id: Option<Uuid>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
}

impl AuditEntry {
    #[must_use]
    pub fn new(event: AuditEvent) -> Self {
        Self {
            event,
            actor_id: None,
            target_id: None,
            ip: None,
            user_agent: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    #[must_use]
    pub fn target(mut self, target_id: Uuid) -> Self {
        self.target_id = Some(target_id);
        self
    }

    #[must_use]
    pub fn client(mut self, ip: Option<&str>, user_agent: Option<&str>) -> Self {
        self.ip = ip.map(ToString::to_string);
        self.user_agent = user_agent.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append an entry. Failures are logged and dropped.
pub async fn record(pool: &PgPool, entry: AuditEntry, now: DateTime<Utc>) {
    let metadata = if entry.metadata.is_null() {
        "{}".to_string()
    } else {
        entry.metadata.to_string()
    };

    let query = r"
        INSERT INTO audit_log (event, actor_id, target_id, ip, user_agent, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6::jsonb, $7)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(entry.event.as_str())
        .bind(entry.actor_id)
        .bind(entry.target_id)
        .bind(entry.ip.as_deref())
        .bind(entry.user_agent.as_deref())
        .bind(metadata)
        .bind(now)
        .execute(pool)
        .instrument(span)
        .await;

    if let Err(err) = result {
        warn!(event = %entry.event, "failed to record audit entry: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_snake_case() {
        assert_eq!(AuditEvent::LoginSuccess.as_str(), "login_success");
        assert_eq!(AuditEvent::RefreshReplayed.as_str(), "refresh_replayed");
        assert_eq!(AuditEvent::MfaEnabled.as_str(), "mfa_enabled");
    }

    #[test]
    fn builder_fills_fields() {
        let actor = Uuid::new_v4();
        let entry = AuditEntry::new(AuditEvent::LoginSuccess)
            .actor(actor)
            .client(Some("1.2.3.4"), Some("curl/8"))
            .metadata(serde_json::json!({"device_class": "cli"}));
        assert_eq!(entry.actor_id, Some(actor));
        assert_eq!(entry.ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(entry.metadata["device_class"], "cli");
    }
}
