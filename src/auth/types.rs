//! Outcome and input types for the orchestrated flows.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::utils::device_class;
use crate::twofactor::FactorKind;

/// Client metadata derived from the transport, carried into sessions and the
/// audit trail.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    #[must_use]
    pub fn device_class(&self) -> &'static str {
        device_class(self.user_agent.as_deref())
    }
}

/// A freshly minted access/refresh pair plus the minimal profile the client
/// needs to bootstrap.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub identity_id: Uuid,
    pub session_id: Uuid,
    pub device_id: String,
    pub email: String,
    pub permissions: Vec<String>,
}

/// What a credential check produced: tokens, or a demand for the second
/// factor. No token material exists in the second case.
#[derive(Debug)]
pub enum LoginOutcome {
    LoggedIn(Box<IssuedTokens>),
    TwoFactorRequired { identity_id: Uuid },
}

/// A staged two-factor enrollment, awaiting confirmation.
#[derive(Debug, Clone)]
pub struct EnrollmentStarted {
    pub factor: FactorKind,
    /// `otpauth://` URL for TOTP; absent for the email factor, whose code
    /// went out by email.
    pub provisioning_url: Option<String>,
}

/// Result of a verified OAuth callback.
#[derive(Debug)]
pub enum OAuthOutcome {
    /// Login flow: tokens or a two-factor demand, same as password login.
    Login(LoginOutcome),
    /// Link flow: the provider identity now points at this account.
    Linked { identity_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_info_device_class_follows_user_agent() {
        let client = ClientInfo {
            ip: Some("1.2.3.4".to_string()),
            user_agent: Some("curl/8.4.0".to_string()),
        };
        assert_eq!(client.device_class(), "cli");
        assert_eq!(ClientInfo::default().device_class(), "unknown");
    }
}
