//! Request and response DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::types::IssuedTokens;
use crate::session::SessionRecord;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub identity_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_id: Option<String>,
}

/// Either a token pair or a two-factor demand; never both.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub two_factor_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<Uuid>,
    #[serde(flatten)]
    pub tokens: Option<TokenBody>,
}

#[derive(Debug, Serialize)]
pub struct TokenBody {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub device_id: String,
    pub email: String,
    pub permissions: Vec<String>,
}

impl From<IssuedTokens> for TokenBody {
    fn from(issued: IssuedTokens) -> Self {
        Self {
            access_token: issued.access_token,
            refresh_token: issued.refresh_token,
            access_expires_at: issued.access_expires_at,
            refresh_expires_at: issued.refresh_expires_at,
            device_id: issued.device_id,
            email: issued.email,
            permissions: issued.permissions,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    /// Absent: log out the session behind the presented access token.
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogoutAllRequest {
    /// Keep the caller's current session alive (default true).
    pub keep_current: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ReauthRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct ReauthResponse {
    pub reauth_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub reauth_token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirmRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct TwoFactorEnableRequest {
    /// `totp` or `email_otp`.
    pub factor_type: String,
}

#[derive(Debug, Serialize)]
pub struct TwoFactorEnableResponse {
    pub factor_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TwoFactorConfirmRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct RecoveryCodesResponse {
    pub recovery_codes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TwoFactorVerifyRequest {
    pub sub: Uuid,
    pub code: String,
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthStateRequest {
    /// `login` or `link`. Link requires authentication.
    pub flow: String,
}

#[derive(Debug, Serialize)]
pub struct OAuthStateResponse {
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackRequest {
    pub state: String,
    pub provider: String,
    pub provider_id: String,
    pub email: String,
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionBody {
    pub session_id: Uuid,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
}

impl From<SessionRecord> for SessionBody {
    fn from(session: SessionRecord) -> Self {
        Self {
            session_id: session.id,
            device_id: session.device_id,
            ip: session.ip,
            user_agent: session.user_agent,
            is_active: session.is_active,
            expires_at: session.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_response_omits_tokens_when_two_factor_required() {
        let response = LoginResponse {
            two_factor_required: true,
            sub: Some(Uuid::nil()),
            tokens: None,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["two_factor_required"], true);
        assert!(value.get("access_token").is_none());
        assert!(value.get("refresh_token").is_none());
    }

    #[test]
    fn login_response_flattens_tokens() {
        let response = LoginResponse {
            two_factor_required: false,
            sub: None,
            tokens: Some(TokenBody {
                access_token: "a".to_string(),
                refresh_token: "r".to_string(),
                access_expires_at: Utc::now(),
                refresh_expires_at: Utc::now(),
                device_id: "d".to_string(),
                email: "user@example.com".to_string(),
                permissions: vec![],
            }),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["access_token"], "a");
        assert_eq!(value["refresh_token"], "r");
        assert!(value.get("sub").is_none());
    }
}
