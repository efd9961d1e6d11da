//! Handler modules and shared request plumbing.

pub mod auth;
pub mod health;
pub mod twofactor;
pub(crate) mod types;

use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::api::AppState;
use crate::auth::types::ClientInfo;
use crate::error::AuthError;
use crate::tokens::AccessClaims;

/// Engine error wrapped for transport.
pub struct ApiError(pub AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AuthError::InvalidCredentials
            | AuthError::Unauthorized
            | AuthError::TokenExpiredOrRevoked => StatusCode::UNAUTHORIZED,
            AuthError::AccountNotUsable(_) => StatusCode::FORBIDDEN,
            AuthError::TooManyAttempts(_) | AuthError::OtpLocked => StatusCode::TOO_MANY_REQUESTS,
            AuthError::InvalidTwoFactorCode | AuthError::InvalidState => StatusCode::BAD_REQUEST,
            AuthError::TwoFactorAlreadyEnabled | AuthError::Conflict(_) => StatusCode::CONFLICT,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self.0 {
            // Never leak internals to the caller.
            AuthError::Internal(err) => {
                error!("internal error: {err:#}");
                "internal server error".to_string()
            }
            err => err.to_string(),
        };

        (status, Json(json!({"error": self.0.code(), "message": message}))).into_response()
    }
}

/// Extract a client IP for sessions and audit from common proxy headers.
pub(crate) fn client_info(headers: &HeaderMap) -> ClientInfo {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let ip = forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    });
    let user_agent = headers
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    ClientInfo { ip, user_agent }
}

/// Require a valid bearer token; returns the verified claims.
pub(crate) async fn require_auth(
    state: &Arc<AppState>,
    headers: &HeaderMap,
) -> Result<AccessClaims, ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(ApiError(AuthError::Unauthorized))?;
    state.auth.verify_access(token).await.map_err(ApiError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_info_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        headers.insert("user-agent", HeaderValue::from_static("curl/8.4.0"));
        let client = client_info(&headers);
        assert_eq!(client.ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(client.user_agent.as_deref(), Some("curl/8.4.0"));
    }

    #[test]
    fn client_info_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        let client = client_info(&headers);
        assert_eq!(client.ip.as_deref(), Some("9.9.9.9"));
        assert_eq!(client.user_agent, None);
    }

    #[test]
    fn client_info_empty_when_missing() {
        let client = client_info(&HeaderMap::new());
        assert_eq!(client.ip, None);
        assert_eq!(client.user_agent, None);
    }
}
