//! Authentication and session handlers.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;

use super::types::{
    ChangePasswordRequest, LoginRequest, LoginResponse, LogoutAllRequest, LogoutRequest,
    OAuthCallbackRequest, OAuthStateRequest, OAuthStateResponse, PasswordResetConfirmRequest,
    PasswordResetRequest, ReauthRequest, ReauthResponse, RefreshRequest, RegisterRequest,
    RegisterResponse, SessionBody, TokenBody, VerifyEmailRequest,
};
use super::{client_info, require_auth, ApiError};
use crate::api::AppState;
use crate::auth::types::{LoginOutcome, OAuthOutcome};
use crate::auth::utils::{normalize_email, valid_email};
use crate::error::AuthError;
use crate::oauth::{state::OAuthFlow, OAuthProfile};

fn login_response(outcome: LoginOutcome) -> LoginResponse {
    match outcome {
        LoginOutcome::TwoFactorRequired { identity_id } => LoginResponse {
            two_factor_required: true,
            sub: Some(identity_id),
            tokens: None,
        },
        LoginOutcome::LoggedIn(issued) => LoginResponse {
            two_factor_required: false,
            sub: None,
            tokens: Some(TokenBody::from(*issued)),
        },
    }
}

pub async fn register(
    state: Extension<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    if !valid_email(&normalize_email(&request.email)) {
        let body = json!({"error": "invalid_email", "message": "invalid email address"});
        return Ok((StatusCode::BAD_REQUEST, Json(body)).into_response());
    }
    let identity_id = state.auth.register(&request.email, &request.password).await?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { identity_id })).into_response())
}

pub async fn verify_email(
    state: Extension<Arc<AppState>>,
    Json(request): Json<VerifyEmailRequest>,
) -> Result<StatusCode, ApiError> {
    state.auth.verify_email(&request.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn login(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let client = client_info(&headers);
    let outcome = state
        .auth
        .login(&request.email, &request.password, request.device_id, &client)
        .await?;
    Ok(Json(login_response(outcome)))
}

pub async fn refresh(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenBody>, ApiError> {
    let client = client_info(&headers);
    let issued = state.auth.refresh(&request.refresh_token, &client).await?;
    Ok(Json(TokenBody::from(issued)))
}

pub async fn logout(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LogoutRequest>,
) -> Result<StatusCode, ApiError> {
    let claims = require_auth(&state, &headers).await?;
    let client = client_info(&headers);
    match request.device_id {
        Some(device_id) => {
            state
                .auth
                .logout_device(claims.sub, &device_id, &client)
                .await?;
        }
        None => state.auth.logout_session(claims.sid, &client).await?,
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn logout_all(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LogoutAllRequest>,
) -> Result<StatusCode, ApiError> {
    let claims = require_auth(&state, &headers).await?;
    let client = client_info(&headers);
    let keep_session = if request.keep_current.unwrap_or(true) {
        Some(claims.sid)
    } else {
        None
    };
    state.auth.logout_all(claims.sub, keep_session, &client).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reauthenticate(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ReauthRequest>,
) -> Result<Json<ReauthResponse>, ApiError> {
    let claims = require_auth(&state, &headers).await?;
    let client = client_info(&headers);
    let grant = state
        .auth
        .reauthenticate(claims.sub, &request.password, &client)
        .await?;
    Ok(Json(ReauthResponse {
        reauth_token: grant.token,
        expires_at: grant.expires_at,
    }))
}

pub async fn change_password(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    let claims = require_auth(&state, &headers).await?;
    let client = client_info(&headers);
    state
        .auth
        .change_password(
            claims.sub,
            &request.reauth_token,
            &request.new_password,
            Some(claims.sid),
            &client,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn request_password_reset(
    state: Extension<Arc<AppState>>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<StatusCode, ApiError> {
    state.auth.request_password_reset(&request.email).await?;
    // Always 204: the caller learns nothing about account existence.
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset_password(
    state: Extension<Arc<AppState>>,
    Json(request): Json<PasswordResetConfirmRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .auth
        .reset_password(&request.token, &request.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn oauth_state(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<OAuthStateRequest>,
) -> Result<Json<OAuthStateResponse>, ApiError> {
    let signed = match request.flow.as_str() {
        "login" => state.auth.oauth_state(OAuthFlow::Login, None)?,
        "link" => {
            // Linking binds to the authenticated caller.
            let claims = require_auth(&state, &headers).await?;
            state.auth.oauth_state(OAuthFlow::Link, Some(claims.sub))?
        }
        _ => return Err(ApiError(AuthError::InvalidState)),
    };
    Ok(Json(OAuthStateResponse { state: signed }))
}

pub async fn oauth_callback(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<OAuthCallbackRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let client = client_info(&headers);
    let profile = OAuthProfile {
        provider: request.provider,
        provider_id: request.provider_id,
        email: request.email,
    };
    let outcome = state
        .auth
        .oauth_callback(&request.state, &profile, request.device_id, &client)
        .await?;
    match outcome {
        OAuthOutcome::Login(login) => Ok(Json(login_response(login))),
        OAuthOutcome::Linked { .. } => Ok(Json(LoginResponse {
            two_factor_required: false,
            sub: None,
            tokens: None,
        })),
    }
}

pub async fn sessions(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionBody>>, ApiError> {
    let claims = require_auth(&state, &headers).await?;
    let sessions = state.auth.sessions(claims.sub).await?;
    Ok(Json(sessions.into_iter().map(SessionBody::from).collect()))
}
