//! Two-factor enrollment and verification handlers.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use std::sync::Arc;

use super::types::{
    LoginResponse, RecoveryCodesResponse, TokenBody, TwoFactorConfirmRequest,
    TwoFactorEnableRequest, TwoFactorEnableResponse, TwoFactorVerifyRequest,
};
use super::{client_info, require_auth, ApiError};
use crate::api::AppState;
use crate::error::AuthError;
use crate::twofactor::FactorKind;

pub async fn enable(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<TwoFactorEnableRequest>,
) -> Result<Json<TwoFactorEnableResponse>, ApiError> {
    let claims = require_auth(&state, &headers).await?;
    let factor = FactorKind::from_str(&request.factor_type)
        .ok_or(ApiError(AuthError::Conflict("unsupported factor type")))?;
    let client = client_info(&headers);
    let enrollment = state
        .auth
        .enable_two_factor(claims.sub, factor, &client)
        .await?;
    Ok(Json(TwoFactorEnableResponse {
        factor_type: enrollment.factor.as_str().to_string(),
        provisioning_url: enrollment.provisioning_url,
    }))
}

pub async fn confirm(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<TwoFactorConfirmRequest>,
) -> Result<Json<RecoveryCodesResponse>, ApiError> {
    let claims = require_auth(&state, &headers).await?;
    let client = client_info(&headers);
    let recovery_codes = state
        .auth
        .confirm_two_factor(claims.sub, &request.code, &client)
        .await?;
    Ok(Json(RecoveryCodesResponse { recovery_codes }))
}

/// Complete a two-factor login. Unauthenticated by design: the caller only
/// holds the `sub` marker from the first login step.
pub async fn verify(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<TwoFactorVerifyRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let client = client_info(&headers);
    let issued = state
        .auth
        .verify_two_factor(request.sub, &request.code, request.device_id, &client)
        .await?;
    Ok(Json(LoginResponse {
        two_factor_required: false,
        sub: None,
        tokens: Some(TokenBody::from(issued)),
    }))
}

pub async fn disable(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let claims = require_auth(&state, &headers).await?;
    let client = client_info(&headers);
    state.auth.disable_two_factor(claims.sub, &client).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn regenerate_recovery_codes(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RecoveryCodesResponse>, ApiError> {
    let claims = require_auth(&state, &headers).await?;
    let client = client_info(&headers);
    let recovery_codes = state
        .auth
        .regenerate_recovery_codes(claims.sub, &client)
        .await?;
    Ok(Json(RecoveryCodesResponse { recovery_codes }))
}
