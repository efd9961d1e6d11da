//! Thin HTTP surface over the engine.
//!
//! Handlers translate DTOs and map engine errors to status codes; every
//! decision lives in [`crate::auth::AuthService`].

pub mod handlers;

use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Extension, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::AuthService;

pub struct AppState {
    pub auth: AuthService,
}

#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/v1/auth/register", post(handlers::auth::register))
        .route("/v1/auth/verify-email", post(handlers::auth::verify_email))
        .route("/v1/auth/login", post(handlers::auth::login))
        .route("/v1/auth/refresh", post(handlers::auth::refresh))
        .route("/v1/auth/logout", post(handlers::auth::logout))
        .route("/v1/auth/logout-all", post(handlers::auth::logout_all))
        .route("/v1/auth/reauth", post(handlers::auth::reauthenticate))
        .route("/v1/auth/password", post(handlers::auth::change_password))
        .route(
            "/v1/auth/password/reset",
            post(handlers::auth::request_password_reset),
        )
        .route(
            "/v1/auth/password/reset/confirm",
            post(handlers::auth::reset_password),
        )
        .route("/v1/auth/2fa/enable", post(handlers::twofactor::enable))
        .route("/v1/auth/2fa/confirm", post(handlers::twofactor::confirm))
        .route("/v1/auth/2fa/verify", post(handlers::twofactor::verify))
        .route("/v1/auth/2fa", delete(handlers::twofactor::disable))
        .route(
            "/v1/auth/2fa/recovery-codes",
            post(handlers::twofactor::regenerate_recovery_codes),
        )
        .route("/v1/auth/oauth/state", post(handlers::auth::oauth_state))
        .route("/v1/auth/oauth/callback", post(handlers::auth::oauth_callback))
        .route("/v1/auth/sessions", get(handlers::auth::sessions))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");
    axum::serve(listener, router(state))
        .await
        .context("server error")
}
