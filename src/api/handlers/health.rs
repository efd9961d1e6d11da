//! Liveness/readiness probe.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use sqlx::Connection;
use std::sync::Arc;
use tracing::{error, Instrument};

use crate::api::AppState;

#[derive(Serialize, Debug)]
pub struct Health {
    name: String,
    version: String,
    database: String,
}

pub async fn health(state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let acquire_span = tracing::info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let database_ok = match state.auth.pool().acquire().instrument(acquire_span).await {
        Ok(mut conn) => {
            let ping_span =
                tracing::info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            match conn.ping().instrument(ping_span).await {
                Ok(()) => true,
                Err(error) => {
                    error!("failed to ping database: {error}");
                    false
                }
            }
        }
        Err(error) => {
            error!("failed to acquire database connection: {error}");
            false
        }
    };

    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if database_ok { "ok" } else { "unavailable" }.to_string(),
    };
    (status, Json(body))
}
