//! Server action: wire the pool, engine, outbox worker, and HTTP surface.

use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::api::{self, AppState};
use crate::auth::AuthService;
use crate::cli::globals::ServerOptions;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::email::{spawn_outbox_worker, LogEmailSender, OutboxConfig};

/// Run the API server until the process is stopped.
///
/// # Errors
/// Returns an error if the database is unreachable or the listener fails.
pub async fn run(options: ServerOptions) -> Result<()> {
    info!(?options, "starting server");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(options.dsn.expose_secret())
        .await
        .context("failed to connect to database")?;

    let config = EngineConfig::new(options.token_secret.clone(), options.state_secret.clone())
        .with_totp_issuer(options.totp_issuer.clone())
        .with_access_token_ttl_seconds(options.access_token_ttl_seconds)
        .with_refresh_token_ttl_seconds(options.refresh_token_ttl_seconds);

    let auth = AuthService::new(pool.clone(), config, Clock::system());

    let outbox_config =
        OutboxConfig::new().with_poll_interval_seconds(options.outbox_poll_seconds);
    let worker = spawn_outbox_worker(pool, Arc::new(LogEmailSender), outbox_config);

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), options.port);
    let state = Arc::new(AppState { auth });
    let result = api::serve(addr, state).await;

    worker.abort();
    result
}
