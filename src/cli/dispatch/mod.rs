//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration.

use anyhow::{Context, Result};
use secrecy::SecretString;

use crate::cli::actions::Action;
use crate::cli::commands;
use crate::cli::globals::ServerOptions;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let token_secret = matches
        .get_one::<String>(commands::ARG_TOKEN_SECRET)
        .cloned()
        .context("missing required argument: --token-secret")?;
    let state_secret = matches
        .get_one::<String>(commands::ARG_STATE_SECRET)
        .cloned()
        .context("missing required argument: --state-secret")?;
    let totp_issuer = matches
        .get_one::<String>(commands::ARG_TOTP_ISSUER)
        .cloned()
        .unwrap_or_else(|| "Warden".to_string());
    let access_token_ttl_seconds = matches
        .get_one::<i64>(commands::ARG_ACCESS_TTL)
        .copied()
        .unwrap_or(1800);
    let refresh_token_ttl_seconds = matches
        .get_one::<i64>(commands::ARG_REFRESH_TTL)
        .copied()
        .unwrap_or(172_800);
    let outbox_poll_seconds = matches
        .get_one::<u64>(commands::ARG_OUTBOX_POLL)
        .copied()
        .unwrap_or(5);

    Ok(Action::Server(Box::new(ServerOptions {
        port,
        dsn: SecretString::from(dsn),
        token_secret: SecretString::from(token_secret),
        state_secret: SecretString::from(state_secret),
        totp_issuer,
        access_token_ttl_seconds,
        refresh_token_ttl_seconds,
        outbox_poll_seconds,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_builds_server_action() {
        let matches = commands::new()
            .try_get_matches_from(vec![
                "warden",
                "--dsn",
                "postgres://localhost/warden",
                "--token-secret",
                "t",
                "--state-secret",
                "s",
                "--port",
                "9000",
            ])
            .unwrap();
        let Action::Server(options) = handler(&matches).unwrap();
        assert_eq!(options.port, 9000);
        assert_eq!(options.totp_issuer, "Warden");
        assert_eq!(options.outbox_poll_seconds, 5);
    }
}
