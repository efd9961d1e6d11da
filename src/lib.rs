//! # Warden (Authentication & Session Security Engine)
//!
//! `warden` issues, rotates, and revokes credentials for web and mobile
//! clients: password and OAuth login, device-scoped sessions, single-use
//! rotating refresh tokens, TOTP/email two-factor with recovery codes,
//! brute-force lockout, and step-up re-authentication, all backed by
//! PostgreSQL and fronted by a thin HTTP surface.
//!
//! ## Token model
//!
//! - **Access tokens** are short-lived HS256 JWTs signed with the server
//!   secret concatenated with a per-identity rotating secret; rotating that
//!   secret (every password change) invalidates all outstanding access
//!   tokens instantly, because verification always re-derives the key from
//!   the current row.
//! - **Refresh, re-auth, verification, and recovery material** are opaque
//!   random values stored only as sha256 hashes, never signed or decoded.
//!   Refresh tokens are single-use: rotation revokes the presented token in
//!   a conditional update, so a captured token works at most once before
//!   the replay is detected.
//!
//! ## Consistency model
//!
//! Each orchestrated flow runs in one database transaction; decision-gating
//! reads happen inside that transaction or inside conditional updates.
//! Outbound email goes through a transactional outbox drained by a
//! background worker, so delivery can never abort a committed login. Audit
//! writes are post-commit and best-effort.

pub mod api;
pub mod attempts;
pub mod audit;
pub mod auth;
pub mod cli;
pub mod clock;
pub mod config;
pub mod email;
pub mod error;
pub mod identity;
pub mod oauth;
pub mod reauth;
pub mod refresh;
pub mod session;
pub mod tokens;
pub mod twofactor;
pub mod verification;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
