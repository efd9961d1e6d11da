//! Signed OAuth state tokens.
//!
//! The state token is the only integrity mechanism across the provider
//! redirect: it pins the flow (a login callback can never replay as a link
//! callback) and, for link flows, the linking user. Five-minute expiry,
//! HS256, dedicated secret.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{AuthError, AuthResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthFlow {
    Login,
    Link,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StateClaims {
    pub flow: OAuthFlow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Sign a state token for the redirect round-trip.
pub(crate) fn sign(
    config: &EngineConfig,
    clock: &Clock,
    flow: OAuthFlow,
    user_id: Option<Uuid>,
) -> AuthResult<String> {
    let now = clock.timestamp();
    let claims = StateClaims {
        flow,
        user_id,
        iat: now,
        exp: now + config.state_ttl_seconds(),
        iss: config.token_issuer().to_string(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.state_secret().as_bytes()),
    )
    .map_err(|err| AuthError::Internal(anyhow::anyhow!("failed to sign state token: {err}")))
}

/// Verify a state token from the callback. Expired, forged, and malformed
/// states all collapse into `InvalidState`.
pub(crate) fn verify(config: &EngineConfig, state: &str) -> AuthResult<StateClaims> {
    let mut validation = Validation::default();
    validation.set_issuer(&[config.token_issuer()]);
    decode::<StateClaims>(
        state,
        &DecodingKey::from_secret(config.state_secret().as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AuthError::InvalidState)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use secrecy::SecretString;

    fn config() -> EngineConfig {
        EngineConfig::new(
            SecretString::from("token-secret".to_string()),
            SecretString::from("state-secret".to_string()),
        )
    }

    #[test]
    fn round_trip_preserves_flow_and_user() {
        let clock = Clock::system();
        let user = Uuid::new_v4();
        let state = sign(&config(), &clock, OAuthFlow::Link, Some(user)).unwrap();
        let claims = verify(&config(), &state).unwrap();
        assert_eq!(claims.flow, OAuthFlow::Link);
        assert_eq!(claims.user_id, Some(user));
        assert_eq!(claims.iss, "warden");
    }

    #[test]
    fn login_state_has_no_user() {
        let state = sign(&config(), &Clock::system(), OAuthFlow::Login, None).unwrap();
        let claims = verify(&config(), &state).unwrap();
        assert_eq!(claims.flow, OAuthFlow::Login);
        assert_eq!(claims.user_id, None);
    }

    #[test]
    fn expired_state_is_rejected() {
        // Signed more than five minutes in the past.
        let clock = Clock::fixed(Utc::now() - Duration::minutes(10));
        let state = sign(&config(), &clock, OAuthFlow::Login, None).unwrap();
        assert!(matches!(
            verify(&config(), &state),
            Err(AuthError::InvalidState)
        ));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let other = EngineConfig::new(
            SecretString::from("token-secret".to_string()),
            SecretString::from("a-different-state-secret".to_string()),
        );
        let state = sign(&config(), &Clock::system(), OAuthFlow::Login, None).unwrap();
        assert!(matches!(verify(&other, &state), Err(AuthError::InvalidState)));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            verify(&config(), "not-a-jwt"),
            Err(AuthError::InvalidState)
        ));
    }
}
