//! Access tokens.
//!
//! Short-lived HS256 tokens whose signing key is the server secret
//! concatenated with the identity's rotating secret. Verification always
//! re-derives the key from the current row value, so rotating the identity
//! secret (on any password change) invalidates every outstanding token at
//! once. No cache of old keys exists anywhere.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{AuthError, AuthResult};
use crate::identity::IdentityRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Identity id.
    pub sub: Uuid,
    /// Session id the token was minted under.
    pub sid: Uuid,
    pub email: String,
    pub permissions: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

fn signing_key(server_secret: &str, identity_secret: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(server_secret.len() + identity_secret.len());
    key.extend_from_slice(server_secret.as_bytes());
    key.extend_from_slice(identity_secret.as_bytes());
    key
}

/// Mint an access token for an identity under a session.
pub(crate) fn mint(
    config: &EngineConfig,
    identity: &IdentityRecord,
    session_id: Uuid,
    now_timestamp: i64,
) -> AuthResult<String> {
    let claims = AccessClaims {
        sub: identity.id,
        sid: session_id,
        email: identity.email.clone(),
        permissions: identity.permissions.clone(),
        iat: now_timestamp,
        exp: now_timestamp + config.access_token_ttl_seconds(),
        iss: config.token_issuer().to_string(),
    };
    let key = signing_key(config.token_secret(), &identity.secret);
    encode(&Header::default(), &claims, &EncodingKey::from_secret(&key))
        .map_err(|err| AuthError::Internal(anyhow::anyhow!("failed to sign access token: {err}")))
}

/// Verify a token against the identity's *current* secret.
pub(crate) fn verify(
    config: &EngineConfig,
    token: &str,
    identity_secret: &str,
) -> AuthResult<AccessClaims> {
    let mut validation = Validation::default();
    validation.set_issuer(&[config.token_issuer()]);
    let key = signing_key(config.token_secret(), identity_secret);
    decode::<AccessClaims>(token, &DecodingKey::from_secret(&key), &validation)
        .map(|data| data.claims)
        .map_err(|_| AuthError::Unauthorized)
}

/// Pull the subject out of a token without verifying it, so the caller can
/// fetch the identity whose current secret completes the key. Never treat
/// the result as authenticated.
pub(crate) fn extract_subject(token: &str) -> Option<Uuid> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.set_required_spec_claims::<&str>(&[]);
    validation.iss = None;

    decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AccountStatus;
    use secrecy::SecretString;

    fn config() -> EngineConfig {
        EngineConfig::new(
            SecretString::from("server-secret".to_string()),
            SecretString::from("state-secret".to_string()),
        )
    }

    fn identity(secret: &str) -> IdentityRecord {
        IdentityRecord {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            password_hash: None,
            secret: secret.to_string(),
            status: AccountStatus::Active,
            permissions: vec!["documents:read".to_string()],
        }
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    #[test]
    fn round_trip_with_current_secret() {
        let identity = identity("secret-v1");
        let session = Uuid::new_v4();
        let token = mint(&config(), &identity, session, now()).unwrap();
        let claims = verify(&config(), &token, "secret-v1").unwrap();
        assert_eq!(claims.sub, identity.id);
        assert_eq!(claims.sid, session);
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.permissions, vec!["documents:read".to_string()]);
    }

    #[test]
    fn rotating_identity_secret_invalidates_token() {
        let identity = identity("secret-v1");
        let token = mint(&config(), &identity, Uuid::new_v4(), now()).unwrap();
        assert!(matches!(
            verify(&config(), &token, "secret-v2"),
            Err(AuthError::Unauthorized)
        ));
    }

    #[test]
    fn different_server_secret_invalidates_token() {
        let identity = identity("secret-v1");
        let token = mint(&config(), &identity, Uuid::new_v4(), now()).unwrap();
        let other = EngineConfig::new(
            SecretString::from("another-server-secret".to_string()),
            SecretString::from("state-secret".to_string()),
        );
        assert!(matches!(
            verify(&other, &token, "secret-v1"),
            Err(AuthError::Unauthorized)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let identity = identity("secret-v1");
        // Minted far enough in the past that exp (iat + 30m) has passed.
        let token = mint(&config(), &identity, Uuid::new_v4(), now() - 3600).unwrap();
        assert!(matches!(
            verify(&config(), &token, "secret-v1"),
            Err(AuthError::Unauthorized)
        ));
    }

    #[test]
    fn extract_subject_works_without_verification() {
        let identity = identity("secret-v1");
        let token = mint(&config(), &identity, Uuid::new_v4(), now()).unwrap();
        assert_eq!(extract_subject(&token), Some(identity.id));
        assert_eq!(extract_subject("garbage"), None);
    }

    #[test]
    fn garbage_token_is_unauthorized() {
        assert!(matches!(
            verify(&config(), "garbage", "secret-v1"),
            Err(AuthError::Unauthorized)
        ));
    }
}
