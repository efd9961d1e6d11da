//! Identities and the credential store.
//!
//! Passwords are Argon2id-hashed; plaintext never leaves this module's
//! verify/hash functions. Each identity carries a rotating `secret` that is
//! folded into the access-token signing key, so rotating it (on any password
//! change) invalidates every outstanding access token at once.

pub(crate) mod storage;

use anyhow::{anyhow, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use std::fmt;
use uuid::Uuid;

/// Account lifecycle state. Only `active` identities may authenticate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccountStatus {
    PendingVerification,
    Active,
    Suspended,
    Inactive,
}

impl AccountStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingVerification => "pending_verification",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Inactive => "inactive",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "pending_verification" => Some(Self::PendingVerification),
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One identity row, as the engine sees it.
#[derive(Debug, Clone)]
pub struct IdentityRecord {
    pub id: Uuid,
    pub email: String,
    /// Absent for OAuth-only identities.
    pub password_hash: Option<String>,
    /// Rotating component of the access-token signing key.
    pub secret: String,
    pub status: AccountStatus,
    pub permissions: Vec<String>,
}

/// Hash a password for storage.
pub(crate) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| anyhow!("failed to hash password"))
}

/// Verify a password against a stored hash. Malformed hashes verify as false.
pub(crate) fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// New value for the per-identity signing-key component.
pub(crate) fn generate_identity_secret() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            AccountStatus::PendingVerification,
            AccountStatus::Active,
            AccountStatus::Suspended,
            AccountStatus::Inactive,
        ] {
            assert_eq!(AccountStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(AccountStatus::from_str("deleted"), None);
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash_password("same password").unwrap();
        let second = hash_password("same password").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn malformed_hash_verifies_false() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn identity_secrets_are_unique() {
        assert_ne!(generate_identity_secret(), generate_identity_secret());
    }
}
