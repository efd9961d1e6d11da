//! Error taxonomy for the engine.
//!
//! Every variant is terminal for the current call; nothing is retried
//! internally. Store and infrastructure failures are wrapped with context and
//! surfaced as `Internal`, which the API layer reports as a generic server
//! error without leaking details.

use thiserror::Error;

use crate::attempts::LockoutClass;
use crate::identity::AccountStatus;

/// Result type alias for engine operations.
pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown email or wrong password. Deliberately indistinguishable to the
    /// caller; the audit trail keeps the difference.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The account exists but cannot log in (pending verification, suspended,
    /// or inactive).
    #[error("account not usable: {0}")]
    AccountNotUsable(AccountStatus),

    /// Brute-force lockout is in effect; carries the lockout class so the
    /// caller can tell the user how long to wait.
    #[error("too many failed attempts, try again in {0}")]
    TooManyAttempts(LockoutClass),

    #[error("invalid two-factor code")]
    InvalidTwoFactorCode,

    /// The OTP challenge accumulated too many wrong codes and is dead; the
    /// caller must request a new one.
    #[error("challenge locked after too many failed attempts")]
    OtpLocked,

    #[error("two-factor authentication is already enabled")]
    TwoFactorAlreadyEnabled,

    /// Refresh, re-auth, verification, or recovery material that is absent,
    /// expired, already consumed, or revoked.
    #[error("token expired or revoked")]
    TokenExpiredOrRevoked,

    /// OAuth state that is expired, forged, or malformed.
    #[error("invalid state token")]
    InvalidState,

    /// Missing or garbled access token, or an operation that requires an
    /// authenticated principal it does not have.
    #[error("unauthorized")]
    Unauthorized,

    #[error("conflict: {0}")]
    Conflict(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Stable machine-readable code, used by the API layer and in logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountNotUsable(_) => "account_not_usable",
            Self::TooManyAttempts(_) => "too_many_attempts",
            Self::InvalidTwoFactorCode => "invalid_two_factor_code",
            Self::OtpLocked => "otp_locked",
            Self::TwoFactorAlreadyEnabled => "two_factor_already_enabled",
            Self::TokenExpiredOrRevoked => "token_expired_or_revoked",
            Self::InvalidState => "invalid_state",
            Self::Unauthorized => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AuthError::InvalidCredentials.code(), "invalid_credentials");
        assert_eq!(
            AuthError::TooManyAttempts(LockoutClass::FiveMinutes).code(),
            "too_many_attempts"
        );
        assert_eq!(AuthError::Conflict("email already registered").code(), "conflict");
    }

    #[test]
    fn internal_wraps_anyhow() {
        let err = AuthError::from(anyhow::anyhow!("db down"));
        assert_eq!(err.code(), "internal");
        assert_eq!(err.to_string(), "db down");
    }

    #[test]
    fn lockout_message_carries_class() {
        let err = AuthError::TooManyAttempts(LockoutClass::OneDay);
        assert!(err.to_string().contains("24 hours"));
    }
}
