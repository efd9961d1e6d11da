//! Two-factor authentication state machine.
//!
//! Per-identity configuration moves `DISABLED → PENDING_ENABLE → ENABLED`;
//! enabling never completes without a successful confirmation code. Factor
//! backends (TOTP, email OTP) are a tagged variant dispatched through the
//! same two capabilities (start a challenge, verify a code), and recovery
//! codes provide the single-use fallback once a factor is enabled.
//!
//! Email OTP challenges live in their own table, expire after a few minutes,
//! and permanently lock after too many wrong codes; a locked challenge is
//! dead and the caller must request a new one.

pub(crate) mod otp;
pub(crate) mod recovery;
pub(crate) mod storage;
pub(crate) mod totp;

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Which second factor an identity uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FactorKind {
    Totp,
    EmailOtp,
}

impl FactorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::EmailOtp => "email_otp",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "totp" => Some(Self::Totp),
            "email_otp" => Some(Self::EmailOtp),
            _ => None,
        }
    }
}

impl fmt::Display for FactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical state derived from the stored configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TwoFactorStatus {
    Disabled,
    PendingEnable,
    Enabled,
}

/// One identity's two-factor configuration row.
#[derive(Debug, Clone)]
pub struct TwoFactorConfig {
    pub identity_id: Uuid,
    pub enabled: bool,
    pub factor_type: Option<FactorKind>,
    /// Opaque per-factor material: the base32 TOTP secret, nothing for email.
    pub factor_data: Option<String>,
    pub last_changed_at: Option<DateTime<Utc>>,
}

impl TwoFactorConfig {
    #[must_use]
    pub fn status(&self) -> TwoFactorStatus {
        if self.enabled {
            TwoFactorStatus::Enabled
        } else if self.factor_type.is_some() {
            TwoFactorStatus::PendingEnable
        } else {
            TwoFactorStatus::Disabled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool, factor_type: Option<FactorKind>) -> TwoFactorConfig {
        TwoFactorConfig {
            identity_id: Uuid::nil(),
            enabled,
            factor_type,
            factor_data: None,
            last_changed_at: None,
        }
    }

    #[test]
    fn factor_kind_round_trips() {
        assert_eq!(FactorKind::from_str("totp"), Some(FactorKind::Totp));
        assert_eq!(FactorKind::from_str("email_otp"), Some(FactorKind::EmailOtp));
        assert_eq!(FactorKind::from_str("sms"), None);
    }

    #[test]
    fn status_is_derived_from_enabled_and_factor() {
        assert_eq!(config(false, None).status(), TwoFactorStatus::Disabled);
        assert_eq!(
            config(false, Some(FactorKind::Totp)).status(),
            TwoFactorStatus::PendingEnable
        );
        assert_eq!(
            config(true, Some(FactorKind::EmailOtp)).status(),
            TwoFactorStatus::Enabled
        );
    }
}
