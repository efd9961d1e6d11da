//! Device-scoped sessions.
//!
//! One row per (identity, device). A device logging in again reactivates its
//! existing row instead of creating a duplicate; logout flips `is_active`
//! off, per device or across the board.

pub(crate) mod storage;

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub device_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// A session is usable while active and unexpired.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(is_active: bool, expires_in: Duration, now: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            id: Uuid::nil(),
            identity_id: Uuid::nil(),
            device_id: "device-1".to_string(),
            ip: None,
            user_agent: None,
            is_active,
            expires_at: now + expires_in,
        }
    }

    #[test]
    fn live_requires_active_and_unexpired() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert!(record(true, Duration::hours(1), now).is_live(now));
        assert!(!record(false, Duration::hours(1), now).is_live(now));
        assert!(!record(true, Duration::hours(-1), now).is_live(now));
    }
}
