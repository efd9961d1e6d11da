//! Injected time source.
//!
//! Every expiry and lockout computation in the engine goes through a single
//! `Clock` so tests can pin the current instant. Timestamps are always bound
//! as query parameters; the engine never relies on the database's `NOW()`
//! for validity decisions.

use chrono::{DateTime, Utc};

#[derive(Clone, Debug)]
pub struct Clock(Source);

#[derive(Clone, Debug)]
enum Source {
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    /// Wall-clock time.
    #[must_use]
    pub fn system() -> Self {
        Self(Source::System)
    }

    /// A clock pinned to `now`, for deterministic tests.
    #[must_use]
    pub fn fixed(now: DateTime<Utc>) -> Self {
        Self(Source::Fixed(now))
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self.0 {
            Source::System => Utc::now(),
            Source::Fixed(now) => now,
        }
    }

    /// Seconds since the Unix epoch, for token claims.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.now().timestamp()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_is_stable() {
        let instant = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = Clock::fixed(instant);
        assert_eq!(clock.now(), instant);
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.timestamp(), instant.timestamp());
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = Clock::system();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
