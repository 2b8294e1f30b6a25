//! Clock and remaining-time arithmetic.
//!
//! All instants are Unix milliseconds (UTC). Nothing in here holds state
//! except the [`Clock`] implementations themselves.

use std::fmt;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One minute in milliseconds.
pub const MINUTE_MS: i64 = 60 * 1000;
/// One hour in milliseconds.
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
/// One day in milliseconds.
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Days per display month. Months are a fixed 30 days, not calendar months.
const DAYS_PER_MONTH: i64 = 30;

/// A source of "now".
///
/// The engine never reads the wall clock directly so tests can drive time.
pub trait Clock: Send + Sync {
    /// Current instant in Unix milliseconds.
    fn now_millis(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Human-readable breakdown of a remaining duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Remaining {
    pub months: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
}

impl Remaining {
    /// Break a duration in milliseconds into months/days/hours/minutes.
    ///
    /// Non-positive durations yield all zeros.
    pub fn from_millis(millis: i64) -> Self {
        if millis <= 0 {
            return Self::default();
        }

        let whole_days = millis / DAY_MS;
        let rest = millis % DAY_MS;

        Self {
            months: whole_days / DAYS_PER_MONTH,
            days: whole_days % DAYS_PER_MONTH,
            hours: rest / HOUR_MS,
            minutes: (rest % HOUR_MS) / MINUTE_MS,
        }
    }

    /// True when every component is zero.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} months {} days {} hours {} minutes",
            self.months, self.days, self.hours, self.minutes
        )
    }
}

/// Time left between `now` and `expires_at`.
pub fn remaining(expires_at: i64, now: i64) -> Remaining {
    Remaining::from_millis(expires_at.saturating_sub(now))
}

/// Format an instant as `HH:MM DD/MM/YYYY UTC`.
///
/// Instants outside chrono's representable range fall back to the raw value.
pub fn format_instant(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(at) => at.format("%H:%M %d/%m/%Y UTC").to_string(),
        None => format!("{}ms", millis),
    }
}

/// Convert whole days to milliseconds.
pub const fn days(n: i64) -> i64 {
    n * DAY_MS
}

/// Convert whole hours to milliseconds.
pub const fn hours(n: i64) -> i64 {
    n * HOUR_MS
}
