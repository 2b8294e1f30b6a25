//! Grant policy: the handful of constants that drive the engine.

use serde::{Deserialize, Serialize};

use crate::clock::{days, hours};
use crate::error::PolicyError;

/// Durations and limits consumed by the engine and the sweep.
///
/// Values are in whole days/hours as operators think about them; the
/// `*_ms` accessors convert for arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantPolicy {
    /// Length of one grant or renewal.
    pub grant_duration_days: u32,
    /// Reminders start once less than this much time is left.
    pub reminder_threshold_days: u32,
    /// Minimum spacing between two reminders for the same grant.
    pub reminder_interval_hours: u32,
    /// How often the reconciliation sweep runs.
    pub sweep_period_hours: u32,
    /// Attempts per collaborator call (entitlement apply/remove, notify).
    pub collaborator_attempts: u32,
}

impl Default for GrantPolicy {
    fn default() -> Self {
        Self {
            grant_duration_days: 50,
            reminder_threshold_days: 5,
            reminder_interval_hours: 24,
            sweep_period_hours: 1,
            collaborator_attempts: 3,
        }
    }
}

impl GrantPolicy {
    /// Check that every value is positive.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let fields = [
            ("grant_duration_days", self.grant_duration_days),
            ("reminder_threshold_days", self.reminder_threshold_days),
            ("reminder_interval_hours", self.reminder_interval_hours),
            ("sweep_period_hours", self.sweep_period_hours),
            ("collaborator_attempts", self.collaborator_attempts),
        ];

        for (field, value) in fields {
            if value == 0 {
                return Err(PolicyError::NotPositive(field));
            }
        }

        Ok(())
    }

    pub fn grant_duration_ms(&self) -> i64 {
        days(i64::from(self.grant_duration_days))
    }

    pub fn reminder_threshold_ms(&self) -> i64 {
        days(i64::from(self.reminder_threshold_days))
    }

    pub fn reminder_interval_ms(&self) -> i64 {
        hours(i64::from(self.reminder_interval_hours))
    }

    pub fn sweep_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.sweep_period_hours) * 3600)
    }
}
