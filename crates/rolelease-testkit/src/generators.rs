//! Proptest generators for property-based testing.

use proptest::prelude::*;

use rolelease_core::{DAY_MS, HOUR_MS};

/// One step of a randomized engine script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Grant or renew the subject at index `.0`.
    Grant(u8),
    /// Revoke the subject at index `.0`.
    Revoke(u8),
    /// Let time pass (milliseconds).
    Advance(i64),
}

/// A subject index from a small pool so keys collide often.
pub fn subject_index(pool: u8) -> impl Strategy<Value = u8> {
    0..pool.max(1)
}

/// A time step between one hour and twenty days.
pub fn time_step() -> impl Strategy<Value = i64> {
    HOUR_MS..=20 * DAY_MS
}

/// One script step over `pool` subjects.
pub fn step(pool: u8) -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => subject_index(pool).prop_map(Step::Grant),
        1 => subject_index(pool).prop_map(Step::Revoke),
        3 => time_step().prop_map(Step::Advance),
    ]
}

/// A script of up to `max_len` steps.
pub fn script(pool: u8, max_len: usize) -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(step(pool), 1..=max_len.max(1))
}

/// Renewal offsets within an active grant of `duration_ms`.
pub fn renewal_offset(duration_ms: i64) -> impl Strategy<Value = i64> {
    0..duration_ms.max(1)
}
