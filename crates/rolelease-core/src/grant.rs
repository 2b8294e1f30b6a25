//! Grant records, history entries, and the grant/renew transition.
//!
//! A [`Grant`] is the single mutable row per `(subject, kind)`. Each grant or
//! renewal also produces an immutable [`HistoryEntry`]. The transition itself
//! is pure: [`apply_grant`] takes the current row (if any) and returns the row
//! to persist plus the entry to append.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::clock::{remaining, Remaining};
use crate::error::CoreError;
use crate::types::{ContextId, EntitlementKind, GrantKey, SubjectId};

/// Input to a grant or renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRequest {
    pub subject: SubjectId,
    pub kind: EntitlementKind,
    /// Context recorded on creation. Renewals keep the original context.
    pub context: ContextId,
}

impl GrantRequest {
    pub fn new(
        subject: impl Into<SubjectId>,
        kind: impl Into<EntitlementKind>,
        context: impl Into<ContextId>,
    ) -> Self {
        Self {
            subject: subject.into(),
            kind: kind.into(),
            context: context.into(),
        }
    }

    pub fn key(&self) -> GrantKey {
        GrantKey {
            subject: self.subject.clone(),
            kind: self.kind.clone(),
        }
    }
}

/// One active (or expired but not yet revoked) entitlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub subject_id: SubjectId,
    pub entitlement_kind: EntitlementKind,
    /// When the current grant baseline was established (Unix ms).
    pub granted_at: i64,
    /// After this instant the grant is no longer valid (Unix ms).
    pub expires_at: i64,
    /// Last reminder sent since the latest grant/renewal.
    pub last_reminded_at: Option<i64>,
    pub owning_context: ContextId,
}

impl Grant {
    /// Create a fresh grant starting at `now`.
    pub fn new(request: &GrantRequest, now: i64, duration_ms: i64) -> Result<Self, CoreError> {
        if duration_ms <= 0 {
            return Err(CoreError::InvalidDuration(duration_ms));
        }

        Ok(Self {
            subject_id: request.subject.clone(),
            entitlement_kind: request.kind.clone(),
            granted_at: now,
            expires_at: now.saturating_add(duration_ms),
            last_reminded_at: None,
            owning_context: request.context.clone(),
        })
    }

    pub fn key(&self) -> GrantKey {
        GrantKey {
            subject: self.subject_id.clone(),
            kind: self.entitlement_kind.clone(),
        }
    }

    /// A grant is active while `expires_at > now`.
    pub fn is_active(&self, now: i64) -> bool {
        self.expires_at > now
    }

    pub fn remaining(&self, now: i64) -> Remaining {
        remaining(self.expires_at, now)
    }

    /// Whether the sweep should send a reminder for this grant at `now`.
    ///
    /// Due when `0 < remaining < threshold` and no reminder was sent within
    /// the last `interval_ms`.
    pub fn reminder_due(&self, now: i64, threshold_ms: i64, interval_ms: i64) -> bool {
        let left = self.expires_at.saturating_sub(now);
        if left <= 0 || left >= threshold_ms {
            return false;
        }

        match self.last_reminded_at {
            None => true,
            Some(at) => now.saturating_sub(at) >= interval_ms,
        }
    }
}

/// Kind of history action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Create,
    Renew,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Create => "create",
            HistoryAction::Renew => "renew",
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(HistoryAction::Create),
            "renew" => Ok(HistoryAction::Renew),
            other => Err(CoreError::UnknownAction(other.to_string())),
        }
    }
}

/// Immutable audit record of one grant or renewal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub subject_id: SubjectId,
    pub entitlement_kind: EntitlementKind,
    pub action: HistoryAction,
    /// Instant of the action (Unix ms).
    pub granted_at: i64,
    /// Expiration resulting from the action (Unix ms).
    pub expires_at: i64,
    pub owning_context: ContextId,
}

/// Result of [`apply_grant`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Row to persist.
    pub grant: Grant,
    /// Entry to append to the history log.
    pub entry: HistoryEntry,
}

impl Transition {
    pub fn action(&self) -> HistoryAction {
        self.entry.action
    }
}

/// Compute the grant/renew transition.
///
/// An active `existing` row is extended from its current `expires_at`, so
/// unexpired time accumulates. A missing or expired row is replaced by a fresh
/// grant starting at `now`.
pub fn apply_grant(
    existing: Option<&Grant>,
    request: &GrantRequest,
    now: i64,
    duration_ms: i64,
) -> Result<Transition, CoreError> {
    if duration_ms <= 0 {
        return Err(CoreError::InvalidDuration(duration_ms));
    }

    let (grant, action) = match existing {
        Some(current) if current.is_active(now) => {
            let mut renewed = current.clone();
            renewed.expires_at = current.expires_at.saturating_add(duration_ms);
            renewed.last_reminded_at = None;
            (renewed, HistoryAction::Renew)
        }
        _ => (Grant::new(request, now, duration_ms)?, HistoryAction::Create),
    };

    let entry = HistoryEntry {
        subject_id: grant.subject_id.clone(),
        entitlement_kind: grant.entitlement_kind.clone(),
        action,
        granted_at: now,
        expires_at: grant.expires_at,
        owning_context: grant.owning_context.clone(),
    };

    Ok(Transition { grant, entry })
}
