//! Message text sent through the [`NotificationSink`](crate::NotificationSink).

use rolelease_core::{format_instant, Grant, Remaining};

pub fn granted(grant: &Grant, now: i64) -> String {
    format!(
        "Granted {kind} to {subject} at {at}. Remaining: {left}.",
        kind = grant.entitlement_kind,
        subject = grant.subject_id,
        at = format_instant(now),
        left = grant.remaining(now),
    )
}

pub fn renewed(grant: &Grant, now: i64) -> String {
    format!(
        "Renewed {kind} for {subject} at {at}. Remaining: {left}.",
        kind = grant.entitlement_kind,
        subject = grant.subject_id,
        at = format_instant(now),
        left = grant.remaining(now),
    )
}

pub fn reminder(grant: &Grant, now: i64) -> String {
    format!(
        "Your {kind} expires at {at}. Remaining: {left}.",
        kind = grant.entitlement_kind,
        at = format_instant(grant.expires_at),
        left = grant.remaining(now),
    )
}

pub fn expired(grant: &Grant) -> String {
    format!(
        "Your {kind} expired at {at} and has been removed.",
        kind = grant.entitlement_kind,
        at = format_instant(grant.expires_at),
    )
}

pub fn revoked(grant: &Grant, now: i64) -> String {
    format!(
        "Your {kind} was revoked at {at} with {left} left.",
        kind = grant.entitlement_kind,
        at = format_instant(now),
        left = Remaining::from_millis(grant.expires_at.saturating_sub(now)),
    )
}
