//! Collaborator contracts: the entitlement backend and the notification sink.
//!
//! The engine owns no platform I/O. Applying or removing a role and sending a
//! message go through these traits, each call wrapped in [`with_retry`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

use rolelease_core::{EntitlementKind, SubjectId};

/// Failure reported by a collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Temporary failure (network, rate limit). Worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Permanent refusal (missing permission, unknown subject).
    #[error("rejected: {0}")]
    Rejected(String),
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_))
    }
}

/// The external system that actually holds the entitlement (e.g. a role).
#[async_trait]
pub trait EntitlementBackend: Send + Sync {
    /// Give `kind` to `subject`.
    async fn apply(&self, subject: &SubjectId, kind: &EntitlementKind)
        -> Result<(), CollaboratorError>;

    /// Take `kind` away from `subject`.
    async fn remove(&self, subject: &SubjectId, kind: &EntitlementKind)
        -> Result<(), CollaboratorError>;
}

/// Where a notification goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// Addressed to the grant holder.
    Subject(SubjectId),
    /// The shared announcement channel.
    Channel,
}

/// Best-effort message delivery.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, recipient: &Recipient, message: &str) -> Result<(), CollaboratorError>;
}

/// Bounded retry with exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(16));
        let jitter = if exp == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=exp / 2)
        };
        Duration::from_millis(exp.saturating_add(jitter))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(250))
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// Every failure is logged; the last error is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.attempts => {
                tracing::warn!(operation, attempt, error = %e, "collaborator call failed, retrying");
                tokio::time::sleep(policy.delay_for(attempt - 1)).await;
            }
            Err(e) => {
                tracing::error!(operation, attempt, error = %e, "collaborator call failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CollaboratorError::Transient("busy".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CollaboratorError::Transient("down".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CollaboratorError::Rejected("missing permission".into()))
        })
        .await;

        assert_eq!(
            result,
            Err(CollaboratorError::Rejected("missing permission".into()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_attempts_floor_is_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }
}
