//! The grant engine: grant/renew/revoke, expiration, and recovery.
//!
//! The engine ties together the store, the collaborators, the per-key locks
//! and the timer registry. Every mutation of a grant row happens under that
//! key's lock; timers and the sweep additionally compare on `expires_at`.

use std::sync::Arc;
use std::time::Duration;

use rolelease_core::{
    apply_grant, Clock, ContextId, Grant, GrantKey, GrantPolicy, GrantRequest, HistoryAction,
    HistoryEntry, Remaining, Transition,
};
use rolelease_store::{GrantStore, HistoryLog};

use crate::collab::{with_retry, EntitlementBackend, NotificationSink, Recipient, RetryPolicy};
use crate::error::{EngineError, Result};
use crate::locks::KeyLocks;
use crate::notice;
use crate::timer::TimerRegistry;

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Durations and limits.
    pub policy: GrantPolicy,
    /// Delay before the first collaborator retry; doubles per attempt.
    pub retry_base_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: GrantPolicy::default(),
            retry_base_delay: Duration::from_millis(250),
        }
    }
}

/// Result of [`GrantEngine::grant_or_renew`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Created { expires_at: i64 },
    Renewed { expires_at: i64 },
}

impl GrantOutcome {
    pub fn expires_at(&self) -> i64 {
        match self {
            GrantOutcome::Created { expires_at } | GrantOutcome::Renewed { expires_at } => {
                *expires_at
            }
        }
    }
}

/// Result of a revoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    NothingToRevoke,
}

/// Result of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Active {
        expires_at: i64,
        remaining: Remaining,
    },
    NotActive,
}

/// What happened when an expiration timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// The row was deleted.
    Revoked { entitlement_removed: bool },
    /// The row is gone or was renewed after this timer was armed.
    Superseded,
    /// The row is still active.
    NotYetDue,
}

/// Counts from [`GrantEngine::teardown_context`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub grants_removed: usize,
    pub history_removed: usize,
    pub timers_cancelled: usize,
}

struct Inner<S> {
    store: Arc<S>,
    backend: Arc<dyn EntitlementBackend>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    policy: GrantPolicy,
    retry: RetryPolicy,
    timers: Arc<TimerRegistry>,
    locks: KeyLocks,
}

/// The timed grant engine.
///
/// Cheap to clone; clones share timers, locks and the store.
pub struct GrantEngine<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for GrantEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> GrantEngine<S>
where
    S: GrantStore + HistoryLog + 'static,
{
    /// Create a new engine. Fails if the policy is invalid.
    pub fn new(
        store: Arc<S>,
        backend: Arc<dyn EntitlementBackend>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.policy.validate()?;
        let retry = RetryPolicy::new(config.policy.collaborator_attempts, config.retry_base_delay);

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                backend,
                sink,
                clock,
                policy: config.policy,
                retry,
                timers: TimerRegistry::new(),
                locks: KeyLocks::new(),
            }),
        })
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn policy(&self) -> &GrantPolicy {
        &self.inner.policy
    }

    /// Current instant according to the engine's clock.
    pub fn now(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grant / Renew
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant or renew `request` at `now` without touching the backend.
    ///
    /// An active grant is extended from its current expiry; otherwise a new
    /// grant starts at `now`. The expiration timer is (re-)armed either way.
    pub async fn grant_or_renew(&self, request: &GrantRequest, now: i64) -> Result<GrantOutcome> {
        let key = request.key();
        let _guard = self.inner.locks.lock(&key).await;

        let transition = self.transition(request, now).await?;
        self.commit(&transition).await
    }

    /// Grant or renew, applying the entitlement when a new grant is created
    /// and announcing the result on the channel.
    ///
    /// If the backend refuses the entitlement nothing is recorded.
    pub async fn grant_with_entitlement(
        &self,
        request: &GrantRequest,
        now: i64,
    ) -> Result<GrantOutcome> {
        let key = request.key();
        let (outcome, grant) = {
            let _guard = self.inner.locks.lock(&key).await;
            let transition = self.transition(request, now).await?;

            if transition.action() == HistoryAction::Create {
                let backend = &self.inner.backend;
                with_retry(&self.inner.retry, "entitlement.apply", || {
                    backend.apply(&request.subject, &request.kind)
                })
                .await
                .map_err(EngineError::Entitlement)?;
            }

            let outcome = self.commit(&transition).await?;
            (outcome, transition.grant)
        };

        let message = match outcome {
            GrantOutcome::Created { .. } => notice::granted(&grant, now),
            GrantOutcome::Renewed { .. } => notice::renewed(&grant, now),
        };
        self.notify(&Recipient::Channel, &message).await;

        Ok(outcome)
    }

    async fn transition(&self, request: &GrantRequest, now: i64) -> Result<Transition> {
        let existing = self.inner.store.find(&request.key()).await?;
        Ok(apply_grant(
            existing.as_ref(),
            request,
            now,
            self.inner.policy.grant_duration_ms(),
        )?)
    }

    /// Persist a transition and arm its timer. Caller holds the key lock.
    async fn commit(&self, transition: &Transition) -> Result<GrantOutcome> {
        let grant = &transition.grant;
        self.inner.store.upsert(grant).await?;
        self.inner.store.append(&transition.entry).await?;
        self.arm(grant.key(), grant.expires_at);

        let expires_at = grant.expires_at;
        let outcome = match transition.action() {
            HistoryAction::Create => GrantOutcome::Created { expires_at },
            HistoryAction::Renew => GrantOutcome::Renewed { expires_at },
        };

        tracing::info!(
            subject = %grant.subject_id,
            kind = %grant.entitlement_kind,
            action = %transition.action(),
            expires_at,
            "grant recorded"
        );
        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Revoke / Query
    // ─────────────────────────────────────────────────────────────────────────

    /// Cancel the timer and delete the row. Idempotent.
    pub async fn revoke(&self, key: &GrantKey) -> Result<RevokeOutcome> {
        let _guard = self.inner.locks.lock(key).await;
        self.inner.timers.cancel(key);

        if self.inner.store.delete(key).await? {
            tracing::info!(subject = %key.subject, kind = %key.kind, "grant revoked");
            Ok(RevokeOutcome::Revoked)
        } else {
            Ok(RevokeOutcome::NothingToRevoke)
        }
    }

    /// Revoke, then remove the entitlement and tell the subject.
    ///
    /// Backend and notification failures are logged; the row is deleted
    /// regardless.
    pub async fn revoke_with_entitlement(&self, key: &GrantKey) -> Result<RevokeOutcome> {
        let removed = {
            let _guard = self.inner.locks.lock(key).await;
            self.inner.timers.cancel(key);

            let Some(grant) = self.inner.store.find(key).await? else {
                return Ok(RevokeOutcome::NothingToRevoke);
            };
            self.inner.store.delete(key).await?;
            let _ = self.remove_entitlement(key).await;
            grant
        };

        tracing::info!(subject = %key.subject, kind = %key.kind, "grant revoked");
        let now = self.now();
        self.notify(
            &Recipient::Subject(key.subject.clone()),
            &notice::revoked(&removed, now),
        )
        .await;

        Ok(RevokeOutcome::Revoked)
    }

    pub async fn query(&self, key: &GrantKey, now: i64) -> Result<QueryOutcome> {
        match self.inner.store.find(key).await? {
            Some(grant) if grant.is_active(now) => Ok(QueryOutcome::Active {
                expires_at: grant.expires_at,
                remaining: grant.remaining(now),
            }),
            _ => Ok(QueryOutcome::NotActive),
        }
    }

    /// History entries for `key`, oldest first.
    pub async fn history(&self, key: &GrantKey) -> Result<Vec<HistoryEntry>> {
        Ok(self.inner.store.list_for(key).await?)
    }

    /// Remove every grant and history entry owned by `context`.
    pub async fn teardown_context(&self, context: &ContextId) -> Result<TeardownReport> {
        let mut report = TeardownReport::default();

        let owned: Vec<GrantKey> = self
            .inner
            .store
            .scan_all()
            .await?
            .iter()
            .filter(|g| &g.owning_context == context)
            .map(Grant::key)
            .collect();

        for key in &owned {
            let _guard = self.inner.locks.lock(key).await;
            if self.inner.timers.cancel(key) {
                report.timers_cancelled += 1;
            }
        }

        report.grants_removed = self.inner.store.delete_context(context).await?;
        report.history_removed = self.inner.store.purge_context(context).await?;

        tracing::info!(
            context = %context,
            grants = report.grants_removed,
            history = report.history_removed,
            "context torn down"
        );
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Timers
    // ─────────────────────────────────────────────────────────────────────────

    /// Arm timers for every row that has not expired yet.
    ///
    /// Expired rows are left for the sweep. Returns the number armed.
    pub async fn recover(&self, now: i64) -> Result<usize> {
        let mut armed = 0;

        for grant in self.inner.store.scan_all().await? {
            if !grant.is_active(now) {
                continue;
            }
            let key = grant.key();
            let _guard = self.inner.locks.lock(&key).await;
            self.arm(key, grant.expires_at);
            armed += 1;
        }

        tracing::info!(armed, "timers recovered");
        Ok(armed)
    }

    /// The expiration path. Runs when a timer for `expected_expires_at` fires.
    ///
    /// Re-reads the row under the key lock and does nothing if the row is gone
    /// or was renewed in the meantime.
    pub async fn expire(&self, key: &GrantKey, expected_expires_at: i64) -> Result<FireOutcome> {
        let (grant, entitlement_removed) = {
            let _guard = self.inner.locks.lock(key).await;

            let grant = match self.inner.store.find(key).await? {
                Some(grant) if grant.expires_at == expected_expires_at => grant,
                _ => {
                    tracing::debug!(subject = %key.subject, kind = %key.kind, "timer superseded");
                    return Ok(FireOutcome::Superseded);
                }
            };
            if grant.is_active(self.now()) {
                return Ok(FireOutcome::NotYetDue);
            }

            let entitlement_removed = self.remove_entitlement(key).await.is_ok();
            if !self
                .inner
                .store
                .delete_if_expires_at(key, expected_expires_at)
                .await?
            {
                return Ok(FireOutcome::Superseded);
            }
            // The notice below must outlive a re-grant or orphan cancel that
            // lands once the key lock is released.
            self.inner.timers.detach(key, expected_expires_at);

            tracing::info!(
                subject = %key.subject,
                kind = %key.kind,
                expires_at = expected_expires_at,
                entitlement_removed,
                "grant expired"
            );
            (grant, entitlement_removed)
        };

        self.notify(
            &Recipient::Subject(key.subject.clone()),
            &notice::expired(&grant),
        )
        .await;

        Ok(FireOutcome::Revoked {
            entitlement_removed,
        })
    }

    /// Arm (or replace) the timer for `key`. Caller holds the key lock.
    fn arm(&self, key: GrantKey, expires_at: i64) {
        let weak = Arc::downgrade(&self.inner);
        let fire_key = key.clone();

        self.inner
            .timers
            .arm(key, expires_at, self.inner.clock.clone(), move || async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let engine = GrantEngine { inner };
                if let Err(e) = engine.expire(&fire_key, expires_at).await {
                    tracing::error!(
                        subject = %fire_key.subject,
                        kind = %fire_key.kind,
                        error = %e,
                        "expiration failed"
                    );
                }
            });
    }

    pub fn is_armed(&self, key: &GrantKey) -> bool {
        self.inner.timers.is_armed(key)
    }

    pub fn armed_deadline(&self, key: &GrantKey) -> Option<i64> {
        self.inner.timers.armed_deadline(key)
    }

    pub fn armed_count(&self) -> usize {
        self.inner.timers.len()
    }

    /// Abort every timer. Rows stay in the store for the next recovery.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.inner.timers.cancel_all();
        tracing::info!(cancelled, "timers cancelled");
        cancelled
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sweep support
    // ─────────────────────────────────────────────────────────────────────────

    /// Arm a timer for `key` unless one is already live for the row's
    /// current expiry. Returns whether a timer was armed.
    pub(crate) async fn rearm_if_missing(&self, key: &GrantKey) -> Result<bool> {
        let _guard = self.inner.locks.lock(key).await;

        let Some(grant) = self.inner.store.find(key).await? else {
            return Ok(false);
        };
        if self.inner.timers.armed_deadline(key) == Some(grant.expires_at) {
            return Ok(false);
        }

        tracing::info!(
            subject = %key.subject,
            kind = %key.kind,
            expires_at = grant.expires_at,
            "re-arming missing timer"
        );
        self.arm(key.clone(), grant.expires_at);
        Ok(true)
    }

    /// Send a reminder if one is due. Returns whether one was sent.
    pub(crate) async fn remind_if_due(&self, key: &GrantKey, now: i64) -> Result<bool> {
        let _guard = self.inner.locks.lock(key).await;

        let Some(grant) = self.inner.store.find(key).await? else {
            return Ok(false);
        };
        let policy = &self.inner.policy;
        if !grant.reminder_due(
            now,
            policy.reminder_threshold_ms(),
            policy.reminder_interval_ms(),
        ) {
            return Ok(false);
        }

        let sink = &self.inner.sink;
        let recipient = Recipient::Subject(key.subject.clone());
        let message = notice::reminder(&grant, now);
        with_retry(&self.inner.retry, "notify.reminder", || {
            sink.notify(&recipient, &message)
        })
        .await
        .map_err(EngineError::Notification)?;

        let marked = self
            .inner
            .store
            .mark_reminded(key, grant.expires_at, now)
            .await?;
        tracing::info!(subject = %key.subject, kind = %key.kind, marked, "reminder sent");
        Ok(true)
    }

    /// Cancel a live timer whose row no longer exists.
    pub(crate) async fn cancel_orphan(&self, key: &GrantKey) -> Result<bool> {
        let _guard = self.inner.locks.lock(key).await;
        if self.inner.store.find(key).await?.is_some() {
            return Ok(false);
        }
        Ok(self.inner.timers.cancel(key))
    }

    pub(crate) fn armed_keys(&self) -> Vec<GrantKey> {
        self.inner.timers.armed_keys()
    }

    pub(crate) fn prune_locks(&self) -> usize {
        self.inner.locks.prune()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Collaborators
    // ─────────────────────────────────────────────────────────────────────────

    async fn remove_entitlement(&self, key: &GrantKey) -> Result<()> {
        let backend = &self.inner.backend;
        with_retry(&self.inner.retry, "entitlement.remove", || {
            backend.remove(&key.subject, &key.kind)
        })
        .await
        .map_err(EngineError::Entitlement)
    }

    /// Best-effort notification; failures are logged by the retry loop.
    async fn notify(&self, recipient: &Recipient, message: &str) {
        let sink = &self.inner.sink;
        let _ = with_retry(&self.inner.retry, "notify", || sink.notify(recipient, message)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rolelease_core::{DAY_MS, HOUR_MS};
    use rolelease_store::MemoryStore;

    use crate::collab::CollaboratorError;
    use crate::timer::MonotonicClock;

    const T0: i64 = 1_709_647_740_000;
    const D: i64 = 50 * DAY_MS;

    #[derive(Default)]
    struct Backend {
        calls: Mutex<Vec<String>>,
        reject: bool,
    }

    #[async_trait]
    impl EntitlementBackend for Backend {
        async fn apply(
            &self,
            subject: &rolelease_core::SubjectId,
            _kind: &rolelease_core::EntitlementKind,
        ) -> std::result::Result<(), CollaboratorError> {
            if self.reject {
                return Err(CollaboratorError::Rejected("no permission".into()));
            }
            self.calls.lock().unwrap().push(format!("apply {subject}"));
            Ok(())
        }

        async fn remove(
            &self,
            subject: &rolelease_core::SubjectId,
            _kind: &rolelease_core::EntitlementKind,
        ) -> std::result::Result<(), CollaboratorError> {
            self.calls.lock().unwrap().push(format!("remove {subject}"));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Sink {
        messages: Mutex<Vec<(Recipient, String)>>,
        delay: Duration,
    }

    #[async_trait]
    impl NotificationSink for Sink {
        async fn notify(
            &self,
            recipient: &Recipient,
            message: &str,
        ) -> std::result::Result<(), CollaboratorError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.messages
                .lock()
                .unwrap()
                .push((recipient.clone(), message.to_string()));
            Ok(())
        }
    }

    struct Harness {
        engine: GrantEngine<MemoryStore>,
        backend: Arc<Backend>,
        sink: Arc<Sink>,
    }

    fn harness_with(backend: Backend) -> Harness {
        harness_with_parts(backend, Sink::default())
    }

    fn harness_with_parts(backend: Backend, sink: Sink) -> Harness {
        let backend = Arc::new(backend);
        let sink = Arc::new(sink);
        let engine = GrantEngine::new(
            Arc::new(MemoryStore::new()),
            backend.clone(),
            sink.clone(),
            Arc::new(MonotonicClock::starting_at(T0)),
            EngineConfig {
                policy: GrantPolicy::default(),
                retry_base_delay: Duration::ZERO,
            },
        )
        .unwrap();
        Harness {
            engine,
            backend,
            sink,
        }
    }

    fn harness() -> Harness {
        harness_with(Backend::default())
    }

    fn request() -> GrantRequest {
        GrantRequest::new("4021", "renewal", "guild-1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_creates_and_arms() {
        let h = harness();
        let key = request().key();

        let outcome = h.engine.grant_or_renew(&request(), T0).await.unwrap();

        assert_eq!(outcome, GrantOutcome::Created { expires_at: T0 + D });
        assert_eq!(h.engine.armed_deadline(&key), Some(T0 + D));
        assert_eq!(h.engine.history(&key).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_moves_timer() {
        let h = harness();
        let key = request().key();

        h.engine.grant_or_renew(&request(), T0).await.unwrap();
        let outcome = h
            .engine
            .grant_or_renew(&request(), T0 + 10 * DAY_MS)
            .await
            .unwrap();

        assert_eq!(outcome, GrantOutcome::Renewed { expires_at: T0 + 2 * D });
        assert_eq!(h.engine.armed_deadline(&key), Some(T0 + 2 * D));
        assert_eq!(h.engine.armed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_revokes_at_deadline() {
        let h = harness();
        let key = request().key();
        h.engine.grant_or_renew(&request(), T0).await.unwrap();

        tokio::time::sleep(Duration::from_millis((D - HOUR_MS) as u64)).await;
        assert!(h.engine.store().find(&key).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(2 * HOUR_MS as u64)).await;
        assert!(h.engine.store().find(&key).await.unwrap().is_none());
        assert_eq!(*h.backend.calls.lock().unwrap(), vec!["remove 4021"]);

        let messages = h.sink.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, Recipient::Subject("4021".into()));
        assert!(!h.engine.is_armed(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fire_is_superseded() {
        let h = harness();
        let key = request().key();

        h.engine.grant_or_renew(&request(), T0).await.unwrap();
        h.engine
            .grant_or_renew(&request(), T0 + DAY_MS)
            .await
            .unwrap();

        let outcome = h.engine.expire(&key, T0 + D).await.unwrap();
        assert_eq!(outcome, FireOutcome::Superseded);
        assert!(h.engine.store().find(&key).await.unwrap().is_some());
        assert!(h.backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_fire_is_not_yet_due() {
        let h = harness();
        let key = request().key();
        h.engine.grant_or_renew(&request(), T0).await.unwrap();

        let outcome = h.engine.expire(&key, T0 + D).await.unwrap();
        assert_eq!(outcome, FireOutcome::NotYetDue);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoke_is_idempotent() {
        let h = harness();
        let key = request().key();
        h.engine.grant_or_renew(&request(), T0).await.unwrap();

        assert_eq!(h.engine.revoke(&key).await.unwrap(), RevokeOutcome::Revoked);
        assert!(!h.engine.is_armed(&key));
        assert_eq!(
            h.engine.revoke(&key).await.unwrap(),
            RevokeOutcome::NothingToRevoke
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_apply_records_nothing() {
        let h = harness_with(Backend {
            reject: true,
            ..Backend::default()
        });
        let key = request().key();

        let err = h
            .engine
            .grant_with_entitlement(&request(), T0)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Entitlement(CollaboratorError::Rejected(_))));
        assert!(h.engine.store().find(&key).await.unwrap().is_none());
        assert!(h.engine.history(&key).await.unwrap().is_empty());
        assert!(!h.engine.is_armed(&key));
        assert!(h.sink.messages.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_with_entitlement_applies_once() {
        let h = harness();

        h.engine
            .grant_with_entitlement(&request(), T0)
            .await
            .unwrap();
        h.engine
            .grant_with_entitlement(&request(), T0 + DAY_MS)
            .await
            .unwrap();

        assert_eq!(*h.backend.calls.lock().unwrap(), vec!["apply 4021"]);
        let messages = h.sink.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|(r, _)| *r == Recipient::Channel));
        assert!(messages[1].1.starts_with("Renewed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoke_with_entitlement_removes_and_notifies() {
        let h = harness();
        let key = request().key();
        h.engine.grant_or_renew(&request(), T0).await.unwrap();

        let outcome = h.engine.revoke_with_entitlement(&key).await.unwrap();

        assert_eq!(outcome, RevokeOutcome::Revoked);
        assert_eq!(*h.backend.calls.lock().unwrap(), vec!["remove 4021"]);
        assert_eq!(h.sink.messages.lock().unwrap().len(), 1);
        assert_eq!(
            h.engine.revoke_with_entitlement(&key).await.unwrap(),
            RevokeOutcome::NothingToRevoke
        );
        assert_eq!(*h.backend.calls.lock().unwrap(), vec!["remove 4021"]);
        assert_eq!(h.sink.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_notice_survives_regrant_during_delivery() {
        let start = tokio::time::Instant::now();
        let h = harness_with_parts(
            Backend::default(),
            Sink {
                delay: Duration::from_millis(500),
                ..Sink::default()
            },
        );
        let key = request().key();
        h.engine.grant_or_renew(&request(), T0).await.unwrap();

        // Expired and deleted, expiry notice still in flight.
        tokio::time::sleep_until(start + Duration::from_millis((D + 100) as u64)).await;
        assert!(h.engine.store().find(&key).await.unwrap().is_none());
        assert!(!h.engine.is_armed(&key));

        let now = h.engine.now();
        let outcome = h.engine.grant_or_renew(&request(), now).await.unwrap();
        assert_eq!(outcome, GrantOutcome::Created { expires_at: now + D });

        tokio::time::sleep(Duration::from_secs(5)).await;
        let messages = h.sink.messages.lock().unwrap();
        assert!(messages
            .iter()
            .any(|(r, m)| *r == Recipient::Subject("4021".into()) && m.contains("expired")));
        assert_eq!(h.engine.armed_deadline(&key), Some(now + D));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_notice_survives_orphan_cancel() {
        let start = tokio::time::Instant::now();
        let h = harness_with_parts(
            Backend::default(),
            Sink {
                delay: Duration::from_millis(500),
                ..Sink::default()
            },
        );
        let key = request().key();
        h.engine.grant_or_renew(&request(), T0).await.unwrap();

        tokio::time::sleep_until(start + Duration::from_millis((D + 100) as u64)).await;
        assert!(!h.engine.cancel_orphan(&key).await.unwrap());

        tokio::time::sleep(Duration::from_secs(5)).await;
        let messages = h.sink.messages.lock().unwrap();
        assert!(messages.iter().any(|(_, m)| m.contains("expired")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query() {
        let h = harness();
        let key = request().key();
        assert_eq!(h.engine.query(&key, T0).await.unwrap(), QueryOutcome::NotActive);

        h.engine.grant_or_renew(&request(), T0).await.unwrap();
        match h.engine.query(&key, T0 + DAY_MS).await.unwrap() {
            QueryOutcome::Active { expires_at, remaining } => {
                assert_eq!(expires_at, T0 + D);
                assert_eq!(remaining.months, 1);
                assert_eq!(remaining.days, 19);
            }
            QueryOutcome::NotActive => panic!("expected active grant"),
        }
        assert_eq!(h.engine.query(&key, T0 + D).await.unwrap(), QueryOutcome::NotActive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_context() {
        let h = harness();
        h.engine.grant_or_renew(&request(), T0).await.unwrap();
        h.engine
            .grant_or_renew(&GrantRequest::new("77", "renewal", "guild-2"), T0)
            .await
            .unwrap();

        let report = h
            .engine
            .teardown_context(&ContextId::new("guild-1"))
            .await
            .unwrap();

        assert_eq!(
            report,
            TeardownReport {
                grants_removed: 1,
                history_removed: 1,
                timers_cancelled: 1,
            }
        );
        assert_eq!(h.engine.armed_count(), 1);
        assert_eq!(h.engine.store().scan_all().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_policy_rejected() {
        let result = GrantEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Backend::default()),
            Arc::new(Sink::default()),
            Arc::new(MonotonicClock::starting_at(T0)),
            EngineConfig {
                policy: GrantPolicy {
                    grant_duration_days: 0,
                    ..GrantPolicy::default()
                },
                ..EngineConfig::default()
            },
        );
        assert!(matches!(result, Err(EngineError::Policy(_))));
    }
}
