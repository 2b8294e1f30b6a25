//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;
use std::time::Duration;

use rolelease::{EngineConfig, EntitlementBackend, GrantEngine, MonotonicClock, ReconciliationSweep};
use rolelease_core::{
    apply_grant, Clock, Grant, GrantKey, GrantPolicy, GrantRequest, DAY_MS,
};
use rolelease_store::{GrantStore, MemoryStore};

use crate::doubles::{RecordingBackend, RecordingSink};

/// 14:09 05/03/2024 UTC. Fixed start instant for paused-time tests.
pub const T0: i64 = 1_709_647_740_000;

/// Entitlement kind used throughout the fixtures.
pub const KIND: &str = "renewal";

/// Owning context used throughout the fixtures.
pub const CONTEXT: &str = "guild-1";

/// An engine over a [`MemoryStore`] with recording collaborators and a clock
/// that follows tokio's (possibly paused) time starting at [`T0`].
///
/// Must be built inside a tokio runtime.
pub struct TestFixture<B = RecordingBackend> {
    pub engine: GrantEngine<MemoryStore>,
    pub store: Arc<MemoryStore>,
    pub backend: Arc<B>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<MonotonicClock>,
}

impl TestFixture<RecordingBackend> {
    /// Fixture with the default policy.
    pub fn new() -> Self {
        Self::with_backend(RecordingBackend::new(), GrantPolicy::default())
    }

    /// Fixture with a custom policy.
    pub fn with_policy(policy: GrantPolicy) -> Self {
        Self::with_backend(RecordingBackend::new(), policy)
    }
}

impl Default for TestFixture<RecordingBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> TestFixture<B>
where
    B: EntitlementBackend + 'static,
{
    /// Fixture with a specific backend double.
    pub fn with_backend(backend: B, policy: GrantPolicy) -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(backend);
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(MonotonicClock::starting_at(T0));

        let engine = GrantEngine::new(
            store.clone(),
            backend.clone(),
            sink.clone(),
            clock.clone(),
            EngineConfig {
                policy,
                retry_base_delay: Duration::ZERO,
            },
        )
        .expect("fixture policy is valid");

        Self {
            engine,
            store,
            backend,
            sink,
            clock,
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn sweep(&self) -> ReconciliationSweep<MemoryStore> {
        ReconciliationSweep::new(self.engine.clone())
    }

    /// Grant `subject` at the current instant.
    pub async fn grant(&self, subject: &str) -> rolelease::GrantOutcome {
        self.engine
            .grant_or_renew(&request(subject), self.now())
            .await
            .expect("grant succeeds")
    }

    /// Persist a row granted at `granted_at` without arming a timer, as if
    /// written by a process that has since died.
    pub async fn seed(&self, subject: &str, granted_at: i64) -> Grant {
        let duration = self.engine.policy().grant_duration_ms();
        let grant = apply_grant(None, &request(subject), granted_at, duration)
            .expect("valid duration")
            .grant;
        self.store.upsert(&grant).await.expect("upsert succeeds");
        grant
    }

    pub async fn row(&self, subject: &str) -> Option<Grant> {
        self.store.find(&key(subject)).await.expect("find succeeds")
    }
}

/// A grant request for `subject` with the fixture kind and context.
pub fn request(subject: &str) -> GrantRequest {
    GrantRequest::new(subject, KIND, CONTEXT)
}

/// The grant key for `subject` with the fixture kind.
pub fn key(subject: &str) -> GrantKey {
    GrantKey::new(subject, KIND)
}

/// Advance paused tokio time by `millis` and let woken tasks run.
pub async fn advance(millis: i64) {
    tokio::time::sleep(Duration::from_millis(millis.max(0) as u64)).await;
    tokio::task::yield_now().await;
}

/// Advance paused tokio time by whole days.
pub async fn advance_days(n: i64) {
    advance(n * DAY_MS).await;
}

/// Install a test-writer subscriber once. Honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
