//! # rolelease
//!
//! Time-limited entitlements that survive restarts: grant and renew, remind
//! before expiry, revoke when the timer elapses.
//!
//! ## Overview
//!
//! - **Engine**: [`GrantEngine`] owns grant/renew/revoke, the expiration path,
//!   and recovery of timers from persisted rows
//! - **Timers**: one tokio task per key in a [`TimerRegistry`], replaced on
//!   renewal, generation-checked on release
//! - **Sweep**: [`ReconciliationSweep`] re-arms lost timers, sends reminders,
//!   and catches up on rows that expired while nothing was running
//! - **Collaborators**: [`EntitlementBackend`] and [`NotificationSink`] are
//!   the only ways out to the platform
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rolelease::core::{GrantRequest, SystemClock};
//! use rolelease::store::SqliteStore;
//! use rolelease::{EngineConfig, EntitlementBackend, GrantEngine, NotificationSink, ReconciliationSweep};
//!
//! async fn example(backend: Arc<dyn EntitlementBackend>, sink: Arc<dyn NotificationSink>) {
//!     let store = Arc::new(SqliteStore::open("grants.db").unwrap());
//!     let engine = GrantEngine::new(
//!         store,
//!         backend,
//!         sink,
//!         Arc::new(SystemClock),
//!         EngineConfig::default(),
//!     )
//!     .unwrap();
//!
//!     engine.recover(engine.now()).await.unwrap();
//!
//!     let request = GrantRequest::new("4021", "renewal", "guild-1");
//!     engine.grant_with_entitlement(&request, engine.now()).await.unwrap();
//!
//!     ReconciliationSweep::new(engine.clone())
//!         .run_until(async { let _ = tokio::signal::ctrl_c().await; })
//!         .await;
//!     engine.shutdown();
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `rolelease::core` - grant records, policy, clock utilities
//! - `rolelease::store` - store traits, SQLite and in-memory stores

pub mod collab;
pub mod engine;
pub mod error;
pub mod locks;
pub mod notice;
pub mod sweep;
pub mod timer;

// Re-export component crates
pub use rolelease_core as core;
pub use rolelease_store as store;

pub use collab::{with_retry, CollaboratorError, EntitlementBackend, NotificationSink, Recipient, RetryPolicy};
pub use engine::{
    EngineConfig, FireOutcome, GrantEngine, GrantOutcome, QueryOutcome, RevokeOutcome,
    TeardownReport,
};
pub use error::{EngineError, Result};
pub use locks::KeyLocks;
pub use sweep::{ReconciliationSweep, SweepReport};
pub use timer::{MonotonicClock, TimerRegistry};
