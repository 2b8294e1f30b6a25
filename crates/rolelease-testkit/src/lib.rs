//! # rolelease testkit
//!
//! Testing utilities for rolelease.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Doubles**: Recording and failing [`EntitlementBackend`] and
//!   [`NotificationSink`] implementations
//! - **Fixtures**: An engine over an in-memory store with a clock that follows
//!   paused tokio time
//! - **Generators**: Proptest strategies for randomized grant/revoke scripts
//!
//! The integration tests for the whole workspace live in this crate's
//! `tests/` directory.
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use rolelease_testkit::fixtures::{advance_days, TestFixture};
//!
//! // Run under `#[tokio::test(start_paused = true)]`.
//! async fn expires_after_fifty_days() {
//!     let fx = TestFixture::new();
//!     fx.grant("4021").await;
//!
//!     advance_days(51).await;
//!     assert!(fx.row("4021").await.is_none());
//! }
//! ```
//!
//! [`EntitlementBackend`]: rolelease::EntitlementBackend
//! [`NotificationSink`]: rolelease::NotificationSink

pub mod doubles;
pub mod fixtures;
pub mod generators;

pub use doubles::{BackendCall, FlakyBackend, RecordingBackend, RecordingSink};
pub use fixtures::{init_tracing, TestFixture, T0};
pub use generators::{script, Step};
