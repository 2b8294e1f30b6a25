//! # rolelease store
//!
//! Storage abstraction for rolelease. Provides trait-based interfaces for the
//! Grant Store and the History Log, with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The engine talks to storage only through [`GrantStore`] and
//! [`HistoryLog`]. The primary implementation is [`SqliteStore`], which
//! implements both over one database file. [`MemoryStore`] is for tests.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rolelease_core::{apply_grant, GrantRequest, DAY_MS};
//! use rolelease_store::{GrantStore, HistoryLog, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("grants.db").unwrap();
//!
//!     let request = GrantRequest::new("4021", "renewal", "guild-1");
//!     let t = apply_grant(None, &request, 0, 50 * DAY_MS).unwrap();
//!     store.upsert(&t.grant).await.unwrap();
//!     store.append(&t.entry).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **One row per key**: `upsert` replaces the row for `(subject, kind)`
//! - **Compare-and-swap helpers**: deletes and reminder marks that race with
//!   a renewal are no-ops instead of lost updates
//! - **History is separate**: deleting a grant never touches its history

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{GrantStore, HistoryLog};
