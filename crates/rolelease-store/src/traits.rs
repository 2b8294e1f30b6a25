//! Store traits: the abstract interface for grant persistence.
//!
//! These traits allow the engine to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::sync::Arc;

use async_trait::async_trait;
use rolelease_core::{ContextId, Grant, GrantKey, HistoryEntry};

use crate::error::Result;

/// Durable record of active grants. The single source of truth.
///
/// At most one row exists per [`GrantKey`]; `upsert` replaces in place.
///
/// # Design Notes
///
/// - **Compare-and-swap**: `delete_if_expires_at` and `mark_reminded` only
///   act when the stored `expires_at` still matches the caller's view, so a
///   timer or sweep holding stale state can never clobber a renewal.
/// - **No timer state**: nothing here records whether a timer is armed.
///   Timers are derived from rows on startup.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Insert or replace the row for `grant.key()`.
    async fn upsert(&self, grant: &Grant) -> Result<()>;

    /// Get the row for a key.
    async fn find(&self, key: &GrantKey) -> Result<Option<Grant>>;

    /// Delete the row for a key. Returns whether a row was removed.
    async fn delete(&self, key: &GrantKey) -> Result<bool>;

    /// Delete the row only if its `expires_at` equals `expires_at`.
    async fn delete_if_expires_at(&self, key: &GrantKey, expires_at: i64) -> Result<bool>;

    /// Set `last_reminded_at = at` only if the row's `expires_at` equals
    /// `expires_at`. Returns whether the row was updated.
    async fn mark_reminded(&self, key: &GrantKey, expires_at: i64, at: i64) -> Result<bool>;

    /// Every row, ordered by `expires_at`.
    async fn scan_all(&self) -> Result<Vec<Grant>>;

    /// Delete every row owned by a context. Returns the number removed.
    async fn delete_context(&self, context: &ContextId) -> Result<usize>;
}

/// Append-only record of grant and renewal actions.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    /// Append one entry.
    async fn append(&self, entry: &HistoryEntry) -> Result<()>;

    /// Entries for a key, ordered by `granted_at` ascending.
    async fn list_for(&self, key: &GrantKey) -> Result<Vec<HistoryEntry>>;

    /// Delete every entry owned by a context. Returns the number removed.
    async fn purge_context(&self, context: &ContextId) -> Result<usize>;
}

#[async_trait]
impl<S: GrantStore + ?Sized> GrantStore for Arc<S> {
    async fn upsert(&self, grant: &Grant) -> Result<()> {
        (**self).upsert(grant).await
    }

    async fn find(&self, key: &GrantKey) -> Result<Option<Grant>> {
        (**self).find(key).await
    }

    async fn delete(&self, key: &GrantKey) -> Result<bool> {
        (**self).delete(key).await
    }

    async fn delete_if_expires_at(&self, key: &GrantKey, expires_at: i64) -> Result<bool> {
        (**self).delete_if_expires_at(key, expires_at).await
    }

    async fn mark_reminded(&self, key: &GrantKey, expires_at: i64, at: i64) -> Result<bool> {
        (**self).mark_reminded(key, expires_at, at).await
    }

    async fn scan_all(&self) -> Result<Vec<Grant>> {
        (**self).scan_all().await
    }

    async fn delete_context(&self, context: &ContextId) -> Result<usize> {
        (**self).delete_context(context).await
    }
}

#[async_trait]
impl<H: HistoryLog + ?Sized> HistoryLog for Arc<H> {
    async fn append(&self, entry: &HistoryEntry) -> Result<()> {
        (**self).append(entry).await
    }

    async fn list_for(&self, key: &GrantKey) -> Result<Vec<HistoryEntry>> {
        (**self).list_for(key).await
    }

    async fn purge_context(&self, context: &ContextId) -> Result<usize> {
        (**self).purge_context(context).await
    }
}
