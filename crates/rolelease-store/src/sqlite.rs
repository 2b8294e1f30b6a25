//! SQLite implementation of the store traits.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use rolelease_core::{ContextId, Grant, GrantKey, HistoryAction, HistoryEntry};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{GrantStore, HistoryLog};

/// SQLite-based store implementation.
///
/// Implements both [`GrantStore`] and [`HistoryLog`] over one database.
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

// Helper to convert a row to Grant
fn row_to_grant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Grant> {
    Ok(Grant {
        subject_id: row.get::<_, String>("subject_id")?.into(),
        entitlement_kind: row.get::<_, String>("entitlement_kind")?.into(),
        granted_at: row.get("granted_at")?,
        expires_at: row.get("expires_at")?,
        last_reminded_at: row.get("last_reminded_at")?,
        owning_context: row.get::<_, String>("owning_context")?.into(),
    })
}

// Helper to convert a row to HistoryEntry
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let action: String = row.get("action")?;
    let action = action.parse::<HistoryAction>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })?;

    Ok(HistoryEntry {
        subject_id: row.get::<_, String>("subject_id")?.into(),
        entitlement_kind: row.get::<_, String>("entitlement_kind")?.into(),
        action,
        granted_at: row.get("granted_at")?,
        expires_at: row.get("expires_at")?,
        owning_context: row.get::<_, String>("owning_context")?.into(),
    })
}

#[async_trait]
impl GrantStore for SqliteStore {
    async fn upsert(&self, grant: &Grant) -> Result<()> {
        let grant = grant.clone();

        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO grants (
                    subject_id, entitlement_kind, granted_at, expires_at,
                    last_reminded_at, owning_context
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(subject_id, entitlement_kind) DO UPDATE SET
                    granted_at = excluded.granted_at,
                    expires_at = excluded.expires_at,
                    last_reminded_at = excluded.last_reminded_at,
                    owning_context = excluded.owning_context",
                params![
                    grant.subject_id.as_str(),
                    grant.entitlement_kind.as_str(),
                    grant.granted_at,
                    grant.expires_at,
                    grant.last_reminded_at,
                    grant.owning_context.as_str(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn find(&self, key: &GrantKey) -> Result<Option<Grant>> {
        let key = key.clone();

        self.blocking(move |conn| {
            conn.query_row(
                "SELECT subject_id, entitlement_kind, granted_at, expires_at,
                        last_reminded_at, owning_context
                 FROM grants WHERE subject_id = ?1 AND entitlement_kind = ?2",
                params![key.subject.as_str(), key.kind.as_str()],
                row_to_grant,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn delete(&self, key: &GrantKey) -> Result<bool> {
        let key = key.clone();

        self.blocking(move |conn| {
            let removed = conn.execute(
                "DELETE FROM grants WHERE subject_id = ?1 AND entitlement_kind = ?2",
                params![key.subject.as_str(), key.kind.as_str()],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn delete_if_expires_at(&self, key: &GrantKey, expires_at: i64) -> Result<bool> {
        let key = key.clone();

        self.blocking(move |conn| {
            let removed = conn.execute(
                "DELETE FROM grants
                 WHERE subject_id = ?1 AND entitlement_kind = ?2 AND expires_at = ?3",
                params![key.subject.as_str(), key.kind.as_str(), expires_at],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn mark_reminded(&self, key: &GrantKey, expires_at: i64, at: i64) -> Result<bool> {
        let key = key.clone();

        self.blocking(move |conn| {
            let updated = conn.execute(
                "UPDATE grants SET last_reminded_at = ?4
                 WHERE subject_id = ?1 AND entitlement_kind = ?2 AND expires_at = ?3",
                params![key.subject.as_str(), key.kind.as_str(), expires_at, at],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    async fn scan_all(&self) -> Result<Vec<Grant>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT subject_id, entitlement_kind, granted_at, expires_at,
                        last_reminded_at, owning_context
                 FROM grants ORDER BY expires_at, subject_id, entitlement_kind",
            )?;

            let grants = stmt
                .query_map([], row_to_grant)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(grants)
        })
        .await
    }

    async fn delete_context(&self, context: &ContextId) -> Result<usize> {
        let context = context.clone();

        self.blocking(move |conn| {
            let removed = conn.execute(
                "DELETE FROM grants WHERE owning_context = ?1",
                params![context.as_str()],
            )?;
            Ok(removed)
        })
        .await
    }
}

#[async_trait]
impl HistoryLog for SqliteStore {
    async fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let entry = entry.clone();

        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO grant_history (
                    subject_id, entitlement_kind, action, granted_at, expires_at, owning_context
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.subject_id.as_str(),
                    entry.entitlement_kind.as_str(),
                    entry.action.as_str(),
                    entry.granted_at,
                    entry.expires_at,
                    entry.owning_context.as_str(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_for(&self, key: &GrantKey) -> Result<Vec<HistoryEntry>> {
        let key = key.clone();

        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT subject_id, entitlement_kind, action, granted_at, expires_at,
                        owning_context
                 FROM grant_history
                 WHERE subject_id = ?1 AND entitlement_kind = ?2
                 ORDER BY granted_at, entry_id",
            )?;

            let entries = stmt
                .query_map(params![key.subject.as_str(), key.kind.as_str()], row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(entries)
        })
        .await
    }

    async fn purge_context(&self, context: &ContextId) -> Result<usize> {
        let context = context.clone();

        self.blocking(move |conn| {
            let removed = conn.execute(
                "DELETE FROM grant_history WHERE owning_context = ?1",
                params![context.as_str()],
            )?;
            Ok(removed)
        })
        .await
    }
}
