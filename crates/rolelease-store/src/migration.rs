//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::info!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Active grants: one row per (subject, kind)
        CREATE TABLE grants (
            subject_id TEXT NOT NULL,
            entitlement_kind TEXT NOT NULL,
            granted_at INTEGER NOT NULL,        -- Unix ms
            expires_at INTEGER NOT NULL,        -- Unix ms
            last_reminded_at INTEGER,           -- Unix ms, NULL = not reminded since renewal
            owning_context TEXT NOT NULL,

            PRIMARY KEY (subject_id, entitlement_kind),
            CHECK (expires_at > granted_at)
        );

        -- Append-only audit log of grant/renew actions
        CREATE TABLE grant_history (
            entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id TEXT NOT NULL,
            entitlement_kind TEXT NOT NULL,
            action TEXT NOT NULL,               -- 'create' | 'renew'
            granted_at INTEGER NOT NULL,        -- instant of the action
            expires_at INTEGER NOT NULL,        -- resulting expiration
            owning_context TEXT NOT NULL
        );

        CREATE INDEX idx_grants_expires ON grants(expires_at);
        CREATE INDEX idx_grants_context ON grants(owning_context);
        CREATE INDEX idx_history_key ON grant_history(subject_id, entitlement_kind, granted_at);
        CREATE INDEX idx_history_context ON grant_history(owning_context);
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
