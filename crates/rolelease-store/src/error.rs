//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// The connection mutex was poisoned by a panicking thread.
    #[error("connection lock poisoned: {0}")]
    Poisoned(String),

    /// The blocking worker could not be joined.
    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
