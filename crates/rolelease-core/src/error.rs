//! Error types for rolelease core.

use thiserror::Error;

/// Errors raised while building or decoding grant records.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("grant duration must be positive, got {0}ms")]
    InvalidDuration(i64),

    #[error("unknown history action: {0}")]
    UnknownAction(String),
}

/// Configuration errors. Fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("policy value `{0}` must be positive")]
    NotPositive(&'static str),
}
