//! Error types for the grant engine.

use rolelease_core::{CoreError, PolicyError};
use rolelease_store::StoreError;
use thiserror::Error;

use crate::collab::CollaboratorError;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A grant record could not be built.
    #[error("grant error: {0}")]
    Core(#[from] CoreError),

    /// The policy handed to the engine is invalid.
    #[error("invalid policy: {0}")]
    Policy(#[from] PolicyError),

    /// The entitlement backend refused or kept failing.
    #[error("entitlement backend error: {0}")]
    Entitlement(#[source] CollaboratorError),

    /// A notification the caller depends on could not be delivered.
    #[error("notification error: {0}")]
    Notification(#[source] CollaboratorError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
