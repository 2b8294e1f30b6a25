//! Collaborators that record actions in the log.
//!
//! Platform adapters (a chat bot, an IAM API) implement the same traits and
//! replace these in `main`.

use async_trait::async_trait;
use tracing::info;

use rolelease::{CollaboratorError, EntitlementBackend, NotificationSink, Recipient};
use rolelease_core::{EntitlementKind, SubjectId};

#[derive(Debug, Default, Clone, Copy)]
pub struct LogBackend;

#[async_trait]
impl EntitlementBackend for LogBackend {
    async fn apply(&self, subject: &SubjectId, kind: &EntitlementKind) -> Result<(), CollaboratorError> {
        info!(subject = %subject, kind = %kind, "entitlement applied");
        Ok(())
    }

    async fn remove(&self, subject: &SubjectId, kind: &EntitlementKind) -> Result<(), CollaboratorError> {
        info!(subject = %subject, kind = %kind, "entitlement removed");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, recipient: &Recipient, message: &str) -> Result<(), CollaboratorError> {
        match recipient {
            Recipient::Subject(subject) => info!(subject = %subject, message, "notify subject"),
            Recipient::Channel => info!(message, "notify channel"),
        }
        Ok(())
    }
}
