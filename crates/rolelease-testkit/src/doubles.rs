//! Collaborator doubles.
//!
//! Every double records what it was asked to do so tests can assert on the
//! exact sequence of platform calls.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use rolelease::{CollaboratorError, EntitlementBackend, NotificationSink, Recipient};
use rolelease_core::{EntitlementKind, SubjectId};

/// One call made to an [`EntitlementBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Apply(SubjectId, EntitlementKind),
    Remove(SubjectId, EntitlementKind),
}

/// Backend that succeeds and records every call.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<BackendCall>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Subjects whose entitlement was removed, in call order.
    pub fn removed(&self) -> Vec<SubjectId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Remove(subject, _) => Some(subject),
                BackendCall::Apply(..) => None,
            })
            .collect()
    }

    fn record(&self, call: BackendCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl EntitlementBackend for RecordingBackend {
    async fn apply(&self, subject: &SubjectId, kind: &EntitlementKind) -> Result<(), CollaboratorError> {
        self.record(BackendCall::Apply(subject.clone(), kind.clone()));
        Ok(())
    }

    async fn remove(&self, subject: &SubjectId, kind: &EntitlementKind) -> Result<(), CollaboratorError> {
        self.record(BackendCall::Remove(subject.clone(), kind.clone()));
        Ok(())
    }
}

/// Backend that fails a fixed number of times before behaving like
/// [`RecordingBackend`].
#[derive(Debug)]
pub struct FlakyBackend {
    failures_left: AtomicU32,
    error: CollaboratorError,
    inner: RecordingBackend,
}

impl FlakyBackend {
    /// Fail the first `failures` calls with a transient error.
    pub fn transient(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            error: CollaboratorError::Transient("platform unavailable".into()),
            inner: RecordingBackend::new(),
        }
    }

    /// Fail every call with a permanent rejection.
    pub fn rejecting() -> Self {
        Self {
            failures_left: AtomicU32::new(u32::MAX),
            error: CollaboratorError::Rejected("missing permission".into()),
            inner: RecordingBackend::new(),
        }
    }

    /// Calls that got through.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.inner.calls()
    }

    fn check(&self) -> Result<(), CollaboratorError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(());
        }
        if left != u32::MAX {
            self.failures_left.store(left - 1, Ordering::SeqCst);
        }
        Err(self.error.clone())
    }
}

#[async_trait]
impl EntitlementBackend for FlakyBackend {
    async fn apply(&self, subject: &SubjectId, kind: &EntitlementKind) -> Result<(), CollaboratorError> {
        self.check()?;
        self.inner.apply(subject, kind).await
    }

    async fn remove(&self, subject: &SubjectId, kind: &EntitlementKind) -> Result<(), CollaboratorError> {
        self.check()?;
        self.inner.remove(subject, kind).await
    }
}

/// Sink that records every message.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(Recipient, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(Recipient, String)> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Messages sent to `subject`.
    pub fn sent_to(&self, subject: &str) -> Vec<String> {
        let recipient = Recipient::Subject(SubjectId::new(subject));
        self.messages()
            .into_iter()
            .filter(|(r, _)| *r == recipient)
            .map(|(_, m)| m)
            .collect()
    }

    /// Messages posted to the announcement channel.
    pub fn announcements(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(r, _)| *r == Recipient::Channel)
            .map(|(_, m)| m)
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, recipient: &Recipient, message: &str) -> Result<(), CollaboratorError> {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((recipient.clone(), message.to_string()));
        }
        Ok(())
    }
}
