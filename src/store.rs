//! Interfaces of the external backend services this crate consumes.

use std::future::Future;

use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::credential::SessionCredential;
use crate::types::SubjectId;

/// An authenticated backend session, as projected to this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Session {
    pub subject: SubjectId,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub issued_at: OffsetDateTime,
    /// When the account was first created at the session service.
    pub created_at: Option<OffsetDateTime>,
}

impl Session {
    /// Create a session with only the required subject, issued now.
    #[must_use]
    pub fn new(subject: impl Into<SubjectId>) -> Self {
        Self {
            subject: subject.into(),
            email: None,
            display_name: None,
            issued_at: OffsetDateTime::now_utc(),
            created_at: None,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: OffsetDateTime) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// Backend store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The service could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The caller is not allowed to perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The service answered with an error code (e.g. `auth/invalid-credential`).
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },

    /// A document was read but its contents could not be used.
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// A live subscription to session-change notifications.
///
/// Yields `Some(session)` on sign-in/restore and `None` on sign-out or
/// revocation, strictly in delivery order. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SessionSubscription {
    rx: mpsc::UnboundedReceiver<Option<Session>>,
}

impl SessionSubscription {
    #[must_use]
    pub fn new(rx: mpsc::UnboundedReceiver<Option<Session>>) -> Self {
        Self { rx }
    }

    /// Next notification; `None` once the store has closed the channel.
    pub async fn next(&mut self) -> Option<Option<Session>> {
        self.rx.recv().await
    }
}

/// The backend's session/identity service.
///
/// Implementations must deliver at least one notification per observed
/// transition, never overlap deliveries, and follow `sign_out` with a `None`
/// notification.
pub trait SessionStore: Send + Sync + 'static {
    /// Verify the bridged credential and issue a durable session.
    fn sign_in_with_credential(
        &self,
        credential: &SessionCredential,
    ) -> impl Future<Output = Result<Session, StoreError>> + Send;

    /// End the current session remotely.
    fn sign_out(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Subscribe to session changes. The current state is delivered first.
    fn on_session_changed(
        &self,
    ) -> impl Future<Output = Result<SessionSubscription, StoreError>> + Send;
}

/// Result of a create-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// The backend's document service, treated as an opaque key-value store.
pub trait DocumentStore: Send + Sync + 'static {
    /// Read `collection/id`; `None` if absent.
    fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<JsonValue>, StoreError>> + Send;

    /// Atomically create `collection/id` with `fields` unless it already exists.
    ///
    /// Must never overwrite an existing document.
    fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: JsonValue,
    ) -> impl Future<Output = Result<CreateOutcome, StoreError>> + Send;
}
