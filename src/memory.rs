//! In-process backend stores, for tests and offline development.
//!
//! Both stores support failure injection so degraded paths can be exercised
//! without a network.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::credential::SessionCredential;
use crate::store::{
    CreateOutcome, DocumentStore, Session, SessionStore, SessionSubscription, StoreError,
};
use crate::types::SubjectId;

#[derive(Default)]
struct SessionState {
    current: Option<Session>,
    /// First sign-in time per subject, reported as the account creation time.
    accounts: HashMap<SubjectId, OffsetDateTime>,
    subscribers: Vec<mpsc::UnboundedSender<Option<Session>>>,
    /// Subscriptions handed out while unreachable; kept open, never fed.
    stalled: Vec<mpsc::UnboundedSender<Option<Session>>>,
    unreachable: bool,
    reject_sign_in: Option<StoreError>,
    fail_sign_out: bool,
}

impl SessionState {
    fn notify(&mut self, change: Option<Session>) {
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

/// In-memory session service.
///
/// Sessions are keyed by the ID token's `sub` claim.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    state: Arc<Mutex<SessionState>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with a persisted session, restored on the first subscription.
    #[must_use]
    pub fn with_persisted_session(session: Session) -> Self {
        let store = Self::new();
        store.state.lock().current = Some(session);
        store
    }

    /// Subscriptions succeed but never deliver a notification.
    ///
    /// Becoming reachable again delivers the current state to the stalled
    /// subscriptions and from then on treats them as live.
    pub fn set_unreachable(&self, unreachable: bool) {
        let mut state = self.state.lock();
        state.unreachable = unreachable;
        if !unreachable {
            let current = state.current.clone();
            let stalled = std::mem::take(&mut state.stalled);
            state
                .subscribers
                .extend(stalled.into_iter().filter(|tx| tx.send(current.clone()).is_ok()));
        }
    }

    /// Make the next sign-ins fail with `error` (`None` to clear).
    pub fn reject_sign_in(&self, error: Option<StoreError>) {
        self.state.lock().reject_sign_in = error;
    }

    /// Make remote sign-out fail. The session stays live and no notification is sent.
    pub fn fail_sign_out(&self, fail: bool) {
        self.state.lock().fail_sign_out = fail;
    }

    /// Simulate a server-side revocation of the current session.
    pub fn revoke(&self) {
        let mut state = self.state.lock();
        state.current = None;
        state.notify(None);
    }

    /// Push an arbitrary notification to every live subscriber.
    pub fn emit(&self, change: Option<Session>) {
        let mut state = self.state.lock();
        state.current.clone_from(&change);
        state.notify(change);
    }

    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.state.lock().current.clone()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}

impl SessionStore for MemorySessionStore {
    async fn sign_in_with_credential(
        &self,
        credential: &SessionCredential,
    ) -> Result<Session, StoreError> {
        let mut state = self.state.lock();
        if let Some(err) = state.reject_sign_in.clone() {
            return Err(err);
        }

        let claims = credential.claims();
        let subject = SubjectId(claims.sub.clone());
        let now = OffsetDateTime::now_utc();
        let created_at = *state.accounts.entry(subject.clone()).or_insert(now);

        let session = Session {
            subject,
            email: claims.email.clone(),
            display_name: claims.name.clone(),
            issued_at: now,
            created_at: Some(created_at),
        };
        state.current = Some(session.clone());
        state.notify(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.fail_sign_out {
            return Err(StoreError::Unavailable("sign-out request failed".into()));
        }
        state.current = None;
        state.notify(None);
        Ok(())
    }

    async fn on_session_changed(&self) -> Result<SessionSubscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        if state.unreachable {
            state.stalled.push(tx);
        } else {
            // Initial notification carries the current (possibly restored) state.
            let _ = tx.send(state.current.clone());
            state.subscribers.push(tx);
        }
        Ok(SessionSubscription::new(rx))
    }
}

#[derive(Default)]
struct DocumentState {
    documents: HashMap<(String, String), JsonValue>,
    unavailable: bool,
}

/// In-memory document service with create-if-absent semantics.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<DocumentState>>,
    creates: Arc<AtomicUsize>,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every read and write fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Seed a document directly.
    pub fn insert(&self, collection: &str, id: &str, fields: JsonValue) {
        self.state
            .lock()
            .documents
            .insert((collection.to_owned(), id.to_owned()), fields);
    }

    #[must_use]
    pub fn document(&self, collection: &str, id: &str) -> Option<JsonValue> {
        self.state
            .lock()
            .documents
            .get(&(collection.to_owned(), id.to_owned()))
            .cloned()
    }

    /// Number of documents actually created through [`DocumentStore::create_document`].
    #[must_use]
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

impl DocumentStore for MemoryDocumentStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<JsonValue>, StoreError> {
        let snapshot = {
            let state = self.state.lock();
            if state.unavailable {
                return Err(StoreError::Unavailable("document store offline".into()));
            }
            state
                .documents
                .get(&(collection.to_owned(), id.to_owned()))
                .cloned()
        };
        // A network read completes after other tasks had a chance to run.
        tokio::task::yield_now().await;
        Ok(snapshot)
    }

    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: JsonValue,
    ) -> Result<CreateOutcome, StoreError> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(StoreError::Unavailable("document store offline".into()));
        }
        let key = (collection.to_owned(), id.to_owned());
        if state.documents.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.documents.insert(key, fields);
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(CreateOutcome::Created)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::credential::to_session_credential;
    use crate::credential::tests::fake_id_token;

    #[tokio::test]
    async fn test_subscription_delivers_current_then_changes() {
        let store = MemorySessionStore::with_persisted_session(Session::new("u1"));
        let mut sub = store.on_session_changed().await.unwrap();

        assert_eq!(sub.next().await.unwrap().unwrap().subject.as_str(), "u1");
        store.sign_out().await.unwrap();
        assert_eq!(sub.next().await, Some(None));
    }

    #[tokio::test]
    async fn test_sign_in_uses_token_claims() {
        let store = MemorySessionStore::new();
        let token = fake_id_token(&json!({
            "sub": "u1",
            "name": "Alice",
            "email": "alice@example.com",
        }));
        let cred = to_session_credential(Some(&token), None).unwrap();

        let first = store.sign_in_with_credential(&cred).await.unwrap();
        let second = store.sign_in_with_credential(&cred).await.unwrap();

        assert_eq!(first.display_name.as_deref(), Some("Alice"));
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(store.current(), Some(second));
    }

    #[tokio::test]
    async fn test_reconnect_feeds_stalled_subscriptions() {
        let store = MemorySessionStore::with_persisted_session(Session::new("u1"));
        store.set_unreachable(true);
        let mut sub = store.on_session_changed().await.unwrap();
        assert_eq!(store.subscriber_count(), 0);

        store.set_unreachable(false);
        assert_eq!(sub.next().await.unwrap().unwrap().subject.as_str(), "u1");
        assert_eq!(store.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let store = MemorySessionStore::new();
        let sub = store.on_session_changed().await.unwrap();
        assert_eq!(store.subscriber_count(), 1);
        drop(sub);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_create_is_create_if_absent() {
        let store = MemoryDocumentStore::new();
        let first = store.create_document("users", "u1", json!({ "name": "Alice" })).await;
        let second = store.create_document("users", "u1", json!({ "name": "Bob" })).await;

        assert_eq!(first, Ok(CreateOutcome::Created));
        assert_eq!(second, Ok(CreateOutcome::AlreadyExists));
        assert_eq!(store.document("users", "u1"), Some(json!({ "name": "Alice" })));
        assert_eq!(store.creates(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_reads_and_writes() {
        let store = MemoryDocumentStore::new();
        store.set_unavailable(true);
        assert!(store.get_document("users", "u1").await.is_err());
        assert!(store.create_document("users", "u1", json!({})).await.is_err());
        assert_eq!(store.creates(), 0);
    }
}
