//! Collaborator contracts: the remote document store and the identity provider.
//!
//! The core never implements storage. It issues one-shot writes, consumes a
//! stream of complete ordered snapshots, and reads the current identity.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::watch;

use agenda_types::{Document, TodoFields, TodoId, TodoPatch, UserId};

/// Live query results: every item is either a complete, ordered snapshot of
/// the matching documents or a transport error. Dropping the stream
/// unsubscribes.
pub type SnapshotStream = BoxStream<'static, Result<Vec<Document>, StoreError>>;

/// Errors reported by the document store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("document not found: {0}")]
    NotFound(TodoId),
}

/// The filtered, ordered view a subscription observes: every document in
/// `collection` owned by `user_id`, ordered by `createdAt` descending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TodoQuery {
    pub collection: String,
    pub user_id: UserId,
}

impl TodoQuery {
    pub fn new(collection: impl Into<String>, user_id: UserId) -> Self {
        Self { collection: collection.into(), user_id }
    }

    /// Whether a document in `collection` falls inside this query's filter.
    pub fn matches(&self, collection: &str, doc: &Document) -> bool {
        self.collection == collection && doc.user_id() == Some(self.user_id.as_str())
    }
}

/// The remote document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document; the store assigns its id and `createdAt`.
    async fn create(&self, collection: &str, fields: TodoFields) -> Result<TodoId, StoreError>;

    /// Update fields of an existing document.
    async fn update(&self, collection: &str, id: &TodoId, patch: TodoPatch)
        -> Result<(), StoreError>;

    async fn delete(&self, collection: &str, id: &TodoId) -> Result<(), StoreError>;

    /// Open a live query. The current snapshot is pushed first, then one
    /// snapshot per change. Retries on transport failure are the store's job.
    fn subscribe(&self, query: TodoQuery) -> SnapshotStream;
}

/// Source of the signed-in identity.
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<UserId>;

    /// Change notifications; the value is the identity after the change.
    fn watch(&self) -> watch::Receiver<Option<UserId>>;
}

/// An identity provider driven locally (tests, CLI).
#[derive(Debug)]
pub struct LocalIdentity {
    tx: watch::Sender<Option<UserId>>,
}

impl LocalIdentity {
    pub fn new(initial: Option<UserId>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn signed_in(user: impl Into<UserId>) -> Self {
        Self::new(Some(user.into()))
    }

    pub fn sign_in(&self, user: impl Into<UserId>) {
        self.set(Some(user.into()));
    }

    pub fn sign_out(&self) {
        self.set(None);
    }

    fn set(&self, user: Option<UserId>) {
        self.tx.send_if_modified(|current| {
            if *current == user {
                false
            } else {
                *current = user;
                true
            }
        });
    }
}

impl IdentityProvider for LocalIdentity {
    fn current(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<UserId>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_query_filters_by_collection_and_owner() {
        let query = TodoQuery::new("todos", UserId::from("u1"));
        let mine = Document::new("a", json!({ "text": "x", "userId": "u1" }));
        let theirs = Document::new("b", json!({ "text": "x", "userId": "u2" }));
        let untyped = Document::new("c", json!({ "text": "x", "userId": 7 }));

        assert!(query.matches("todos", &mine));
        assert!(!query.matches("other", &mine));
        assert!(!query.matches("todos", &theirs));
        assert!(!query.matches("todos", &untyped));
    }

    #[tokio::test]
    async fn test_local_identity_notifies_only_on_change() {
        let identity = LocalIdentity::new(None);
        let mut rx = identity.watch();
        assert_eq!(identity.current(), None);

        identity.sign_in("u1");
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(UserId::from("u1")));

        identity.sign_in("u1");
        assert!(!rx.has_changed().unwrap());

        identity.sign_out();
        assert!(rx.has_changed().unwrap());
        assert_eq!(identity.current(), None);
    }
}
