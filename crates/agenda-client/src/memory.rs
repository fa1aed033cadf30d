//! In-process [`DocumentStore`].
//!
//! Behaves like the hosted store the client is written against: ids are
//! assigned by the store (UUIDv7), `createdAt` is a server timestamp that
//! strictly increases across writes, and every listener whose query matches a
//! changed collection receives a fresh, complete, ordered snapshot. A write is
//! acknowledged before the snapshot reflecting it is published.
//!
//! Documents without `createdAt` never match a query ordered by it, as with
//! the hosted store.
//!
//! Fault injection for tests and demos: [`fail_next_write`](MemoryStore::fail_next_write),
//! [`set_latency`](MemoryStore::set_latency), [`push_error`](MemoryStore::push_error),
//! [`insert_raw`](MemoryStore::insert_raw).

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, trace};
use uuid::Uuid;

use agenda_types::{Document, TodoFields, TodoId, TodoPatch, now_millis};

use crate::constants::ORDER_KEY;
use crate::store::{DocumentStore, SnapshotStream, StoreError, TodoQuery};

type Pushed = Result<Vec<Document>, StoreError>;

struct Listener {
    query: TodoQuery,
    tx: mpsc::UnboundedSender<Pushed>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Value>>,
    listeners: Vec<Listener>,
    last_timestamp: u64,
    latency: Duration,
    fail_next: Option<String>,
}

impl Inner {
    fn next_timestamp(&mut self) -> u64 {
        let now = now_millis().max(self.last_timestamp + 1);
        self.last_timestamp = now;
        now
    }

    fn take_failure(&mut self) -> Result<(), StoreError> {
        match self.fail_next.take() {
            Some(message) => Err(StoreError::Transport(message)),
            None => Ok(()),
        }
    }

    fn snapshot(&self, query: &TodoQuery) -> Vec<Document> {
        let Some(docs) = self.collections.get(&query.collection) else {
            return Vec::new();
        };
        let mut matching: Vec<Document> = docs
            .iter()
            .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
            .filter(|doc| query.matches(&query.collection, doc) && doc.created_at().is_some())
            .collect();
        matching.sort_by_key(|doc| Reverse(doc.created_at()));
        matching
    }

    fn publish(&mut self, collection: &str) {
        let snapshots: Vec<Option<Vec<Document>>> = self
            .listeners
            .iter()
            .map(|l| (l.query.collection == collection).then(|| self.snapshot(&l.query)))
            .collect();
        let mut delivered = 0usize;
        let mut snapshots = snapshots.into_iter();
        self.listeners.retain(|listener| match snapshots.next().flatten() {
            Some(docs) => {
                let ok = listener.tx.unbounded_send(Ok(docs)).is_ok();
                delivered += usize::from(ok);
                ok
            }
            None => !listener.tx.is_closed(),
        });
        trace!(collection, delivered, "published snapshots");
    }
}

/// Cheap to clone; clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next write fails with a transport error carrying `message`.
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.inner.lock().fail_next = Some(message.into());
    }

    /// Delay applied to every write before it resolves.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = latency;
    }

    /// Push an error to every open subscription.
    pub fn push_error(&self, error: StoreError) {
        let mut inner = self.inner.lock();
        inner.listeners.retain(|l| l.tx.unbounded_send(Err(error.clone())).is_ok());
    }

    /// Store `fields` verbatim under `id` and publish immediately.
    pub fn insert_raw(&self, collection: &str, id: &str, fields: Value) {
        let mut inner = self.inner.lock();
        inner.collections.entry(collection.to_string()).or_default().insert(id.to_string(), fields);
        inner.publish(collection);
    }

    /// Every document in `collection`, unfiltered, in id order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        let inner = self.inner.lock();
        inner
            .collections
            .get(collection)
            .map(|docs| docs.iter().map(|(id, v)| Document::new(id.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Number of subscriptions whose stream is still held.
    pub fn listener_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.listeners.retain(|l| !l.tx.is_closed());
        inner.listeners.len()
    }

    /// End every open snapshot stream.
    pub fn close_subscriptions(&self) {
        self.inner.lock().listeners.clear();
    }

    async fn delay(&self) {
        let latency = self.inner.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Publish from a separate task so the write's acknowledgement goes out first.
    fn publish_later(&self, collection: &str) {
        let store = self.clone();
        let collection = collection.to_string();
        tokio::spawn(async move {
            store.inner.lock().publish(&collection);
        });
    }

    fn create_now(&self, collection: &str, fields: &TodoFields) -> Result<TodoId, StoreError> {
        let mut map = match serde_json::to_value(fields) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => return Err(StoreError::Transport(e.to_string())),
        };

        let mut inner = self.inner.lock();
        inner.take_failure()?;
        let id = Uuid::now_v7().simple().to_string();
        let created_at = inner.next_timestamp();
        map.insert(ORDER_KEY.into(), Value::from(created_at));
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), Value::Object(map));
        debug!(collection, id = %id, created_at, "document created");
        Ok(TodoId::new(id))
    }

    fn update_now(&self, collection: &str, id: &TodoId, patch: &TodoPatch) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.take_failure()?;
        let fields = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id.as_str()))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        patch.apply_to_fields(fields);
        debug!(collection, %id, "document updated");
        Ok(())
    }

    fn delete_now(&self, collection: &str, id: &TodoId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.take_failure()?;
        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id.as_str()))
            .is_some();
        debug!(collection, %id, removed, "document deleted");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, collection: &str, fields: TodoFields) -> Result<TodoId, StoreError> {
        self.delay().await;
        let id = self.create_now(collection, &fields)?;
        self.publish_later(collection);
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        id: &TodoId,
        patch: TodoPatch,
    ) -> Result<(), StoreError> {
        self.delay().await;
        self.update_now(collection, id, &patch)?;
        self.publish_later(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &TodoId) -> Result<(), StoreError> {
        self.delay().await;
        self.delete_now(collection, id)?;
        self.publish_later(collection);
        Ok(())
    }

    fn subscribe(&self, query: TodoQuery) -> SnapshotStream {
        let (tx, rx) = mpsc::unbounded();
        let mut inner = self.inner.lock();
        let initial = inner.snapshot(&query);
        debug!(user = %query.user_id, documents = initial.len(), "subscription opened");
        if tx.unbounded_send(Ok(initial)).is_ok() {
            inner.listeners.push(Listener { query, tx });
        }
        rx.boxed()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use agenda_types::{Todo, UserId};

    use super::*;

    fn query(user: &str) -> TodoQuery {
        TodoQuery::new("todos", UserId::from(user))
    }

    async fn next_snapshot(stream: &mut SnapshotStream) -> Vec<Document> {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_increasing_timestamps() {
        let store = MemoryStore::new();
        let a = store.create("todos", TodoFields::new(UserId::from("u1"), "a", None)).await.unwrap();
        let b = store.create("todos", TodoFields::new(UserId::from("u1"), "b", Some(7))).await.unwrap();
        assert!(a.is_assigned());
        assert_ne!(a, b);

        let docs = store.documents("todos");
        let todos: Vec<Todo> = docs.into_iter().map(|d| Todo::from_document(d).unwrap()).collect();
        let ta = todos.iter().find(|t| t.id == a).unwrap();
        let tb = todos.iter().find(|t| t.id == b).unwrap();
        assert!(tb.created_at > ta.created_at);
        assert_eq!(tb.due_at, Some(7));
    }

    #[tokio::test]
    async fn test_subscribe_pushes_current_then_changes_filtered_by_owner() {
        let store = MemoryStore::new();
        store.insert_raw("todos", "x", json!({ "text": "other", "userId": "u2", "createdAt": 1 }));
        let mut stream = store.subscribe(query("u1"));
        assert!(next_snapshot(&mut stream).await.is_empty());

        let id = store.create("todos", TodoFields::new(UserId::from("u1"), "mine", None)).await.unwrap();
        let docs = next_snapshot(&mut stream).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, id.as_str());
    }

    #[tokio::test]
    async fn test_snapshot_ordered_newest_first_and_skips_unordered() {
        let store = MemoryStore::new();
        store.insert_raw("todos", "old", json!({ "text": "o", "userId": "u1", "createdAt": 1 }));
        store.insert_raw("todos", "new", json!({ "text": "n", "userId": "u1", "createdAt": 9 }));
        store.insert_raw("todos", "bare", json!({ "text": "b", "userId": "u1" }));
        let mut stream = store.subscribe(query("u1"));
        let ids: Vec<String> = next_snapshot(&mut stream).await.into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_fail_next_write_fails_once() {
        let store = MemoryStore::new();
        store.fail_next_write("quota exceeded");
        let fields = TodoFields::new(UserId::from("u1"), "a", None);
        let err = store.create("todos", fields.clone()).await.unwrap_err();
        assert_eq!(err, StoreError::Transport("quota exceeded".into()));
        assert!(store.create("todos", fields).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = MemoryStore::new();
        let id = store.create("todos", TodoFields::new(UserId::from("u1"), "a", Some(5))).await.unwrap();

        let patch = TodoPatch { text: Some("b".into()), completed: Some(true), due_at: Some(None) };
        store.update("todos", &id, patch).await.unwrap();
        let todo = Todo::from_document(store.documents("todos").remove(0)).unwrap();
        assert_eq!(todo.text, "b");
        assert!(todo.completed);
        assert_eq!(todo.due_at, None);

        store.delete("todos", &id).await.unwrap();
        assert!(store.documents("todos").is_empty());
        // Deleting again is not an error; updating is.
        store.delete("todos", &id).await.unwrap();
        let err = store.update("todos", &id, TodoPatch::completed(false)).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound(id));
    }

    #[tokio::test]
    async fn test_dropped_streams_are_pruned() {
        let store = MemoryStore::new();
        let stream = store.subscribe(query("u1"));
        assert_eq!(store.listener_count(), 1);
        drop(stream);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_close_subscriptions_ends_streams() {
        let store = MemoryStore::new();
        let mut stream = store.subscribe(query("u1"));
        next_snapshot(&mut stream).await;
        store.close_subscriptions();
        assert!(stream.next().await.is_none());
    }
}
