//! The `Todo` record and the store's wire shapes.
//!
//! ## Identity
//!
//! A record is either *authoritative* (the store assigned its id and its
//! `created_at`) or *optimistic* (synthesized locally, id unassigned, no
//! `created_at`). Two records are the same record only when both ids are
//! assigned and equal; optimistic records are correlated by the mutation
//! bookkeeping in the client, never by value.
//!
//! ## Wire format
//!
//! The store pushes [`Document`]s: an id plus a loosely typed JSON object with
//! camelCase field names (`text`, `completed`, `userId`, `dueAt`, `createdAt`).
//! Timestamps are Unix milliseconds.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ids::{TodoId, UserId};

/// A task owned by one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: TodoId,
    pub text: String,
    pub completed: bool,
    pub user_id: UserId,
    /// Deadline, if any.
    pub due_at: Option<u64>,
    /// Server write time. Absent only while the record is optimistic.
    pub created_at: Option<u64>,
}

impl Todo {
    /// Synthesize an optimistic record for a create that has not been
    /// acknowledged yet.
    pub fn optimistic(user_id: UserId, text: impl Into<String>, due_at: Option<u64>) -> Self {
        Self {
            id: TodoId::unassigned(),
            text: text.into(),
            completed: false,
            user_id,
            due_at,
            created_at: None,
        }
    }

    /// True while the store has not assigned an id.
    pub fn is_pending(&self) -> bool {
        !self.id.is_assigned()
    }

    /// Sort order of the working list: `created_at` descending, records
    /// without a `created_at` first.
    pub fn newest_first(a: &Todo, b: &Todo) -> Ordering {
        match (a.created_at, b.created_at) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => y.cmp(&x),
        }
    }

    /// Parse a pushed document.
    pub fn from_document(doc: Document) -> Result<Self, ParseError> {
        let id = TodoId::new(doc.id);
        if !id.is_assigned() {
            return Err(ParseError::MissingId);
        }
        match serde_json::from_value::<WireTodo>(doc.fields) {
            Ok(wire) => Ok(Self {
                id,
                text: wire.text,
                completed: wire.completed,
                user_id: wire.user_id,
                due_at: wire.due_at,
                created_at: wire.created_at,
            }),
            Err(source) => Err(ParseError::Malformed { id, source }),
        }
    }
}

/// The stored field set of a todo, as read back from a document.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTodo {
    text: String,
    #[serde(default)]
    completed: bool,
    user_id: UserId,
    #[serde(default)]
    due_at: Option<u64>,
    #[serde(default)]
    created_at: Option<u64>,
}

/// A record as pushed by the document store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        Self { id: id.into(), fields }
    }

    /// Owner as written in the document, if present and a string.
    pub fn user_id(&self) -> Option<&str> {
        self.fields.get("userId").and_then(Value::as_str)
    }

    /// Server timestamp as written in the document, if present and numeric.
    pub fn created_at(&self) -> Option<u64> {
        self.fields.get("createdAt").and_then(Value::as_u64)
    }
}

/// Error parsing a single snapshot entry.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("document has no id")]
    MissingId,

    #[error("malformed document {id}: {source}")]
    Malformed {
        id: TodoId,
        #[source]
        source: serde_json::Error,
    },
}

/// Payload of a create write. The store adds `createdAt` itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoFields {
    pub text: String,
    pub completed: bool,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<u64>,
}

impl TodoFields {
    pub fn new(user_id: UserId, text: impl Into<String>, due_at: Option<u64>) -> Self {
        Self {
            text: text.into(),
            completed: false,
            user_id,
            due_at,
        }
    }

    /// Fields of an optimistic record carrying this payload.
    pub fn to_optimistic(&self) -> Todo {
        Todo::optimistic(self.user_id.clone(), self.text.clone(), self.due_at)
    }
}

/// A partial field update. `None` leaves a field untouched; for `due_at`,
/// `Some(None)` clears the deadline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TodoPatch {
    pub text: Option<String>,
    pub completed: Option<bool>,
    pub due_at: Option<Option<u64>>,
}

impl TodoPatch {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Self::default() }
    }

    pub fn completed(completed: bool) -> Self {
        Self { completed: Some(completed), ..Self::default() }
    }

    pub fn due_at(due_at: Option<u64>) -> Self {
        Self { due_at: Some(due_at), ..Self::default() }
    }

    /// Apply to an in-memory record.
    pub fn apply_to(&self, todo: &mut Todo) {
        if let Some(text) = &self.text {
            todo.text = text.clone();
        }
        if let Some(completed) = self.completed {
            todo.completed = completed;
        }
        if let Some(due_at) = self.due_at {
            todo.due_at = due_at;
        }
    }

    /// Apply to a stored field object (camelCase keys).
    pub fn apply_to_fields(&self, fields: &mut Map<String, Value>) {
        if let Some(text) = &self.text {
            fields.insert("text".into(), Value::from(text.as_str()));
        }
        if let Some(completed) = self.completed {
            fields.insert("completed".into(), Value::from(completed));
        }
        match self.due_at {
            Some(Some(due)) => {
                fields.insert("dueAt".into(), Value::from(due));
            }
            Some(None) => {
                fields.remove("dueAt");
            }
            None => {}
        }
    }
}
