//! Mutation intents and the bookkeeping of writes still in flight.
//!
//! Intents are validated before anything touches the store: empty text is a
//! [`ValidationError`], and any update or delete addressed to a record the
//! store has not acknowledged (unassigned id) is [`MutationError::InvalidState`].
//!
//! # Create slots
//!
//! Each create is given a [`SlotId`] when its optimistic row is inserted. The
//! slot moves through:
//!
//! ```text
//! open_create() ──▶ InFlight ──(write ok)──▶ Confirmed(id) ──(id seen in snapshot)──▶ settled
//!                      │                          │
//!                      │                          └──(id deleted)──▶ settled (row removed)
//!                      └──(write failed)──▶ abandoned (row removed)
//! ```
//!
//! A record deleted before (or while) its create is acknowledged never shows
//! up in a later snapshot, so a slot confirmed with a removed id settles
//! without waiting for one.
//!
//! Slot ids are never reused, not even across sign-outs, so a late write
//! completion can never be mistaken for a newer create.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use strum::Display;
use thiserror::Error;

use agenda_types::{TodoFields, TodoId, TodoPatch};

use crate::store::{DocumentStore, StoreError};

/// Local identity of an optimistic row.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SlotId(u64);

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotId({})", self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Which mutation an event refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum MutationKind {
    Create,
    SetCompleted,
    Rename,
    SetDueDate,
    Delete,
}

/// Bad user input. Recovered locally, never reaches the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("task text must not be empty")]
    EmptyText,
}

/// Why a mutation intent was refused before any write was issued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("cannot {kind} a record the store has not acknowledged")]
    InvalidState { kind: MutationKind },

    #[error("no signed-in user")]
    NotSignedIn,

    #[error("sync engine shut down")]
    Shutdown,
}

/// Trim and reject empty text.
pub fn validate_text(text: &str) -> Result<String, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    Ok(trimmed.to_string())
}

/// Refuse mutations on records without a store-assigned id.
pub fn require_assigned(id: &TodoId, kind: MutationKind) -> Result<(), MutationError> {
    if id.is_assigned() {
        Ok(())
    } else {
        Err(MutationError::InvalidState { kind })
    }
}

/// A remote write to issue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteRequest {
    Create { slot: SlotId, fields: TodoFields },
    Update { kind: MutationKind, id: TodoId, patch: TodoPatch },
    Delete { id: TodoId },
}

/// The resolved result of a [`WriteRequest`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Created { slot: SlotId, result: Result<TodoId, StoreError> },
    Updated { kind: MutationKind, id: TodoId, result: Result<(), StoreError> },
    Deleted { id: TodoId, result: Result<(), StoreError> },
}

impl WriteRequest {
    pub fn kind(&self) -> MutationKind {
        match self {
            WriteRequest::Create { .. } => MutationKind::Create,
            WriteRequest::Update { kind, .. } => *kind,
            WriteRequest::Delete { .. } => MutationKind::Delete,
        }
    }

    /// Issue the write and wait for the store to resolve it.
    pub async fn execute(self, store: &dyn DocumentStore, collection: &str) -> WriteOutcome {
        match self {
            WriteRequest::Create { slot, fields } => WriteOutcome::Created {
                slot,
                result: store.create(collection, fields).await,
            },
            WriteRequest::Update { kind, id, patch } => {
                let result = store.update(collection, &id, patch).await;
                WriteOutcome::Updated { kind, id, result }
            }
            WriteRequest::Delete { id } => {
                let result = store.delete(collection, &id).await;
                WriteOutcome::Deleted { id, result }
            }
        }
    }
}

impl WriteOutcome {
    pub fn kind(&self) -> MutationKind {
        match self {
            WriteOutcome::Created { .. } => MutationKind::Create,
            WriteOutcome::Updated { kind, .. } => *kind,
            WriteOutcome::Deleted { .. } => MutationKind::Delete,
        }
    }
}

/// State of one create slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Write issued, no acknowledgement yet.
    InFlight,
    /// Store assigned this id; waiting for it to appear in a snapshot.
    Confirmed(TodoId),
}

/// Writes whose effects are not yet reflected by an authoritative snapshot.
#[derive(Debug, Default)]
pub struct PendingWrites {
    next_slot: u64,
    creates: BTreeMap<SlotId, SlotState>,
    deletes: HashSet<TodoId>,
    /// Ids whose delete succeeded this session.
    retired: HashSet<TodoId>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot for a new optimistic create.
    pub fn open_create(&mut self) -> SlotId {
        self.next_slot += 1;
        let slot = SlotId(self.next_slot);
        self.creates.insert(slot, SlotState::InFlight);
        slot
    }

    /// Record the id the store assigned. Returns false for unknown slots.
    pub fn confirm_create(&mut self, slot: SlotId, id: TodoId) -> bool {
        match self.creates.get_mut(&slot) {
            Some(state) => {
                *state = SlotState::Confirmed(id);
                true
            }
            None => false,
        }
    }

    /// Forget a slot whose write failed. Returns false for unknown slots.
    pub fn abandon_create(&mut self, slot: SlotId) -> bool {
        self.creates.remove(&slot).is_some()
    }

    /// Forget a slot whose record is now authoritative.
    pub fn settle(&mut self, slot: SlotId) {
        self.creates.remove(&slot);
    }

    pub fn slot_state(&self, slot: SlotId) -> Option<&SlotState> {
        self.creates.get(&slot)
    }

    /// The slot whose create was confirmed with `id`, if still tracked.
    pub fn slot_confirmed_as(&self, id: &TodoId) -> Option<SlotId> {
        self.creates.iter().find_map(|(slot, state)| match state {
            SlotState::Confirmed(confirmed) if confirmed == id => Some(*slot),
            _ => None,
        })
    }

    pub fn pending_creates(&self) -> usize {
        self.creates.len()
    }

    pub fn begin_delete(&mut self, id: TodoId) {
        self.deletes.insert(id);
    }

    /// Returns false if no delete of `id` was in flight.
    pub fn finish_delete(&mut self, id: &TodoId) -> bool {
        self.deletes.remove(id)
    }

    pub fn is_deleting(&self, id: &TodoId) -> bool {
        self.deletes.contains(id)
    }

    /// Remember that `id` is gone from the store.
    pub fn retire(&mut self, id: TodoId) {
        self.retired.insert(id);
    }

    /// Deleted, or being deleted.
    pub fn is_removed(&self, id: &TodoId) -> bool {
        self.deletes.contains(id) || self.retired.contains(id)
    }

    /// Drop all bookkeeping. The slot counter keeps counting.
    pub fn clear(&mut self) {
        self.creates.clear();
        self.deletes.clear();
        self.retired.clear();
    }
}
