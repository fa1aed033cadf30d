//! Agenda sync engine.
//!
//! Keeps a user-visible task list synchronized with a remote document store
//! while letting the user mutate it optimistically. The pieces, leaves first:
//!
//! - [`mutation`]: validation and bookkeeping of create/update/delete intents
//! - [`reconcile`]: merges an authoritative snapshot with pending optimistic rows
//! - [`diff`]: index-level insert/remove/update/move ops for the rendering layer
//! - [`list`]: [`TodoList`], the synchronous working list tying the above together
//! - [`subscriptions`]: one live, generation-tagged subscription per signed-in user
//! - [`actor`]: [`SyncHandle`], the task that serializes everything onto one queue
//!
//! The store and identity provider are external collaborators, described by
//! the traits in [`store`]. [`MemoryStore`] is an in-process implementation
//! used by tests and the CLI.

pub mod actor;
pub mod config;
pub mod constants;
pub mod diff;
pub mod events;
pub mod list;
pub mod memory;
pub mod mutation;
pub mod reconcile;
pub mod store;
pub mod subscriptions;

pub use actor::{ListView, SyncHandle, spawn_sync};
pub use config::{ClientConfig, ConfigError};
pub use diff::{ApplyError, ItemKey, ListItem, ListOp, apply_ops, diff};
pub use events::ListEvent;
pub use list::{Mutation, TodoList, WriteResolution};
pub use memory::MemoryStore;
pub use mutation::{
    MutationError, MutationKind, PendingWrites, SlotId, SlotState, ValidationError, WriteOutcome,
    WriteRequest,
};
pub use reconcile::{Reconciled, parse_snapshot, reconcile};
pub use store::{
    DocumentStore, IdentityProvider, LocalIdentity, SnapshotStream, StoreError, TodoQuery,
};
pub use subscriptions::{SubscriptionGeneration, SubscriptionManager, SubscriptionState, SyncError};

pub use agenda_types::{Document, Todo, TodoFields, TodoId, TodoPatch, UserId};
