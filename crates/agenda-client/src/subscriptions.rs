//! Subscription manager: at most one live query, for the signed-in user.
//!
//! ```text
//! Unsubscribed ──open──▶ Subscribing ──snapshot──▶ Active ──error──▶ Error
//!      ▲                      │                      │    ◀─snapshot─┘
//!      └────────close─────────┴──────────────────────┘
//! ```
//!
//! Each open spawns a forwarder task that drains the store's stream into a
//! channel, tagging every item with the [`SubscriptionGeneration`] it was
//! opened under. Teardown aborts the forwarder and bumps the generation, so
//! anything already queued from the old subscription is rejected by
//! [`SubscriptionManager::accept`].

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use agenda_types::{Document, UserId};

use crate::store::{DocumentStore, SnapshotStream, StoreError, TodoQuery};

// ============================================================================
// State
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    Subscribing { user: UserId },
    Active { user: UserId },
    Error { user: UserId, message: String },
}

impl SubscriptionState {
    pub fn user(&self) -> Option<&UserId> {
        match self {
            SubscriptionState::Unsubscribed => None,
            SubscriptionState::Subscribing { user }
            | SubscriptionState::Active { user }
            | SubscriptionState::Error { user, .. } => Some(user),
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionState::Unsubscribed => write!(f, "unsubscribed"),
            SubscriptionState::Subscribing { user } => write!(f, "subscribing ({user})"),
            SubscriptionState::Active { user } => write!(f, "active ({user})"),
            SubscriptionState::Error { user, message } => write!(f, "error ({user}): {message}"),
        }
    }
}

/// Monotonic subscription counter, bumped on every open and close.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionGeneration(pub u64);

/// Subscription-level failure. Never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("subscription error: {0}")]
    Subscription(String),
    #[error("snapshot stream ended")]
    StreamEnded,
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Subscription(e.to_string())
    }
}

// ============================================================================
// Forwarding
// ============================================================================

/// One item drained from the store's stream.
#[derive(Debug)]
pub enum Pushed {
    Snapshot(Vec<Document>),
    Error(StoreError),
    Ended,
}

#[derive(Debug)]
pub struct SubscriptionEvent {
    pub generation: SubscriptionGeneration,
    pub pushed: Pushed,
}

/// What an accepted event means for the working list.
#[derive(Debug)]
pub enum Accepted {
    Snapshot(Vec<Document>),
    Failed(SyncError),
}

async fn forward(
    generation: SubscriptionGeneration,
    mut stream: SnapshotStream,
    sink: mpsc::UnboundedSender<SubscriptionEvent>,
) {
    while let Some(item) = stream.next().await {
        let pushed = match item {
            Ok(docs) => Pushed::Snapshot(docs),
            Err(e) => Pushed::Error(e),
        };
        if sink.send(SubscriptionEvent { generation, pushed }).is_err() {
            trace!(?generation, "subscription sink closed, forwarder exiting");
            return;
        }
    }
    let _ = sink.send(SubscriptionEvent { generation, pushed: Pushed::Ended });
}

// ============================================================================
// Manager
// ============================================================================

pub struct SubscriptionManager {
    store: Arc<dyn DocumentStore>,
    collection: String,
    generation: SubscriptionGeneration,
    state: SubscriptionState,
    forwarder: Option<JoinHandle<()>>,
    sink: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl SubscriptionManager {
    /// Returns the manager and the receiving end of its forwarded events.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let (sink, rx) = mpsc::unbounded_channel();
        let manager = Self {
            store,
            collection: collection.into(),
            generation: SubscriptionGeneration::default(),
            state: SubscriptionState::Unsubscribed,
            forwarder: None,
            sink,
        };
        (manager, rx)
    }

    pub fn state(&self) -> &SubscriptionState {
        &self.state
    }

    pub fn generation(&self) -> SubscriptionGeneration {
        self.generation
    }

    /// True while a forwarder for `user` is running.
    pub fn is_open_for(&self, user: &UserId) -> bool {
        self.forwarder.is_some() && self.state.user() == Some(user)
    }

    /// Open the query for `user`, tearing down any other subscription first.
    /// Must be called from within a tokio runtime.
    pub fn open(&mut self, user: UserId) {
        if self.is_open_for(&user) {
            trace!(%user, "subscription already open");
            return;
        }
        self.teardown();
        self.generation.0 += 1;
        info!(%user, generation = self.generation.0, collection = %self.collection, "opening subscription");

        let stream = self.store.subscribe(TodoQuery::new(self.collection.clone(), user.clone()));
        self.forwarder = Some(tokio::spawn(forward(self.generation, stream, self.sink.clone())));
        self.state = SubscriptionState::Subscribing { user };
    }

    /// Tear down the subscription. Idempotent.
    pub fn close(&mut self) {
        if self.forwarder.is_none() && self.state == SubscriptionState::Unsubscribed {
            return;
        }
        self.teardown();
        self.generation.0 += 1;
        self.state = SubscriptionState::Unsubscribed;
        info!(generation = self.generation.0, "subscription closed");
    }

    fn teardown(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }

    /// Filter a forwarded event. Events from an older generation are dropped.
    pub fn accept(&mut self, event: SubscriptionEvent) -> Option<Accepted> {
        if event.generation != self.generation {
            debug!(
                event = event.generation.0,
                current = self.generation.0,
                "dropping event from stale subscription"
            );
            return None;
        }
        let user = self.state.user()?.clone();

        match event.pushed {
            Pushed::Snapshot(docs) => {
                trace!(documents = docs.len(), "snapshot accepted");
                self.state = SubscriptionState::Active { user };
                Some(Accepted::Snapshot(docs))
            }
            Pushed::Error(e) => {
                warn!(%user, error = %e, "subscription error");
                self.state = SubscriptionState::Error { user, message: e.to_string() };
                Some(Accepted::Failed(e.into()))
            }
            Pushed::Ended => {
                warn!(%user, "snapshot stream ended");
                self.forwarder = None;
                let err = SyncError::StreamEnded;
                self.state = SubscriptionState::Error { user, message: err.to_string() };
                Some(Accepted::Failed(err))
            }
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
