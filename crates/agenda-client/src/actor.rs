//! The sync actor.
//!
//! One tokio task owns the [`TodoList`] and the [`SubscriptionManager`] and
//! serializes everything that touches them: handle commands, identity changes,
//! forwarded snapshots and write completions. Remote writes run in their own
//! tasks and report back through a channel, tagged with the session epoch.
//!
//! ```text
//!   SyncHandle (Clone+Send+Sync)   mpsc     SyncActor (one task)
//!   ┌──────────────────────┐   ────────▶  ┌─────────────────────────────┐
//!   │ .create()            │              │ TodoList                    │
//!   │ .rename() ...        │   ◀────────  │ SubscriptionManager ◀─ store│
//!   └──────────────────────┘    oneshot   │ write tasks ──▶ completions │
//!            ▲                            └──────────────┬──────────────┘
//!            └──────────── broadcast<ListEvent> ─────────┘
//! ```
//!
//! Mutation calls reply once the optimistic effect is applied and its
//! [`ListEvent::Diff`] broadcast, before the remote write resolves.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, trace};

use agenda_types::{Todo, TodoId, UserId};

use crate::config::ClientConfig;
use crate::diff::ListOp;
use crate::events::ListEvent;
use crate::list::{Mutation, TodoList, WriteResolution};
use crate::mutation::{MutationError, WriteOutcome};
use crate::store::{DocumentStore, IdentityProvider};
use crate::subscriptions::{Accepted, SubscriptionEvent, SubscriptionManager, SubscriptionState};

// ============================================================================
// Commands (internal)
// ============================================================================

type Reply<T> = oneshot::Sender<Result<T, MutationError>>;

enum Command {
    Create { text: String, due_at: Option<u64>, reply: Reply<Todo> },
    SetCompleted { id: TodoId, completed: bool, reply: Reply<()> },
    Rename { id: TodoId, text: String, reply: Reply<()> },
    SetDue { id: TodoId, due_at: Option<u64>, reply: Reply<()> },
    Delete { id: TodoId, reply: Reply<()> },
    Items { reply: oneshot::Sender<ListView> },
    State { reply: oneshot::Sender<SubscriptionState> },
    Shutdown { reply: oneshot::Sender<()> },
}

struct WriteDone {
    epoch: u64,
    outcome: WriteOutcome,
}

/// The working list as of `version`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListView {
    pub version: u64,
    pub todos: Vec<Todo>,
}

// ============================================================================
// SyncHandle (Send + Sync public API)
// ============================================================================

#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ListEvent>,
}

impl SyncHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, MutationError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| MutationError::Shutdown)?;
        rx.await.map_err(|_| MutationError::Shutdown)?
    }

    /// Create a task. Returns the optimistic record already shown.
    pub async fn create(&self, text: &str, due_at: Option<u64>) -> Result<Todo, MutationError> {
        let text = text.to_string();
        self.call(|reply| Command::Create { text, due_at, reply }).await
    }

    pub async fn set_completed(&self, id: &TodoId, completed: bool) -> Result<(), MutationError> {
        let id = id.clone();
        self.call(|reply| Command::SetCompleted { id, completed, reply }).await
    }

    pub async fn rename(&self, id: &TodoId, text: &str) -> Result<(), MutationError> {
        let (id, text) = (id.clone(), text.to_string());
        self.call(|reply| Command::Rename { id, text, reply }).await
    }

    /// Set or clear (`None`) the deadline.
    pub async fn set_due(&self, id: &TodoId, due_at: Option<u64>) -> Result<(), MutationError> {
        let id = id.clone();
        self.call(|reply| Command::SetDue { id, due_at, reply }).await
    }

    pub async fn delete(&self, id: &TodoId) -> Result<(), MutationError> {
        let id = id.clone();
        self.call(|reply| Command::Delete { id, reply }).await
    }

    /// Current working list. Use this to resynchronize after lagging behind
    /// the event broadcast.
    pub async fn items(&self) -> Result<ListView, MutationError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Items { reply }).map_err(|_| MutationError::Shutdown)?;
        rx.await.map_err(|_| MutationError::Shutdown)
    }

    pub async fn state(&self) -> Result<SubscriptionState, MutationError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::State { reply }).map_err(|_| MutationError::Shutdown)?;
        rx.await.map_err(|_| MutationError::Shutdown)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ListEvent> {
        self.events.subscribe()
    }

    /// Tear down the subscription and stop the actor. Writes already issued
    /// still run to completion; their results are dropped.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

// ============================================================================
// SyncActor (internal)
// ============================================================================

struct SyncActor {
    list: TodoList,
    subscriptions: SubscriptionManager,
    store: Arc<dyn DocumentStore>,
    collection: String,
    events: broadcast::Sender<ListEvent>,
    writes: mpsc::UnboundedSender<WriteDone>,
    status: SubscriptionState,
}

impl SyncActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut identity: watch::Receiver<Option<UserId>>,
        mut pushed: mpsc::UnboundedReceiver<SubscriptionEvent>,
        mut writes: mpsc::UnboundedReceiver<WriteDone>,
    ) {
        let initial = identity.borrow_and_update().clone();
        self.on_identity(initial);
        let mut identity_open = true;

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        self.subscriptions.close();
                        self.sync_status();
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                changed = identity.changed(), if identity_open => match changed {
                    Ok(()) => {
                        let user = identity.borrow_and_update().clone();
                        self.on_identity(user);
                    }
                    Err(_) => {
                        debug!("identity provider dropped, keeping current session");
                        identity_open = false;
                    }
                },
                Some(event) = pushed.recv() => self.on_pushed(event),
                Some(done) = writes.recv() => self.on_write_done(done),
            }
        }
        info!("sync actor stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Create { text, due_at, reply } => {
                let result = self.list.create(&text, due_at).map(|(mutation, record)| {
                    self.issue(mutation);
                    record
                });
                let _ = reply.send(result);
            }
            Command::SetCompleted { id, completed, reply } => {
                let result = self.list.set_completed(&id, completed).map(|m| self.issue(m));
                let _ = reply.send(result);
            }
            Command::Rename { id, text, reply } => {
                let result = self.list.rename(&id, &text).map(|m| self.issue(m));
                let _ = reply.send(result);
            }
            Command::SetDue { id, due_at, reply } => {
                let result = self.list.set_due(&id, due_at).map(|m| self.issue(m));
                let _ = reply.send(result);
            }
            Command::Delete { id, reply } => {
                let result = self.list.delete(&id).map(|m| self.issue(m));
                let _ = reply.send(result);
            }
            Command::Items { reply } => {
                let _ = reply.send(ListView { version: self.list.version(), todos: self.list.todos() });
            }
            Command::State { reply } => {
                let _ = reply.send(self.subscriptions.state().clone());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Broadcast the local effect, then issue the write in its own task.
    fn issue(&mut self, mutation: Mutation) {
        let Mutation { request, epoch, ops } = mutation;
        self.emit_diff(ops);

        let kind = request.kind();
        trace!(%kind, epoch, "issuing write");
        let store = self.store.clone();
        let collection = self.collection.clone();
        let writes = self.writes.clone();
        tokio::spawn(async move {
            let outcome = request.execute(store.as_ref(), &collection).await;
            let _ = writes.send(WriteDone { epoch, outcome });
        });
    }

    fn on_identity(&mut self, user: Option<UserId>) {
        let ops = self.list.set_user(user.clone());
        self.emit_diff(ops);
        match user {
            Some(user) => self.subscriptions.open(user),
            None => self.subscriptions.close(),
        }
        self.sync_status();
    }

    fn on_pushed(&mut self, event: SubscriptionEvent) {
        let accepted = self.subscriptions.accept(event);
        self.sync_status();
        match accepted {
            Some(Accepted::Snapshot(docs)) => {
                let ops = self.list.apply_documents(docs);
                self.emit_diff(ops);
                self.emit(ListEvent::Synced { count: self.list.len() });
            }
            Some(Accepted::Failed(err)) => self.emit(ListEvent::SyncError(err)),
            None => {}
        }
    }

    fn on_write_done(&mut self, done: WriteDone) {
        match self.list.complete_write(done.epoch, done.outcome) {
            WriteResolution::Applied { kind, ops } => {
                self.emit_diff(ops);
                self.emit(ListEvent::MutationApplied { kind });
            }
            WriteResolution::Failed { kind, message, ops } => {
                self.emit_diff(ops);
                self.emit(ListEvent::MutationFailed { kind, message });
            }
            WriteResolution::Stale => {}
        }
    }

    fn sync_status(&mut self) {
        let current = self.subscriptions.state();
        if *current != self.status {
            self.status = current.clone();
            debug!(status = %self.status, "subscription status");
            self.emit(ListEvent::Status(self.status.clone()));
        }
    }

    fn emit_diff(&self, ops: Vec<ListOp>) {
        if !ops.is_empty() {
            self.emit(ListEvent::Diff { version: self.list.version(), ops });
        }
    }

    fn emit(&self, event: ListEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

// ============================================================================
// Public spawn function
// ============================================================================

/// Spawn the sync actor on the current tokio runtime.
///
/// The actor follows `identity` from now on: it opens the subscription for
/// whoever is signed in and tears it down on sign-out.
pub fn spawn_sync(
    store: Arc<dyn DocumentStore>,
    identity: &dyn IdentityProvider,
    config: &ClientConfig,
) -> SyncHandle {
    let (tx, commands) = mpsc::unbounded_channel();
    let (writes_tx, writes) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(config.event_capacity.max(1));
    let (subscriptions, pushed) = SubscriptionManager::new(store.clone(), config.collection.clone());

    let actor = SyncActor {
        list: TodoList::new(),
        subscriptions,
        store,
        collection: config.collection.clone(),
        events: events.clone(),
        writes: writes_tx,
        status: SubscriptionState::Unsubscribed,
    };
    tokio::spawn(actor.run(commands, identity.watch(), pushed, writes));

    SyncHandle { tx, events }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::LocalIdentity;

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let identity = LocalIdentity::signed_in("u1");
        let handle = spawn_sync(Arc::new(MemoryStore::new()), &identity, &ClientConfig::default());
        handle.shutdown().await;

        assert_eq!(handle.create("x", None).await, Err(MutationError::Shutdown));
        assert_eq!(handle.items().await, Err(MutationError::Shutdown));
        // Idempotent.
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_signed_out_mutations_rejected() {
        let identity = LocalIdentity::new(None);
        let handle = spawn_sync(Arc::new(MemoryStore::new()), &identity, &ClientConfig::default());
        assert_eq!(handle.create("x", None).await, Err(MutationError::NotSignedIn));
        assert_eq!(handle.state().await, Ok(SubscriptionState::Unsubscribed));
    }
}
