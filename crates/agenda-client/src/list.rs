//! The synced working list.
//!
//! [`TodoList`] owns the rows the presentation layer renders together with
//! the bookkeeping of writes still in flight. Every state change returns the
//! [`ListOp`]s that describe it, so it can be driven and asserted on without a
//! runtime; the sync actor wraps it and does the I/O.
//!
//! # Sessions
//!
//! A session is one signed-in identity. Switching identity clears the list,
//! drops pending bookkeeping and bumps the epoch. Write completions carry the
//! epoch they were issued under and are discarded when it no longer matches.

use tracing::{debug, info, trace, warn};

use agenda_types::{Document, Todo, TodoFields, TodoId, TodoPatch, UserId};

use crate::diff::{ItemKey, ListItem, ListOp, diff};
use crate::mutation::{
    MutationError, MutationKind, PendingWrites, SlotId, WriteOutcome, WriteRequest,
    require_assigned, validate_text,
};
use crate::reconcile::{parse_snapshot, reconcile};

/// A validated intent: its local effect has already been applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    /// The remote write still to be issued.
    pub request: WriteRequest,
    /// Session the write belongs to.
    pub epoch: u64,
    /// Ops describing the local effect (may be empty).
    pub ops: Vec<ListOp>,
}

/// What a write completion did to the list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteResolution {
    Applied { kind: MutationKind, ops: Vec<ListOp> },
    Failed { kind: MutationKind, message: String, ops: Vec<ListOp> },
    /// Issued under a previous session; ignored.
    Stale,
}

#[derive(Debug, Default)]
pub struct TodoList {
    user: Option<UserId>,
    items: Vec<ListItem>,
    pending: PendingWrites,
    epoch: u64,
    version: u64,
}

impl TodoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Bumped on every change that produced ops.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[ListItem] {
        &self.items
    }

    pub fn todos(&self) -> Vec<Todo> {
        self.items.iter().map(|item| item.todo.clone()).collect()
    }

    /// Authoritative row with `id`.
    pub fn get(&self, id: &TodoId) -> Option<&Todo> {
        self.position(id).map(|i| &self.items[i].todo)
    }

    pub fn pending(&self) -> &PendingWrites {
        &self.pending
    }

    fn position(&self, id: &TodoId) -> Option<usize> {
        if !id.is_assigned() {
            return None;
        }
        self.items.iter().position(|item| matches!(&item.key, ItemKey::Remote(k) if k == id))
    }

    fn commit(&mut self, ops: Vec<ListOp>) -> Vec<ListOp> {
        if !ops.is_empty() {
            self.version += 1;
            trace!(version = self.version, ops = ops.len(), "list changed");
        }
        ops
    }

    /// Switch sessions. A no-op when the identity did not change.
    pub fn set_user(&mut self, user: Option<UserId>) -> Vec<ListOp> {
        if self.user == user {
            return Vec::new();
        }
        info!(from = ?self.user, to = ?user, "identity changed, starting new session");
        let ops = diff(&self.items, &[], &[]);
        self.items.clear();
        self.pending.clear();
        self.epoch += 1;
        self.user = user;
        self.commit(ops)
    }

    /// Reconcile an authoritative snapshot into the list.
    pub fn apply_snapshot(&mut self, snapshot: Vec<Todo>) -> Vec<ListOp> {
        if self.user.is_none() {
            debug!(records = snapshot.len(), "snapshot without session, ignoring");
            return Vec::new();
        }
        let reconciled = reconcile(snapshot, &mut self.pending, &self.items);
        let ops = diff(&self.items, &reconciled.items, &reconciled.superseded);
        self.items = reconciled.items;
        debug!(rows = self.items.len(), ops = ops.len(), "snapshot reconciled");
        self.commit(ops)
    }

    pub fn apply_documents(&mut self, docs: Vec<Document>) -> Vec<ListOp> {
        self.apply_snapshot(parse_snapshot(docs))
    }

    fn signed_in(&self) -> Result<UserId, MutationError> {
        self.user.clone().ok_or(MutationError::NotSignedIn)
    }

    fn mutation(&mut self, request: WriteRequest, ops: Vec<ListOp>) -> Mutation {
        let ops = self.commit(ops);
        Mutation { request, epoch: self.epoch, ops }
    }

    /// Insert an optimistic row on top and describe the create write.
    /// Also returns the optimistic record.
    pub fn create(
        &mut self,
        text: &str,
        due_at: Option<u64>,
    ) -> Result<(Mutation, Todo), MutationError> {
        let text = validate_text(text)?;
        let user = self.signed_in()?;

        let fields = TodoFields::new(user, text, due_at);
        let todo = fields.to_optimistic();
        let slot = self.pending.open_create();
        self.items.insert(0, ListItem::pending(slot, todo.clone()));
        debug!(%slot, "optimistic create");

        let ops = vec![ListOp::Insert { index: 0, todo: todo.clone() }];
        Ok((self.mutation(WriteRequest::Create { slot, fields }, ops), todo))
    }

    /// Membership and content wait for the next snapshot.
    pub fn set_completed(&mut self, id: &TodoId, completed: bool) -> Result<Mutation, MutationError> {
        let kind = MutationKind::SetCompleted;
        require_assigned(id, kind)?;
        self.signed_in()?;
        let patch = TodoPatch::completed(completed);
        Ok(self.mutation(WriteRequest::Update { kind, id: id.clone(), patch }, Vec::new()))
    }

    pub fn rename(&mut self, id: &TodoId, text: &str) -> Result<Mutation, MutationError> {
        let kind = MutationKind::Rename;
        require_assigned(id, kind)?;
        let text = validate_text(text)?;
        self.signed_in()?;
        Ok(self.update_locally(kind, id, TodoPatch::text(text)))
    }

    pub fn set_due(&mut self, id: &TodoId, due_at: Option<u64>) -> Result<Mutation, MutationError> {
        let kind = MutationKind::SetDueDate;
        require_assigned(id, kind)?;
        self.signed_in()?;
        Ok(self.update_locally(kind, id, TodoPatch::due_at(due_at)))
    }

    fn update_locally(&mut self, kind: MutationKind, id: &TodoId, patch: TodoPatch) -> Mutation {
        let mut ops = Vec::new();
        if let Some(index) = self.position(id) {
            let todo = &mut self.items[index].todo;
            patch.apply_to(todo);
            ops.push(ListOp::Update { index, todo: todo.clone() });
        } else {
            debug!(%id, %kind, "record not in list, issuing write only");
        }
        self.mutation(WriteRequest::Update { kind, id: id.clone(), patch }, ops)
    }

    /// Remove the row now; the delete stays hidden from snapshots until it resolves.
    pub fn delete(&mut self, id: &TodoId) -> Result<Mutation, MutationError> {
        require_assigned(id, MutationKind::Delete)?;
        self.signed_in()?;
        self.pending.begin_delete(id.clone());

        let mut ops = Vec::new();
        if let Some(index) = self.position(id) {
            self.items.remove(index);
            ops.push(ListOp::Remove { index });
        }
        Ok(self.mutation(WriteRequest::Delete { id: id.clone() }, ops))
    }

    fn remove_slot_row(&mut self, slot: SlotId) -> Vec<ListOp> {
        match self.items.iter().position(|item| item.key == ItemKey::Pending(slot)) {
            Some(index) => {
                self.items.remove(index);
                vec![ListOp::Remove { index }]
            }
            None => Vec::new(),
        }
    }

    /// Fold a resolved write back into the list.
    pub fn complete_write(&mut self, epoch: u64, outcome: WriteOutcome) -> WriteResolution {
        let kind = outcome.kind();
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, %kind, "dropping write completion from old session");
            return WriteResolution::Stale;
        }

        match outcome {
            WriteOutcome::Created { slot, result: Ok(id) } => {
                if !self.pending.confirm_create(slot, id.clone()) {
                    debug!(%slot, %id, "create confirmed for untracked slot");
                    return WriteResolution::Applied { kind, ops: Vec::new() };
                }
                debug!(%slot, id = %id.short(), "create confirmed");
                // A snapshot carrying the record may already have landed, and
                // the user may have deleted it from there.
                let mut ops = Vec::new();
                if self.position(&id).is_some() || self.pending.is_removed(&id) {
                    ops = self.remove_slot_row(slot);
                    self.pending.settle(slot);
                }
                WriteResolution::Applied { kind, ops: self.commit(ops) }
            }
            WriteOutcome::Created { slot, result: Err(e) } => {
                warn!(%slot, error = %e, "create failed, rolling back");
                self.pending.abandon_create(slot);
                let ops = self.remove_slot_row(slot);
                WriteResolution::Failed { kind, message: e.to_string(), ops: self.commit(ops) }
            }
            WriteOutcome::Updated { id, result, .. } => match result {
                Ok(()) => WriteResolution::Applied { kind, ops: Vec::new() },
                Err(e) => {
                    warn!(%id, %kind, error = %e, "update failed");
                    WriteResolution::Failed { kind, message: e.to_string(), ops: Vec::new() }
                }
            },
            WriteOutcome::Deleted { id, result } => {
                self.pending.finish_delete(&id);
                match result {
                    Ok(()) => {
                        let mut ops = Vec::new();
                        if let Some(slot) = self.pending.slot_confirmed_as(&id) {
                            debug!(%slot, %id, "deleted record had an optimistic row");
                            ops = self.remove_slot_row(slot);
                            self.pending.settle(slot);
                        }
                        self.pending.retire(id);
                        WriteResolution::Applied { kind, ops: self.commit(ops) }
                    }
                    Err(e) => {
                        warn!(%id, error = %e, "delete failed");
                        WriteResolution::Failed { kind, message: e.to_string(), ops: Vec::new() }
                    }
                }
            }
        }
    }
}
