//! Snapshot reconciliation.
//!
//! A snapshot is the complete current truth for the signed-in user. The new
//! working list is the snapshot, re-sorted newest first, with two local
//! adjustments:
//!
//! - optimistic rows still waiting on their create stay on top, unless the
//!   snapshot already carries the id their write was confirmed with
//!   (superseded), in which case they are dropped
//! - records with a delete in flight stay hidden, and so do optimistic rows
//!   confirmed with the id of a deleted record
//!
//! Anything else that was in the old list but is missing from the snapshot is
//! gone.

use std::collections::HashSet;

use tracing::{debug, trace, warn};

use agenda_types::{Document, Todo, TodoId};

use crate::diff::{ItemKey, ListItem};
use crate::mutation::{PendingWrites, SlotId, SlotState};

/// Output of [`reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// The next working list.
    pub items: Vec<ListItem>,
    /// Optimistic rows absorbed by their authoritative record this round.
    pub superseded: Vec<(SlotId, TodoId)>,
}

/// Parse pushed documents, skipping (and logging) malformed ones.
pub fn parse_snapshot(docs: Vec<Document>) -> Vec<Todo> {
    let total = docs.len();
    let todos: Vec<Todo> = docs
        .into_iter()
        .filter_map(|doc| match Todo::from_document(doc) {
            Ok(todo) => Some(todo),
            Err(e) => {
                warn!("skipping snapshot entry: {e}");
                None
            }
        })
        .collect();
    if todos.len() != total {
        debug!(parsed = todos.len(), total, "snapshot parsed with skipped entries");
    }
    todos
}

/// Merge an authoritative snapshot with the pending rows of `previous`.
///
/// Settles the slots of superseded rows in `pending`; slots neither in
/// flight nor confirmed are dropped along with their rows.
pub fn reconcile(
    snapshot: Vec<Todo>,
    pending: &mut PendingWrites,
    previous: &[ListItem],
) -> Reconciled {
    let mut records = snapshot;
    // Trust the query's order but re-derive it. Stable, so ties keep arrival order.
    records.sort_by(Todo::newest_first);

    let mut seen: HashSet<TodoId> = HashSet::with_capacity(records.len());
    records.retain(|todo| {
        if !todo.id.is_assigned() {
            warn!("snapshot entry without id, skipping");
            return false;
        }
        if pending.is_deleting(&todo.id) {
            trace!(id = %todo.id, "hiding record with delete in flight");
            return false;
        }
        if !seen.insert(todo.id.clone()) {
            warn!(id = %todo.id, "duplicate id in snapshot, keeping first");
            return false;
        }
        true
    });

    let mut items = Vec::with_capacity(records.len() + pending.pending_creates());
    let mut superseded = Vec::new();
    let mut removed = Vec::new();

    for item in previous {
        let ItemKey::Pending(slot) = item.key else {
            continue;
        };
        match pending.slot_state(slot) {
            Some(SlotState::Confirmed(id)) if seen.contains(id) => {
                debug!(%slot, %id, "optimistic row superseded by snapshot");
                superseded.push((slot, id.clone()));
            }
            Some(SlotState::Confirmed(id)) if pending.is_removed(id) => {
                debug!(%slot, %id, "dropping optimistic row of deleted record");
                removed.push(slot);
            }
            Some(_) => items.push(item.clone()),
            None => {
                debug!(%slot, "dropping row of untracked slot");
            }
        }
    }
    for slot in superseded.iter().map(|(slot, _)| *slot).chain(removed) {
        pending.settle(slot);
    }

    items.extend(records.into_iter().map(ListItem::remote));
    Reconciled { items, superseded }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use agenda_types::UserId;

    use super::*;

    fn todo(id: &str, created_at: u64) -> Todo {
        Todo {
            id: TodoId::from(id),
            text: id.to_uppercase(),
            completed: false,
            user_id: UserId::from("u1"),
            due_at: None,
            created_at: Some(created_at),
        }
    }

    fn ids(items: &[ListItem]) -> Vec<String> {
        items.iter().map(|item| item.todo.id.to_string()).collect()
    }

    #[test]
    fn test_resorts_newest_first_regardless_of_input_order() {
        let mut pending = PendingWrites::new();
        let forward = reconcile(vec![todo("b", 2), todo("a", 1)], &mut pending, &[]);
        let backward = reconcile(vec![todo("a", 1), todo("b", 2)], &mut pending, &[]);
        assert_eq!(ids(&forward.items), vec!["b", "a"]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_duplicate_ids_collapse_to_first() {
        let mut pending = PendingWrites::new();
        let mut dup = todo("a", 1);
        dup.text = "second copy".into();
        let out = reconcile(vec![todo("a", 1), dup], &mut pending, &[]);
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].todo.text, "A");
    }

    #[test]
    fn test_in_flight_placeholder_kept_on_top() {
        let mut pending = PendingWrites::new();
        let slot = pending.open_create();
        let placeholder = ListItem::pending(slot, Todo::optimistic(UserId::from("u1"), "new", None));
        let previous = vec![placeholder.clone(), ListItem::remote(todo("a", 1))];

        let out = reconcile(vec![todo("a", 1), todo("b", 5)], &mut pending, &previous);
        assert_eq!(out.items[0], placeholder);
        assert_eq!(ids(&out.items[1..]), vec!["b", "a"]);
        assert!(out.superseded.is_empty());
        assert_eq!(pending.slot_state(slot), Some(&SlotState::InFlight));
    }

    #[test]
    fn test_confirmed_placeholder_waits_for_its_id() {
        let mut pending = PendingWrites::new();
        let slot = pending.open_create();
        pending.confirm_create(slot, TodoId::from("abc"));
        let previous = vec![ListItem::pending(slot, Todo::optimistic(UserId::from("u1"), "new", None))];

        // Snapshot that predates the write: placeholder survives.
        let out = reconcile(vec![todo("a", 1)], &mut pending, &previous);
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.items[0].slot(), Some(slot));

        // Snapshot carrying the confirmed id: placeholder superseded.
        let out = reconcile(vec![todo("abc", 9), todo("a", 1)], &mut pending, &out.items);
        assert_eq!(ids(&out.items), vec!["abc", "a"]);
        assert_eq!(out.superseded, vec![(slot, TodoId::from("abc"))]);
        assert_eq!(pending.pending_creates(), 0);
    }

    #[test]
    fn test_records_absent_from_snapshot_are_removed() {
        let mut pending = PendingWrites::new();
        let previous: Vec<ListItem> = vec![ListItem::remote(todo("a", 2)), ListItem::remote(todo("b", 1))];
        let out = reconcile(vec![todo("b", 1)], &mut pending, &previous);
        assert_eq!(ids(&out.items), vec!["b"]);
    }

    #[test]
    fn test_delete_in_flight_is_hidden() {
        let mut pending = PendingWrites::new();
        pending.begin_delete(TodoId::from("a"));
        let out = reconcile(vec![todo("a", 2), todo("b", 1)], &mut pending, &[]);
        assert_eq!(ids(&out.items), vec!["b"]);
    }

    #[test]
    fn test_confirmed_placeholder_of_deleted_record_is_dropped() {
        let mut pending = PendingWrites::new();
        let slot = pending.open_create();
        pending.confirm_create(slot, TodoId::from("abc"));
        pending.begin_delete(TodoId::from("abc"));
        let previous = vec![
            ListItem::pending(slot, Todo::optimistic(UserId::from("u1"), "new", None)),
            ListItem::remote(todo("a", 1)),
        ];

        let out = reconcile(vec![todo("abc", 9), todo("a", 1)], &mut pending, &previous);
        assert_eq!(ids(&out.items), vec!["a"]);
        assert!(out.superseded.is_empty());
        assert_eq!(pending.slot_state(slot), None);
    }

    #[test]
    fn test_abandoned_slot_rows_are_dropped() {
        let mut pending = PendingWrites::new();
        let slot = pending.open_create();
        pending.abandon_create(slot);
        let previous = vec![ListItem::pending(slot, Todo::optimistic(UserId::from("u1"), "x", None))];
        let out = reconcile(Vec::new(), &mut pending, &previous);
        assert!(out.items.is_empty());
    }

    #[test]
    fn test_empty_snapshot_is_valid() {
        let mut pending = PendingWrites::new();
        let out = reconcile(Vec::new(), &mut pending, &[]);
        assert!(out.items.is_empty());
        assert!(out.superseded.is_empty());
    }

    #[test]
    fn test_parse_snapshot_skips_malformed_entries() {
        let docs = vec![
            Document::new("a", json!({ "text": "ok", "userId": "u1", "createdAt": 1 })),
            Document::new("b", json!({ "completed": "yes" })),
            Document::new("c", json!({ "text": "also ok", "userId": "u1", "createdAt": 2 })),
        ];
        let todos = parse_snapshot(docs);
        let ids: Vec<&str> = todos.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
