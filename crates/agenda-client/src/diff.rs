//! List diff emitter.
//!
//! Computes index-level operations turning the previously rendered list into
//! the next one, so the rendering layer only redraws affected rows.
//!
//! # Op semantics
//!
//! Ops apply **sequentially**: each index refers to the list as it stands
//! after the preceding op. Emission order is
//!
//! 1. `Remove` for rows absent from the new list, highest index first
//! 2. `Move` for surviving rows off the longest increasing run of positions
//! 3. `Insert` / `Update` in ascending target index
//!
//! # Row identity
//!
//! Rows are keyed by [`ItemKey`]: the store id for authoritative rows, the
//! create slot for optimistic ones. A pending row that was superseded by its
//! confirmed record is aliased to that record's id, so the transition is an
//! `Update` rather than a remove/insert pair.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use agenda_types::{Todo, TodoId};

use crate::mutation::SlotId;

/// Identity of a row in the working list.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum ItemKey {
    Remote(TodoId),
    Pending(SlotId),
}

/// A row of the working list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListItem {
    pub key: ItemKey,
    pub todo: Todo,
}

impl ListItem {
    pub fn remote(todo: Todo) -> Self {
        Self { key: ItemKey::Remote(todo.id.clone()), todo }
    }

    pub fn pending(slot: SlotId, todo: Todo) -> Self {
        Self { key: ItemKey::Pending(slot), todo }
    }

    pub fn slot(&self) -> Option<SlotId> {
        match self.key {
            ItemKey::Pending(slot) => Some(slot),
            ItemKey::Remote(_) => None,
        }
    }
}

/// One change to the rendered list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListOp {
    Insert { index: usize, todo: Todo },
    Remove { index: usize },
    Update { index: usize, todo: Todo },
    Move { from: usize, to: usize },
}

/// An op did not fit the list it was applied to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("op {op} out of range for list of length {len}")]
pub struct ApplyError {
    /// Position of the offending op in the batch.
    pub op: usize,
    pub len: usize,
}

/// Apply ops in order. On error the list holds the ops applied so far.
pub fn apply_ops(list: &mut Vec<Todo>, ops: &[ListOp]) -> Result<(), ApplyError> {
    for (n, op) in ops.iter().enumerate() {
        let len = list.len();
        let err = ApplyError { op: n, len };
        match op {
            ListOp::Insert { index, todo } => {
                if *index > len {
                    return Err(err);
                }
                list.insert(*index, todo.clone());
            }
            ListOp::Remove { index } => {
                if *index >= len {
                    return Err(err);
                }
                list.remove(*index);
            }
            ListOp::Update { index, todo } => match list.get_mut(*index) {
                Some(slot) => *slot = todo.clone(),
                None => return Err(err),
            },
            ListOp::Move { from, to } => {
                if *from >= len || *to >= len {
                    return Err(err);
                }
                let todo = list.remove(*from);
                list.insert(*to, todo);
            }
        }
    }
    Ok(())
}

/// Diff `previous` against `next`.
///
/// `aliases` maps create slots to the ids that superseded them in this round;
/// a pending row in `previous` with an aliased slot matches the authoritative
/// row with that id in `next`.
pub fn diff<'a>(
    previous: &'a [ListItem],
    next: &'a [ListItem],
    aliases: &[(SlotId, TodoId)],
) -> Vec<ListOp> {
    let alias: HashMap<SlotId, &TodoId> = aliases.iter().map(|(slot, id)| (*slot, id)).collect();
    let canonical = |key: &ItemKey| -> ItemKey {
        match key {
            ItemKey::Pending(slot) => match alias.get(slot) {
                Some(id) => ItemKey::Remote((*id).clone()),
                None => key.clone(),
            },
            ItemKey::Remote(_) => key.clone(),
        }
    };

    let next_index: HashMap<&ItemKey, usize> =
        next.iter().enumerate().map(|(i, item)| (&item.key, i)).collect();
    debug_assert_eq!(next_index.len(), next.len(), "duplicate keys in next list");

    let mut ops = Vec::new();

    // 1. Removals, descending so earlier indices stay valid.
    let previous_keys: Vec<ItemKey> = previous.iter().map(|item| canonical(&item.key)).collect();
    for (i, key) in previous_keys.iter().enumerate().rev() {
        if !next_index.contains_key(key) {
            ops.push(ListOp::Remove { index: i });
        }
    }

    let mut current: Vec<(ItemKey, &'a Todo)> = previous_keys
        .into_iter()
        .zip(previous.iter().map(|item| &item.todo))
        .filter(|(key, _)| next_index.contains_key(key))
        .collect();

    // 2. Moves. Rows on the longest increasing run of target positions stay
    //    put; each other row is re-placed right after its target predecessor.
    let targets: Vec<usize> = current.iter().map(|(key, _)| next_index[key]).collect();
    let anchored = longest_increasing_run(&targets);

    let surviving: HashSet<&ItemKey> = current.iter().map(|(key, _)| key).collect();
    let common_order: Vec<&ItemKey> =
        next.iter().map(|item| &item.key).filter(|key| surviving.contains(key)).collect();
    let common_pos: HashMap<&ItemKey, usize> =
        common_order.iter().enumerate().map(|(i, key)| (*key, i)).collect();

    let mut movers: Vec<ItemKey> = current
        .iter()
        .zip(&anchored)
        .filter(|(_, anchored)| !**anchored)
        .map(|((key, _), _)| key.clone())
        .collect();
    movers.sort_by_key(|key| common_pos[key]);

    for key in movers {
        let Some(from) = current.iter().position(|(k, _)| *k == key) else {
            continue;
        };
        let entry = current.remove(from);
        let to = match common_pos[&key] {
            0 => 0,
            pos => {
                let predecessor = common_order[pos - 1];
                current.iter().position(|(k, _)| k == predecessor).map_or(0, |p| p + 1)
            }
        };
        current.insert(to, entry);
        if from != to {
            ops.push(ListOp::Move { from, to });
        }
    }

    // 3. Inserts and updates in target order.
    for (t, item) in next.iter().enumerate() {
        match current.get(t) {
            Some((key, old)) if *key == item.key => {
                if **old != item.todo {
                    ops.push(ListOp::Update { index: t, todo: item.todo.clone() });
                }
            }
            _ => {
                ops.push(ListOp::Insert { index: t, todo: item.todo.clone() });
                current.insert(t, (item.key.clone(), &item.todo));
            }
        }
    }

    ops
}

/// Marks the members of one longest strictly increasing subsequence.
fn longest_increasing_run(seq: &[usize]) -> Vec<bool> {
    let mut tails: Vec<usize> = Vec::new();
    let mut parent: Vec<Option<usize>> = vec![None; seq.len()];

    for (i, &value) in seq.iter().enumerate() {
        let pos = tails.partition_point(|&j| seq[j] < value);
        if pos > 0 {
            parent[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }

    let mut keep = vec![false; seq.len()];
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        keep[i] = true;
        cursor = parent[i];
    }
    keep
}

#[cfg(test)]
mod tests {
    use agenda_types::UserId;

    use super::*;
    use crate::mutation::PendingWrites;

    fn todo(id: &str, created_at: u64) -> Todo {
        Todo {
            id: TodoId::from(id),
            text: format!("task {id}"),
            completed: false,
            user_id: UserId::from("u1"),
            due_at: None,
            created_at: Some(created_at),
        }
    }

    fn items(ids: &[&str]) -> Vec<ListItem> {
        ids.iter().enumerate().map(|(i, id)| ListItem::remote(todo(id, 100 - i as u64))).collect()
    }

    fn todos(items: &[ListItem]) -> Vec<Todo> {
        items.iter().map(|item| item.todo.clone()).collect()
    }

    /// Applying the ops of diff(P, N) to P must yield N.
    fn assert_converges(previous: &[ListItem], next: &[ListItem]) -> Vec<ListOp> {
        let ops = diff(previous, next, &[]);
        let mut rendered = todos(previous);
        apply_ops(&mut rendered, &ops).expect("ops in range");
        assert_eq!(rendered, todos(next), "ops {ops:?}");
        ops
    }

    #[test]
    fn test_identical_lists_emit_nothing() {
        let list = items(&["a", "b", "c"]);
        assert!(diff(&list, &list, &[]).is_empty());
        assert!(diff(&[], &[], &[]).is_empty());
    }

    #[test]
    fn test_insert_into_empty() {
        let next = items(&["a", "b"]);
        let ops = assert_converges(&[], &next);
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], ListOp::Insert { index: 0, .. }));
        assert!(matches!(ops[1], ListOp::Insert { index: 1, .. }));
    }

    #[test]
    fn test_remove_all() {
        let previous = items(&["a", "b", "c"]);
        let ops = assert_converges(&previous, &[]);
        assert_eq!(
            ops,
            vec![ListOp::Remove { index: 2 }, ListOp::Remove { index: 1 }, ListOp::Remove { index: 0 }]
        );
    }

    #[test]
    fn test_update_in_place() {
        let previous = items(&["a", "b"]);
        let mut next = previous.clone();
        next[1].todo.completed = true;

        let ops = assert_converges(&previous, &next);
        assert_eq!(ops, vec![ListOp::Update { index: 1, todo: next[1].todo.clone() }]);
    }

    #[test]
    fn test_mixed_insert_remove_update() {
        let previous = items(&["a", "b", "c", "d"]);
        let mut next = vec![
            ListItem::remote(todo("x", 200)),
            previous[0].clone(),
            previous[2].clone(),
            ListItem::remote(todo("y", 50)),
        ];
        next[2].todo.text = "renamed".into();

        let ops = assert_converges(&previous, &next);
        let removes = ops.iter().filter(|op| matches!(op, ListOp::Remove { .. })).count();
        let inserts = ops.iter().filter(|op| matches!(op, ListOp::Insert { .. })).count();
        let updates = ops.iter().filter(|op| matches!(op, ListOp::Update { .. })).count();
        assert_eq!((removes, inserts, updates), (2, 2, 1));
        assert!(!ops.iter().any(|op| matches!(op, ListOp::Move { .. })));
    }

    #[test]
    fn test_rotation_is_a_single_move() {
        let previous = items(&["a", "b", "c", "d"]);
        let next = vec![previous[1].clone(), previous[2].clone(), previous[3].clone(), previous[0].clone()];

        let ops = assert_converges(&previous, &next);
        assert_eq!(ops, vec![ListOp::Move { from: 0, to: 3 }]);
    }

    #[test]
    fn test_reversal_converges() {
        let previous = items(&["a", "b", "c", "d", "e"]);
        let mut next = previous.clone();
        next.reverse();

        let ops = assert_converges(&previous, &next);
        assert_eq!(ops.len(), 4);
        assert!(ops.iter().all(|op| matches!(op, ListOp::Move { .. })));
    }

    #[test]
    fn test_shuffles_with_churn_converge() {
        let previous = items(&["a", "b", "c", "d", "e", "f"]);
        let pick = |ids: &[&str]| -> Vec<ListItem> {
            ids.iter()
                .map(|id| {
                    previous
                        .iter()
                        .find(|item| item.todo.id.as_str() == *id)
                        .cloned()
                        .unwrap_or_else(|| ListItem::remote(todo(id, 7)))
                })
                .collect()
        };

        for next in [
            pick(&["f", "a", "new", "c", "b"]),
            pick(&["e", "d", "x", "y", "a"]),
            pick(&["b", "a", "d", "c", "f", "e"]),
            pick(&["z"]),
        ] {
            assert_converges(&previous, &next);
        }
    }

    #[test]
    fn test_superseded_pending_row_becomes_update() {
        let mut pending = PendingWrites::new();
        let slot = pending.open_create();
        let placeholder = Todo::optimistic(UserId::from("u1"), "Buy milk", None);
        let previous = vec![ListItem::pending(slot, placeholder)];

        let confirmed = Todo {
            id: TodoId::from("abc"),
            text: "Buy milk".into(),
            completed: false,
            user_id: UserId::from("u1"),
            due_at: None,
            created_at: Some(1),
        };
        let next = vec![ListItem::remote(confirmed.clone())];

        let ops = diff(&previous, &next, &[(slot, TodoId::from("abc"))]);
        assert_eq!(ops, vec![ListOp::Update { index: 0, todo: confirmed }]);

        // Without the alias it is a replacement.
        let ops = diff(&previous, &next, &[]);
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn test_apply_rejects_out_of_range() {
        let mut list = todos(&items(&["a"]));
        let err = apply_ops(&mut list, &[ListOp::Remove { index: 0 }, ListOp::Remove { index: 0 }])
            .unwrap_err();
        assert_eq!(err, ApplyError { op: 1, len: 0 });
        assert!(list.is_empty());
    }

    #[test]
    fn test_longest_increasing_run() {
        assert_eq!(longest_increasing_run(&[]), Vec::<bool>::new());
        assert_eq!(longest_increasing_run(&[0, 1, 2]), vec![true, true, true]);
        assert_eq!(longest_increasing_run(&[3, 0, 1, 2]), vec![false, true, true, true]);
        let keep = longest_increasing_run(&[2, 1, 0]);
        assert_eq!(keep.iter().filter(|k| **k).count(), 1);
    }
}
