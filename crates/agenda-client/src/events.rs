//! Events broadcast to the presentation layer.

use crate::diff::ListOp;
use crate::mutation::MutationKind;
use crate::subscriptions::{SubscriptionState, SyncError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListEvent {
    /// The working list changed. `version` increases with every batch.
    Diff { version: u64, ops: Vec<ListOp> },
    /// A snapshot was reconciled; `count` rows are now visible.
    Synced { count: usize },
    /// The subscription changed state.
    Status(SubscriptionState),
    /// Subscription-level failure. Not fatal; the list is left as is.
    SyncError(SyncError),
    /// A remote write was rejected.
    MutationFailed { kind: MutationKind, message: String },
    /// A remote write was acknowledged.
    MutationApplied { kind: MutationKind },
}
