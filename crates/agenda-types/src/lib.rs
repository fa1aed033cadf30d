//! Shared record types for agenda.
//!
//! A pure leaf crate: typed identifiers, the [`Todo`] entity, and the loosely
//! typed [`Document`] shape in which the remote store pushes records. Parsing a
//! document into a `Todo` is the only fallible step and yields a [`ParseError`]
//! scoped to that one document.
//!
//! # Key Types
//!
//! |----------------|------------------------------------------------------|
//! | Type           | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | [`TodoId`]     | Store-assigned id (empty until the store assigns it) |
//! | [`UserId`]     | Owner identity from the identity provider            |
//! | [`Todo`]       | Authoritative or optimistic record                   |
//! | [`Document`]   | Raw record as pushed in a snapshot                   |
//! | [`TodoFields`] | Create payload                                       |
//! | [`TodoPatch`]  | Partial update payload                               |
//! |----------------|------------------------------------------------------|

pub mod ids;
pub mod todo;

pub use ids::{TodoId, UserId};
pub use todo::{Document, ParseError, Todo, TodoFields, TodoPatch};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
