//! Correlation key generator.
//!
//! An optimistic record and its canonical counterpart usually have different
//! ids. The correlation key is derived from the fields both sides agree on so
//! the two can be linked:
//!
//! - messages: `(role, parentID, createdAt)`
//! - parts: `(messageID, type, discriminant)` where the discriminant is the
//!   tool `callID`, the `reasoningId`, the `permissionId`, the `questionId`,
//!   or absent for text (a message has at most one active text part).
//!
//! Keys are plain strings, deterministic within a process, and never used as
//! storage keys.

use crate::message::Role;
use crate::part::PartKind;

/// Placeholder rendered for a root message (no parent).
const ROOT: &str = "root";

/// Placeholder rendered for a part type without a discriminant.
const NO_DISCRIMINANT: &str = "-";

/// Derive the correlation key of a message.
pub fn message_key(role: Role, parent_id: Option<&str>, created_at: i64) -> String {
    format!(
        "msg:{}:{}:{created_at}",
        role.as_str(),
        parent_id.unwrap_or(ROOT)
    )
}

/// Derive the correlation key of a part.
pub fn part_key(message_id: &str, kind: PartKind, discriminant: Option<&str>) -> String {
    format!(
        "part:{message_id}:{}:{}",
        kind.as_str(),
        discriminant.unwrap_or(NO_DISCRIMINANT)
    )
}
