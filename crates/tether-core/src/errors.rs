//! Error taxonomy shared by the store graph and the event router.
//!
//! - [`ValidationError`]: a foreign-key violation on upsert. Recoverable; the
//!   store's validation policy decides whether it is raised or reported.
//! - [`RoutingError`]: an inbound event that cannot be routed. Always
//!   non-fatal; the event is dropped and logged.
//!
//! Neither aborts processing of unrelated events.

use thiserror::Error;

use crate::ids::{EventId, MessageId, PartId, SessionId};

/// Foreign-key violation detected on upsert.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A message referenced a session that does not exist.
    #[error("message {message_id} references missing session {session_id}")]
    MissingSession {
        /// Rejected message.
        message_id: MessageId,
        /// Unresolved session.
        session_id: SessionId,
    },

    /// A part referenced a message that does not exist.
    #[error("part {part_id} references missing message {message_id}")]
    MissingMessage {
        /// Rejected part.
        part_id: PartId,
        /// Unresolved message.
        message_id: MessageId,
    },
}

/// Reason an inbound event was not routed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The event type is not part of the known vocabulary.
    #[error("unknown event type {event_type} ({event_id})")]
    UnknownEventType {
        /// Offending event.
        event_id: EventId,
        /// Declared type.
        event_type: String,
    },

    /// The properties did not match the declared type's shape.
    #[error("malformed {event_type} payload ({event_id}): {reason}")]
    MalformedPayload {
        /// Offending event.
        event_id: EventId,
        /// Declared type.
        event_type: String,
        /// Deserializer message.
        reason: String,
    },

    /// The payload names a different session than the envelope.
    #[error("event {event_id} addressed to {envelope} carries session {payload}")]
    SessionMismatch {
        /// Offending event.
        event_id: EventId,
        /// Session on the envelope.
        envelope: SessionId,
        /// Session inside the payload.
        payload: SessionId,
    },

    /// The reorder buffer for the session is full.
    #[error("reorder buffer full for session {session_id}, dropped sequence {sequence}")]
    BufferFull {
        /// Session whose buffer overflowed.
        session_id: SessionId,
        /// Sequence of the dropped event.
        sequence: u64,
    },

    /// The event's sequence is below the session cursor.
    #[error("stale sequence {sequence} for session {session_id} (cursor {cursor})")]
    StaleSequence {
        /// Session.
        session_id: SessionId,
        /// Sequence of the dropped event.
        sequence: u64,
        /// Next expected sequence.
        cursor: u64,
    },

    /// The event id was already processed or buffered.
    #[error("duplicate event {event_id}")]
    Duplicate {
        /// Offending event.
        event_id: EventId,
    },

    /// The event arrived for a session that was deleted.
    #[error("event {event_id} for deleted session {session_id}")]
    SessionDeleted {
        /// Offending event.
        event_id: EventId,
        /// Deleted session.
        session_id: SessionId,
    },

    /// A removal named a record outside the addressed session or message.
    #[error("event {event_id} cannot remove {record_id}: it belongs to {owner}")]
    NotOwned {
        /// Offending event.
        event_id: EventId,
        /// Record the event tried to remove.
        record_id: String,
        /// Session or message the record actually belongs to.
        owner: String,
    },
}

impl RoutingError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownEventType { .. } => "unknown_type",
            Self::MalformedPayload { .. } => "malformed",
            Self::SessionMismatch { .. } => "session_mismatch",
            Self::BufferFull { .. } => "buffer_full",
            Self::StaleSequence { .. } => "stale_sequence",
            Self::Duplicate { .. } => "duplicate",
            Self::SessionDeleted { .. } => "session_deleted",
            Self::NotOwned { .. } => "not_owned",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
