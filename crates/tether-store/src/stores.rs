//! Typed stores and their record-specific queries.

use tether_core::{
    Message, Part, PermissionRequest, QuestionRequest, Session, SessionStatus,
};

use crate::store::EntityStore;

/// Sessions by id.
pub type SessionStore = EntityStore<Session>;
/// Messages by id, indexed by session.
pub type MessageStore = EntityStore<Message>;
/// Parts by id, indexed by message.
pub type PartStore = EntityStore<Part>;
/// Pending permission requests, indexed by session.
pub type PermissionStore = EntityStore<PermissionRequest>;
/// Pending question requests, indexed by session.
pub type QuestionStore = EntityStore<QuestionRequest>;

impl SessionStore {
    /// Current status of a session.
    pub fn get_status(&self, session_id: &str) -> Option<SessionStatus> {
        self.get(session_id).map(|s| s.status)
    }

    /// Set the status of an existing session.
    ///
    /// Returns `false` when the session is unknown.
    pub fn set_status(&self, session_id: &str, status: SessionStatus) -> bool {
        self.modify(session_id, |s| s.status = status)
    }
}

impl MessageStore {
    /// Messages of a session in arrival order.
    pub fn get_by_session(&self, session_id: &str) -> Vec<Message> {
        self.get_by_index(session_id)
    }
}

impl PartStore {
    /// Parts of a message in arrival order.
    pub fn get_by_message(&self, message_id: &str) -> Vec<Part> {
        self.get_by_index(message_id)
    }

    /// Append streamed text to an existing text or reasoning part.
    ///
    /// Returns `false` when the part is unknown or carries no text.
    pub fn append_delta(&self, part_id: &str, delta: &str) -> bool {
        let mut applied = false;
        let found = self.modify(part_id, |part| applied = part.append_delta(delta));
        found && applied
    }
}

impl PermissionStore {
    /// Pending permission requests of a session.
    pub fn get_by_session(&self, session_id: &str) -> Vec<PermissionRequest> {
        self.get_by_index(session_id)
    }
}

impl QuestionStore {
    /// Pending questions of a session.
    pub fn get_by_session(&self, session_id: &str) -> Vec<QuestionRequest> {
        self.get_by_index(session_id)
    }
}
