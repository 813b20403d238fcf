//! The [`Entity`] trait binding domain records to the generic store.

use serde::{Deserialize, Serialize};
use tether_core::{
    Message, OptimisticMetadata, Part, PermissionRequest, QuestionRequest, Session,
};

/// Which store a record lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// [`Session`]
    Session,
    /// [`Message`]
    Message,
    /// [`Part`]
    Part,
    /// [`PermissionRequest`]
    Permission,
    /// [`QuestionRequest`]
    Question,
}

impl EntityKind {
    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Message => "message",
            Self::Part => "part",
            Self::Permission => "permission",
            Self::Question => "question",
        }
    }
}

/// A record that can be held in an [`EntityStore`](crate::store::EntityStore).
pub trait Entity: Clone + Send + Sync + 'static {
    /// Store this record type lives in.
    const KIND: EntityKind;

    /// Primary key.
    fn id(&self) -> &str;

    /// Key of the order-preserving secondary index, if the store has one.
    fn index_key(&self) -> Option<&str>;

    /// Reference checked by the store's validator, if any.
    fn foreign_key(&self) -> Option<&str>;

    /// Speculative metadata; canonical records return `None`.
    fn optimistic(&self) -> Option<&OptimisticMetadata> {
        None
    }
}

impl Entity for Session {
    const KIND: EntityKind = EntityKind::Session;

    fn id(&self) -> &str {
        &self.id
    }

    fn index_key(&self) -> Option<&str> {
        None
    }

    fn foreign_key(&self) -> Option<&str> {
        None
    }
}

impl Entity for Message {
    const KIND: EntityKind = EntityKind::Message;

    fn id(&self) -> &str {
        &self.id
    }

    fn index_key(&self) -> Option<&str> {
        Some(&self.session_id)
    }

    fn foreign_key(&self) -> Option<&str> {
        Some(&self.session_id)
    }

    fn optimistic(&self) -> Option<&OptimisticMetadata> {
        self.optimistic.as_ref()
    }
}

impl Entity for Part {
    const KIND: EntityKind = EntityKind::Part;

    fn id(&self) -> &str {
        &self.id
    }

    fn index_key(&self) -> Option<&str> {
        Some(&self.message_id)
    }

    fn foreign_key(&self) -> Option<&str> {
        Some(&self.message_id)
    }

    fn optimistic(&self) -> Option<&OptimisticMetadata> {
        self.optimistic.as_ref()
    }
}

impl Entity for PermissionRequest {
    const KIND: EntityKind = EntityKind::Permission;

    fn id(&self) -> &str {
        &self.id
    }

    fn index_key(&self) -> Option<&str> {
        Some(&self.session_id)
    }

    fn foreign_key(&self) -> Option<&str> {
        Some(&self.session_id)
    }
}

impl Entity for QuestionRequest {
    const KIND: EntityKind = EntityKind::Question;

    fn id(&self) -> &str {
        &self.id
    }

    fn index_key(&self) -> Option<&str> {
        Some(&self.session_id)
    }

    fn foreign_key(&self) -> Option<&str> {
        Some(&self.session_id)
    }
}
