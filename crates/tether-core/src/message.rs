//! Message records.
//!
//! A message belongs to exactly one session. Assistant replies reference the
//! user message that triggered them through `parentID`.

use serde::{Deserialize, Serialize};

use crate::correlation;
use crate::ids::{MessageId, SessionId};
use crate::optimistic::{OptimisticMetadata, OptimisticSource};

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sent by the local user.
    User,
    /// Produced by the agent.
    Assistant,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A message within a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message id.
    pub id: MessageId,
    /// Author role.
    pub role: Role,
    /// Owning session.
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
    /// Triggering message, for assistant replies.
    #[serde(rename = "parentID", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
    /// Creation time (epoch milliseconds).
    pub created_at: i64,
    /// Present only on speculative records.
    #[serde(
        rename = "optimisticMetadata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub optimistic: Option<OptimisticMetadata>,
}

impl Message {
    /// Create a canonical user message.
    pub fn user(id: impl Into<MessageId>, session_id: impl Into<SessionId>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            session_id: session_id.into(),
            parent_id: None,
            created_at,
            optimistic: None,
        }
    }

    /// Create a canonical assistant message replying to `parent_id`.
    pub fn assistant(
        id: impl Into<MessageId>,
        session_id: impl Into<SessionId>,
        parent_id: impl Into<MessageId>,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            session_id: session_id.into(),
            parent_id: Some(parent_id.into()),
            created_at,
            optimistic: None,
        }
    }

    /// Correlation key derived from `(role, parentID, createdAt)`.
    pub fn correlation_key(&self) -> String {
        correlation::message_key(self.role, self.parent_id.as_deref(), self.created_at)
    }

    /// Mark this message as speculative, attaching freshly derived metadata.
    #[must_use]
    pub fn into_optimistic(mut self, source: OptimisticSource, timestamp: i64) -> Self {
        self.optimistic = Some(OptimisticMetadata::new(
            source,
            self.correlation_key(),
            timestamp,
        ));
        self
    }

    /// Whether this is a speculative record.
    pub fn is_optimistic(&self) -> bool {
        self.optimistic.is_some()
    }

    /// Point this message at a new parent, refreshing the correlation key of
    /// a speculative record.
    pub fn set_parent(&mut self, parent_id: MessageId) {
        self.parent_id = Some(parent_id);
        let key = self.correlation_key();
        if let Some(meta) = self.optimistic.as_mut() {
            meta.correlation_key = key;
        }
    }
}
