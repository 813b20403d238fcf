//! Session records.

use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Server-reported status of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionStatus {
    /// No turn is running.
    #[default]
    Idle,
    /// A turn is streaming.
    Busy,
    /// The server is retrying a failed turn.
    Retry {
        /// Attempt counter, starting at 1.
        #[serde(default)]
        attempt: u32,
        /// Human-readable reason for the retry.
        #[serde(default)]
        message: String,
    },
    /// The last turn failed.
    Error {
        /// Failure description, when the server provides one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl SessionStatus {
    /// Whether a stream is (or is about to be) active for the session.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Busy | Self::Retry { .. })
    }
}

/// A chat session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session id.
    #[serde(alias = "sessionID")]
    pub id: SessionId,
    /// Working directory the session is bound to.
    #[serde(default)]
    pub directory: String,
    /// Last reported status.
    #[serde(default)]
    pub status: SessionStatus,
}

impl Session {
    /// Create an idle session.
    pub fn new(id: impl Into<SessionId>, directory: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            directory: directory.into(),
            status: SessionStatus::Idle,
        }
    }
}
