//! Message parts.
//!
//! A part belongs to exactly one message and carries a type-specific body.
//! The body is an internally tagged union on `type`, flattened into the part
//! so the wire shape is `{id, type, messageID, ...body fields}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::correlation;
use crate::ids::{MessageId, PartId, SessionId};
use crate::optimistic::{OptimisticMetadata, OptimisticSource};

/// Part type without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PartKind {
    /// Assistant or user text.
    Text,
    /// Model reasoning trace.
    Reasoning,
    /// Tool invocation.
    Tool,
    /// Permission prompt embedded in the transcript.
    Permission,
    /// Question prompt embedded in the transcript.
    Question,
}

impl PartKind {
    /// Wire name of the part type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Reasoning => "reasoning",
            Self::Tool => "tool",
            Self::Permission => "permission",
            Self::Question => "question",
        }
    }
}

/// Lifecycle of a tool invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Arguments are still streaming.
    Pending,
    /// The tool is executing.
    Running,
    /// The tool finished successfully.
    Completed,
    /// The tool failed.
    Error,
}

/// State of a tool part.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolState {
    /// Current status.
    pub status: ToolStatus,
    /// Tool arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Tool output, once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Failure text, once errored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolState {
    /// A state with only a status.
    pub fn new(status: ToolStatus) -> Self {
        Self {
            status,
            input: None,
            output: None,
            error: None,
        }
    }
}

/// Type-specific payload of a part.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PartBody {
    /// `{type: "text", text}`
    Text {
        /// Text content.
        #[serde(default)]
        text: String,
    },
    /// `{type: "reasoning", text, reasoningId}`
    Reasoning {
        /// Reasoning content.
        #[serde(default)]
        text: String,
        /// Provider-assigned reasoning block id.
        #[serde(rename = "reasoningId")]
        reasoning_id: String,
    },
    /// `{type: "tool", tool, callID, state}`
    Tool {
        /// Tool name.
        tool: String,
        /// Provider-assigned tool call id.
        #[serde(rename = "callID")]
        call_id: String,
        /// Execution state.
        state: ToolState,
    },
    /// `{type: "permission", permissionId, toolName, args}`
    Permission {
        /// Permission request id.
        #[serde(rename = "permissionId")]
        permission_id: String,
        /// Tool awaiting permission.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Tool arguments.
        #[serde(default)]
        args: Value,
    },
    /// `{type: "question", questionId, question, options?}`
    Question {
        /// Question request id.
        #[serde(rename = "questionId")]
        question_id: String,
        /// Prompt text.
        question: String,
        /// Offered answers.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        options: Vec<String>,
    },
}

impl PartBody {
    /// Part type of this body.
    pub fn kind(&self) -> PartKind {
        match self {
            Self::Text { .. } => PartKind::Text,
            Self::Reasoning { .. } => PartKind::Reasoning,
            Self::Tool { .. } => PartKind::Tool,
            Self::Permission { .. } => PartKind::Permission,
            Self::Question { .. } => PartKind::Question,
        }
    }

    /// Type-specific discriminant used for correlation.
    pub fn discriminant(&self) -> Option<&str> {
        match self {
            Self::Text { .. } => None,
            Self::Reasoning { reasoning_id, .. } => Some(reasoning_id),
            Self::Tool { call_id, .. } => Some(call_id),
            Self::Permission { permission_id, .. } => Some(permission_id),
            Self::Question { question_id, .. } => Some(question_id),
        }
    }
}

/// A part of a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Part {
    /// Part id.
    pub id: PartId,
    /// Owning message.
    #[serde(rename = "messageID")]
    pub message_id: MessageId,
    /// Owning session, when the producer includes it.
    #[serde(rename = "sessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Type-specific payload.
    #[serde(flatten)]
    pub body: PartBody,
    /// Present only on speculative records.
    #[serde(
        rename = "optimisticMetadata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub optimistic: Option<OptimisticMetadata>,
}

impl Part {
    /// Create a canonical part.
    pub fn new(id: impl Into<PartId>, message_id: impl Into<MessageId>, body: PartBody) -> Self {
        Self {
            id: id.into(),
            message_id: message_id.into(),
            session_id: None,
            body,
            optimistic: None,
        }
    }

    /// Canonical text part.
    pub fn text(
        id: impl Into<PartId>,
        message_id: impl Into<MessageId>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(id, message_id, PartBody::Text { text: text.into() })
    }

    /// Canonical tool part.
    pub fn tool(
        id: impl Into<PartId>,
        message_id: impl Into<MessageId>,
        tool: impl Into<String>,
        call_id: impl Into<String>,
        state: ToolState,
    ) -> Self {
        Self::new(
            id,
            message_id,
            PartBody::Tool {
                tool: tool.into(),
                call_id: call_id.into(),
                state,
            },
        )
    }

    /// Canonical reasoning part.
    pub fn reasoning(
        id: impl Into<PartId>,
        message_id: impl Into<MessageId>,
        reasoning_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            message_id,
            PartBody::Reasoning {
                text: text.into(),
                reasoning_id: reasoning_id.into(),
            },
        )
    }

    /// Attach the owning session.
    #[must_use]
    pub fn in_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Part type.
    pub fn kind(&self) -> PartKind {
        self.body.kind()
    }

    /// Correlation key derived from `(messageID, type, discriminant)`.
    pub fn correlation_key(&self) -> String {
        correlation::part_key(&self.message_id, self.kind(), self.body.discriminant())
    }

    /// Mark this part as speculative, attaching freshly derived metadata.
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

    /// Re-point the part at another message, refreshing the correlation key
    /// of a speculative record.
    pub fn set_message(&mut self, message_id: MessageId) {
        self.message_id = message_id;
        let key = self.correlation_key();
        if let Some(meta) = self.optimistic.as_mut() {
            meta.correlation_key = key;
        }
    }

    /// Append streamed text to a text or reasoning part.
    ///
    /// Returns `false` for part types that carry no streamable text.
    pub fn append_delta(&mut self, delta: &str) -> bool {
        match &mut self.body {
            PartBody::Text { text } | PartBody::Reasoning { text, .. } => {
                text.push_str(delta);
                true
            }
            PartBody::Tool { .. } | PartBody::Permission { .. } | PartBody::Question { .. } => {
                false
            }
        }
    }
}
