//! Inbound event envelope and the closed event union.
//!
//! The transport delivers [`InboundEvent`]s with an untyped `properties`
//! payload. [`EventKind::parse`] turns one into a typed variant; types
//! outside the vocabulary map to [`EventKind::Unrecognized`] so the router
//! can report them without stalling the session.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::{
    EventId, Message, MessageId, Part, PartId, PermissionRequest, QuestionRequest, RequestId,
    RoutingError, Session, SessionId, SessionStatus,
};

/// Event envelope as delivered by the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    /// Unique event id, used for deduplication.
    pub event_id: EventId,
    /// Per-session sequence number, starting at 0.
    pub sequence: u64,
    /// Event type, e.g. `message.part.updated`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Session the event belongs to.
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
    /// Type-specific payload.
    #[serde(default)]
    pub properties: Value,
}

impl InboundEvent {
    /// Build an envelope.
    pub fn new(
        event_id: impl Into<EventId>,
        sequence: u64,
        event_type: impl Into<String>,
        session_id: impl Into<SessionId>,
        properties: Value,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            sequence,
            event_type: event_type.into(),
            session_id: session_id.into(),
            properties,
        }
    }
}

/// Event type names.
pub mod types {
    /// `{info: Session}`
    pub const SESSION_CREATED: &str = "session.created";
    /// `{info: Session}`
    pub const SESSION_UPDATED: &str = "session.updated";
    /// `{info: {id}}`
    pub const SESSION_DELETED: &str = "session.deleted";
    /// `{sessionID, status}`
    pub const SESSION_STATUS: &str = "session.status";
    /// `{sessionID}`
    pub const SESSION_IDLE: &str = "session.idle";
    /// `{sessionID, error?}`
    pub const SESSION_ERROR: &str = "session.error";
    /// `{info: Message}`
    pub const MESSAGE_UPDATED: &str = "message.updated";
    /// `{sessionID, messageID}`
    pub const MESSAGE_REMOVED: &str = "message.removed";
    /// `{part: Part}`
    pub const PART_UPDATED: &str = "message.part.updated";
    /// `{sessionID, messageID, partID, delta}`
    pub const PART_DELTA: &str = "message.part.delta";
    /// `{sessionID, messageID, partID}`
    pub const PART_REMOVED: &str = "message.part.removed";
    /// `PermissionRequest`
    pub const PERMISSION_REQUESTED: &str = "permission.requested";
    /// `{sessionID, requestID}`
    pub const PERMISSION_REPLIED: &str = "permission.replied";
    /// `QuestionRequest`
    pub const QUESTION_REQUESTED: &str = "question.requested";
    /// `{sessionID, requestID}`
    pub const QUESTION_REPLIED: &str = "question.replied";
}

/// Typed inbound event.
#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    /// `session.created` / `session.updated`
    SessionUpserted(Session),
    /// `session.deleted`
    SessionDeleted {
        /// Deleted session.
        session_id: SessionId,
    },
    /// `session.status`
    SessionStatus {
        /// Session.
        session_id: SessionId,
        /// New status.
        status: SessionStatus,
    },
    /// `session.idle`
    SessionIdle {
        /// Session.
        session_id: SessionId,
    },
    /// `session.error`
    SessionError {
        /// Session.
        session_id: SessionId,
        /// Human-readable error, when the payload carried one.
        message: Option<String>,
    },
    /// `message.updated`
    MessageUpdated(Message),
    /// `message.removed`
    MessageRemoved {
        /// Session.
        session_id: SessionId,
        /// Removed message.
        message_id: MessageId,
    },
    /// `message.part.updated`
    PartUpdated(Part),
    /// `message.part.delta`
    PartDelta {
        /// Session.
        session_id: SessionId,
        /// Owning message.
        message_id: MessageId,
        /// Streaming part.
        part_id: PartId,
        /// Text to append.
        delta: String,
    },
    /// `message.part.removed`
    PartRemoved {
        /// Session.
        session_id: SessionId,
        /// Owning message.
        message_id: MessageId,
        /// Removed part.
        part_id: PartId,
    },
    /// `permission.requested`
    PermissionRequested(PermissionRequest),
    /// `permission.replied`
    PermissionReplied {
        /// Session.
        session_id: SessionId,
        /// Answered request.
        request_id: RequestId,
    },
    /// `question.requested`
    QuestionRequested(QuestionRequest),
    /// `question.replied`
    QuestionReplied {
        /// Session.
        session_id: SessionId,
        /// Answered request.
        request_id: RequestId,
    },
    /// Any type outside the vocabulary.
    Unrecognized {
        /// Declared type.
        event_type: String,
    },
}

#[derive(Deserialize)]
struct Info<T> {
    info: T,
}

#[derive(Deserialize)]
struct DeletedSession {
    id: SessionId,
}

#[derive(Deserialize)]
struct SessionRef {
    #[serde(rename = "sessionID")]
    session_id: SessionId,
}

#[derive(Deserialize)]
struct StatusProps {
    #[serde(rename = "sessionID")]
    session_id: SessionId,
    status: SessionStatus,
}

#[derive(Deserialize)]
struct ErrorProps {
    #[serde(rename = "sessionID")]
    session_id: SessionId,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct MessageRef {
    #[serde(rename = "sessionID")]
    session_id: SessionId,
    #[serde(rename = "messageID")]
    message_id: MessageId,
}

#[derive(Deserialize)]
struct PartProps {
    part: Part,
}

#[derive(Deserialize)]
struct PartRef {
    #[serde(rename = "sessionID")]
    session_id: SessionId,
    #[serde(rename = "messageID")]
    message_id: MessageId,
    #[serde(rename = "partID")]
    part_id: PartId,
}

#[derive(Deserialize)]
struct DeltaProps {
    #[serde(rename = "sessionID")]
    session_id: SessionId,
    #[serde(rename = "messageID")]
    message_id: MessageId,
    #[serde(rename = "partID")]
    part_id: PartId,
    delta: String,
}

#[derive(Deserialize)]
struct ReplyProps {
    #[serde(rename = "sessionID")]
    session_id: SessionId,
    #[serde(rename = "requestID")]
    request_id: RequestId,
}

impl EventKind {
    /// Decode an envelope's payload according to its declared type.
    pub fn parse(event: &InboundEvent) -> Result<Self, RoutingError> {
        let kind = match event.event_type.as_str() {
            types::SESSION_CREATED | types::SESSION_UPDATED => {
                Self::SessionUpserted(decode::<Info<Session>>(event)?.info)
            }
            types::SESSION_DELETED => Self::SessionDeleted {
                session_id: decode::<Info<DeletedSession>>(event)?.info.id,
            },
            types::SESSION_STATUS => {
                let p: StatusProps = decode(event)?;
                Self::SessionStatus {
                    session_id: p.session_id,
                    status: p.status,
                }
            }
            types::SESSION_IDLE => Self::SessionIdle {
                session_id: decode::<SessionRef>(event)?.session_id,
            },
            types::SESSION_ERROR => {
                let p: ErrorProps = decode(event)?;
                Self::SessionError {
                    session_id: p.session_id,
                    message: p.error.as_ref().and_then(error_message),
                }
            }
            types::MESSAGE_UPDATED => Self::MessageUpdated(decode::<Info<Message>>(event)?.info),
            types::MESSAGE_REMOVED => {
                let p: MessageRef = decode(event)?;
                Self::MessageRemoved {
                    session_id: p.session_id,
                    message_id: p.message_id,
                }
            }
            types::PART_UPDATED => Self::PartUpdated(decode::<PartProps>(event)?.part),
            types::PART_DELTA => {
                let p: DeltaProps = decode(event)?;
                Self::PartDelta {
                    session_id: p.session_id,
                    message_id: p.message_id,
                    part_id: p.part_id,
                    delta: p.delta,
                }
            }
            types::PART_REMOVED => {
                let p: PartRef = decode(event)?;
                Self::PartRemoved {
                    session_id: p.session_id,
                    message_id: p.message_id,
                    part_id: p.part_id,
                }
            }
            types::PERMISSION_REQUESTED => Self::PermissionRequested(decode(event)?),
            types::PERMISSION_REPLIED => {
                let p: ReplyProps = decode(event)?;
                Self::PermissionReplied {
                    session_id: p.session_id,
                    request_id: p.request_id,
                }
            }
            types::QUESTION_REQUESTED => Self::QuestionRequested(decode(event)?),
            types::QUESTION_REPLIED => {
                let p: ReplyProps = decode(event)?;
                Self::QuestionReplied {
                    session_id: p.session_id,
                    request_id: p.request_id,
                }
            }
            other => Self::Unrecognized {
                event_type: other.to_owned(),
            },
        };
        Ok(kind)
    }

    /// Session named inside the payload, if the payload names one.
    pub fn payload_session(&self) -> Option<&SessionId> {
        match self {
            Self::SessionUpserted(session) => Some(&session.id),
            Self::MessageUpdated(message) => Some(&message.session_id),
            Self::PartUpdated(part) => part.session_id.as_ref(),
            Self::PermissionRequested(request) => Some(&request.session_id),
            Self::QuestionRequested(request) => Some(&request.session_id),
            Self::SessionDeleted { session_id }
            | Self::SessionStatus { session_id, .. }
            | Self::SessionIdle { session_id }
            | Self::SessionError { session_id, .. }
            | Self::MessageRemoved { session_id, .. }
            | Self::PartDelta { session_id, .. }
            | Self::PartRemoved { session_id, .. }
            | Self::PermissionReplied { session_id, .. }
            | Self::QuestionReplied { session_id, .. } => Some(session_id),
            Self::Unrecognized { .. } => None,
        }
    }

    /// Event type label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionUpserted(_) => types::SESSION_UPDATED,
            Self::SessionDeleted { .. } => types::SESSION_DELETED,
            Self::SessionStatus { .. } => types::SESSION_STATUS,
            Self::SessionIdle { .. } => types::SESSION_IDLE,
            Self::SessionError { .. } => types::SESSION_ERROR,
            Self::MessageUpdated(_) => types::MESSAGE_UPDATED,
            Self::MessageRemoved { .. } => types::MESSAGE_REMOVED,
            Self::PartUpdated(_) => types::PART_UPDATED,
            Self::PartDelta { .. } => types::PART_DELTA,
            Self::PartRemoved { .. } => types::PART_REMOVED,
            Self::PermissionRequested(_) => types::PERMISSION_REQUESTED,
            Self::PermissionReplied { .. } => types::PERMISSION_REPLIED,
            Self::QuestionRequested(_) => types::QUESTION_REQUESTED,
            Self::QuestionReplied { .. } => types::QUESTION_REPLIED,
            Self::Unrecognized { .. } => "unrecognized",
        }
    }
}

fn decode<T: DeserializeOwned>(event: &InboundEvent) -> Result<T, RoutingError> {
    T::deserialize(&event.properties).map_err(|err| RoutingError::MalformedPayload {
        event_id: event.event_id.clone(),
        event_type: event.event_type.clone(),
        reason: err.to_string(),
    })
}

/// Pull a readable message out of an error payload.
///
/// Accepts a bare string, `{message}`, `{data: {message}}`, or `{name}`.
fn error_message(error: &Value) -> Option<String> {
    if let Some(text) = error.as_str() {
        return Some(text.to_owned());
    }
    error
        .get("message")
        .or_else(|| error.pointer("/data/message"))
        .or_else(|| error.get("name"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}
