//! Pending permission and question requests.
//!
//! Both are session-scoped records that live until the user replies or the
//! session is removed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{MessageId, RequestId, SessionId};

/// A tool awaiting the user's permission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Request id.
    pub id: RequestId,
    /// Owning session.
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
    /// Message whose tool call triggered the request.
    #[serde(rename = "messageID", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// Tool call id, when the request belongs to a tool call.
    #[serde(rename = "callID", default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Tool awaiting permission.
    #[serde(rename = "toolName")]
    pub tool_name: String,
    /// Tool arguments.
    #[serde(default)]
    pub args: Value,
}

/// A question posed to the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRequest {
    /// Request id.
    pub id: RequestId,
    /// Owning session.
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
    /// Message the question belongs to.
    #[serde(rename = "messageID", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// Prompt text.
    pub question: String,
    /// Offered answers.
    #[serde(default)]
    pub options: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_parses_minimal_shape() {
        let req: PermissionRequest = serde_json::from_value(serde_json::json!({
            "id": "per_1",
            "sessionID": "s1",
            "toolName": "bash"
        }))
        .unwrap();
        assert_eq!(req.session_id, "s1");
        assert!(req.args.is_null());
        assert!(req.message_id.is_none());
    }

    #[test]
    fn question_defaults_options() {
        let req: QuestionRequest = serde_json::from_value(serde_json::json!({
            "id": "q_1",
            "sessionID": "s1",
            "question": "Which branch?"
        }))
        .unwrap();
        assert!(req.options.is_empty());
    }
}
