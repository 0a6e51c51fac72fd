use crate::types::{ConversationId, HistoryRecord, Role, ToolCall};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const WELCOME_MESSAGE_ID: &str = "welcome";

/// One entry of the chat timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// True only while the assistant reply is still being assembled.
    #[serde(skip)]
    pub is_streaming: bool,
}

impl Message {
    pub fn welcome(content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self::assistant(WELCOME_MESSAGE_ID, content, created_at)
    }

    pub fn user(
        id: impl Into<String>,
        content: impl Into<String>,
        context_range: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: content.into(),
            created_at,
            context_range,
            tool_calls: None,
            is_streaming: false,
        }
    }

    pub fn assistant(
        id: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: content.into(),
            created_at,
            context_range: None,
            tool_calls: None,
            is_streaming: false,
        }
    }

    /// Empty assistant placeholder for a turn that is about to stream.
    pub fn live_assistant(
        id: impl Into<String>,
        context_range: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            context_range,
            is_streaming: true,
            ..Self::assistant(id, String::new(), created_at)
        }
    }

    pub fn tool_call_list(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

impl From<HistoryRecord> for Message {
    fn from(record: HistoryRecord) -> Self {
        Self {
            id: record.id,
            role: record.role,
            content: record.content,
            created_at: record.created_at,
            context_range: record.context_range,
            tool_calls: record.tool_calls,
            is_streaming: false,
        }
    }
}

/// Sequence number of a turn within one panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

/// Routing key for stream events. Events addressed to anything but the
/// panel's active target are stale and must not touch the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TurnTarget {
    pub conversation_id: ConversationId,
    pub turn_id: TurnId,
}

impl TurnTarget {
    pub fn new(conversation_id: ConversationId, turn_id: TurnId) -> Self {
        Self {
            conversation_id,
            turn_id,
        }
    }

    pub(crate) fn user_message_id(&self) -> String {
        format!("local-user-{}", self.turn_id.0)
    }

    pub(crate) fn assistant_message_id(&self) -> String {
        format!("local-assistant-{}", self.turn_id.0)
    }
}

impl fmt::Display for TurnTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.conversation_id, self.turn_id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolCallKind, ToolCallStatus};

    #[test]
    fn test_history_record_maps_one_to_one() {
        let created_at = Utc::now();
        let record = HistoryRecord {
            id: "m-1".to_string(),
            role: Role::Assistant,
            content: "Total is 10".to_string(),
            created_at,
            context_range: Some("A1:A4".to_string()),
            tool_calls: Some(vec![ToolCall::new(ToolCallKind::Read, ToolCallStatus::Ok)]),
        };

        let message = Message::from(record);
        assert_eq!(message.id, "m-1");
        assert_eq!(message.created_at, created_at);
        assert_eq!(message.context_range.as_deref(), Some("A1:A4"));
        assert_eq!(message.tool_call_list().len(), 1);
        assert!(!message.is_streaming);
    }

    #[test]
    fn test_live_assistant_starts_empty_and_streaming() {
        let message = Message::live_assistant("local-assistant-1", None, Utc::now());
        assert!(message.is_streaming);
        assert!(message.is_assistant());
        assert!(message.content.is_empty());
        assert!(message.tool_call_list().is_empty());
    }

    #[test]
    fn test_turn_target_ids_and_display() {
        let target = TurnTarget::new(ConversationId::new("conv-3"), TurnId(7));
        assert_eq!(target.to_string(), "conv-3#7");
        assert_eq!(target.user_message_id(), "local-user-7");
        assert_eq!(target.assistant_message_id(), "local-assistant-7");
    }
}
