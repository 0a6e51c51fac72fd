use super::timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend identifier of one persisted conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Invocation category of a tool call. Unknown wire values read as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ToolCallKind {
    Read,
    Write,
    TempExec,
    Highlight,
    HighlightClear,
    Other,
}

impl ToolCallKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::TempExec => "temp_exec",
            Self::Highlight => "highlight",
            Self::HighlightClear => "highlight_clear",
            Self::Other => "other",
        }
    }
}

impl From<String> for ToolCallKind {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "read" => Self::Read,
            "write" => Self::Write,
            "temp_exec" | "temporary_execution" => Self::TempExec,
            "highlight" => Self::Highlight,
            "highlight_clear" | "clear_highlight" => Self::HighlightClear,
            _ => Self::Other,
        }
    }
}

impl From<ToolCallKind> for String {
    fn from(kind: ToolCallKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Ok,
    Error,
}

/// One completed tool invocation reported by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub kind: ToolCallKind,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    pub fn new(kind: ToolCallKind, status: ToolCallStatus) -> Self {
        Self {
            kind,
            status,
            range: None,
            statement: None,
            rows: None,
            columns: None,
            truncated: None,
            error: None,
        }
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolCallStatus::Error
    }

    /// One-line label for the invocation.
    pub fn summary(&self) -> String {
        let verb = match self.kind {
            ToolCallKind::Read => "Read",
            ToolCallKind::Write => "Wrote",
            ToolCallKind::TempExec => "Ran query",
            ToolCallKind::Highlight => "Highlighted",
            ToolCallKind::HighlightClear => "Cleared highlights",
            ToolCallKind::Other => "Used tool",
        };

        if self.is_error() {
            let detail = self.error.as_deref().unwrap_or("unknown error");
            let action = match self.kind {
                ToolCallKind::Read => "Read",
                ToolCallKind::Write => "Write",
                ToolCallKind::TempExec => "Query",
                ToolCallKind::Highlight => "Highlight",
                ToolCallKind::HighlightClear => "Clearing highlights",
                ToolCallKind::Other => "Tool",
            };
            return format!("{action} failed: {detail}");
        }

        let mut label = verb.to_string();
        if let Some(target) = self.range.as_deref().or(self.statement.as_deref()) {
            label.push(' ');
            label.push_str(target);
        }

        let mut shape = Vec::new();
        match (self.rows, self.columns) {
            (Some(rows), Some(columns)) => shape.push(format!("{rows} rows x {columns} cols")),
            (Some(rows), None) => shape.push(format!("{rows} rows")),
            (None, Some(columns)) => shape.push(format!("{columns} cols")),
            (None, None) => {}
        }
        if self.truncated == Some(true) {
            shape.push("truncated".to_string());
        }
        if !shape.is_empty() {
            label.push_str(&format!(" ({})", shape.join(", ")));
        }
        label
    }
}

/// Persisted history entry as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(alias = "createdAt", deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default, alias = "contextRange", skip_serializing_if = "Option::is_none")]
    pub context_range: Option<String>,
    #[serde(default, alias = "toolCalls", skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// The backend's authoritative record of a finished turn, carried by `done`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(
        default,
        alias = "createdAt",
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "contextRange", skip_serializing_if = "Option::is_none")]
    pub context_range: Option<String>,
    #[serde(default, alias = "toolCalls", skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl CanonicalMessage {
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }
}

/// One protocol event of a streaming turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Delta {
        #[serde(default)]
        text: String,
    },
    ToolCall {
        #[serde(alias = "toolCall")]
        tool_call: ToolCall,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Done {
        #[serde(default, alias = "finalMessage")]
        final_message: CanonicalMessage,
    },
}

impl StreamEvent {
    pub const WIRE_TYPES: [&'static str; 4] = ["delta", "tool_call", "error", "done"];

    pub fn delta(text: impl Into<String>) -> Self {
        Self::Delta { text: text.into() }
    }

    pub fn tool_call(tool_call: ToolCall) -> Self {
        Self::ToolCall { tool_call }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn done(final_message: CanonicalMessage) -> Self {
        Self::Done { final_message }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_view: Option<String>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_selected_context(mut self, range: impl Into<String>) -> Self {
        self.selected_context = Some(range.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    #[serde(default)]
    pub messages: Vec<HistoryRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_event_parses_each_wire_type() {
        let delta: StreamEvent =
            serde_json::from_value(json!({"type": "delta", "text": "Hi"})).unwrap();
        assert_eq!(delta, StreamEvent::delta("Hi"));

        let tool: StreamEvent = serde_json::from_value(json!({
            "type": "tool_call",
            "tool_call": {"kind": "read", "status": "ok", "range": "A1:B2", "rows": 2}
        }))
        .unwrap();
        match tool {
            StreamEvent::ToolCall { tool_call } => {
                assert_eq!(tool_call.kind, ToolCallKind::Read);
                assert_eq!(tool_call.range.as_deref(), Some("A1:B2"));
                assert_eq!(tool_call.rows, Some(2));
                assert_eq!(tool_call.columns, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let error: StreamEvent =
            serde_json::from_value(json!({"type": "error", "message": "rate limited"})).unwrap();
        assert_eq!(error, StreamEvent::error("rate limited"));

        let done: StreamEvent = serde_json::from_value(json!({
            "type": "done",
            "finalMessage": {"id": "msg-9", "content": "42", "created_at": "2024-01-02T03:04:05Z"}
        }))
        .unwrap();
        match done {
            StreamEvent::Done { final_message } => {
                assert_eq!(final_message.id.as_deref(), Some("msg-9"));
                assert_eq!(final_message.content.as_deref(), Some("42"));
                assert!(final_message.created_at.is_some());
                assert!(final_message.tool_calls.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_done_without_payload_defaults_to_empty_canonical_record() {
        let done: StreamEvent = serde_json::from_value(json!({"type": "done"})).unwrap();
        assert_eq!(done, StreamEvent::done(CanonicalMessage::default()));
    }

    #[test]
    fn test_unknown_tool_kind_reads_as_other() {
        let call: ToolCall =
            serde_json::from_value(json!({"kind": "pivot", "status": "ok"})).unwrap();
        assert_eq!(call.kind, ToolCallKind::Other);

        let serialized = serde_json::to_value(ToolCall::new(
            ToolCallKind::HighlightClear,
            ToolCallStatus::Ok,
        ))
        .unwrap();
        assert_eq!(serialized, json!({"kind": "highlight_clear", "status": "ok"}));
    }

    #[test]
    fn test_history_record_parses_naive_timestamp() {
        let record: HistoryRecord = serde_json::from_value(json!({
            "id": "m1",
            "role": "assistant",
            "content": "Done.",
            "created_at": "2024-05-06T07:08:09.123456",
            "context_range": "Sheet1!A1:C3",
            "tool_calls": [{"kind": "write", "status": "error", "error": "locked"}]
        }))
        .unwrap();
        assert_eq!(record.role, Role::Assistant);
        assert_eq!(record.context_range.as_deref(), Some("Sheet1!A1:C3"));
        assert_eq!(record.tool_calls.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_history_record_accepts_camel_case_keys() {
        let record: HistoryRecord = serde_json::from_value(json!({
            "id": "m2",
            "role": "assistant",
            "createdAt": "2024-05-06T07:08:09Z",
            "contextRange": "B1:B4",
            "toolCalls": [{"kind": "highlight", "status": "ok", "range": "B1:B4"}]
        }))
        .unwrap();
        assert_eq!(record.content, "");
        assert_eq!(record.context_range.as_deref(), Some("B1:B4"));
        assert_eq!(
            record.tool_calls.as_ref().map(|calls| calls[0].kind),
            Some(ToolCallKind::Highlight)
        );
    }

    #[test]
    fn test_history_record_rejects_invalid_timestamp() {
        let result = serde_json::from_value::<HistoryRecord>(json!({
            "id": "m1",
            "role": "user",
            "content": "hi",
            "created_at": "not a date"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_tool_call_summary_variants() {
        let mut read = ToolCall::new(ToolCallKind::Read, ToolCallStatus::Ok).with_range("A1:B10");
        read.rows = Some(10);
        read.columns = Some(2);
        read.truncated = Some(true);
        assert_eq!(read.summary(), "Read A1:B10 (10 rows x 2 cols, truncated)");

        let mut failed = ToolCall::new(ToolCallKind::Write, ToolCallStatus::Error);
        failed.error = Some("locked".to_string());
        assert_eq!(failed.summary(), "Write failed: locked");

        let highlight =
            ToolCall::new(ToolCallKind::Highlight, ToolCallStatus::Ok).with_range("C3");
        assert_eq!(highlight.summary(), "Highlighted C3");

        let mut exec = ToolCall::new(ToolCallKind::TempExec, ToolCallStatus::Ok);
        exec.statement = Some("SELECT SUM(B)".to_string());
        exec.rows = Some(1);
        assert_eq!(exec.summary(), "Ran query SELECT SUM(B) (1 rows)");
    }

    #[test]
    fn test_chat_request_omits_absent_context() {
        let request = ChatRequest::new("sum column B");
        let serialized = serde_json::to_value(&request).unwrap();
        assert_eq!(serialized, json!({"query": "sum column B"}));
    }
}
