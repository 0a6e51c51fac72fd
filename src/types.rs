mod api;
pub(crate) mod timestamp;

pub use api::{
    CanonicalMessage, ChatRequest, ConversationId, HistoryRecord, Role, SendMessageResponse,
    StreamEvent, ToolCall, ToolCallKind, ToolCallStatus,
};
