use super::message::Message;
use crate::types::ToolCall;

/// Ordered, displayable sequence of chat messages.
///
/// At most one message is live (`is_streaming`), and it is always the last one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    messages: Vec<Message>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(welcome: Message) -> Self {
        Self {
            messages: vec![welcome],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn live(&self) -> Option<&Message> {
        self.messages.last().filter(|message| message.is_streaming)
    }

    pub(crate) fn live_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut().filter(|message| message.is_streaming)
    }

    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|message| message.is_streaming).count()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.messages.iter().any(|message| message.id == id)
    }

    /// Tool calls of the most recent assistant entry.
    pub fn last_assistant_tool_calls(&self) -> Option<Vec<ToolCall>> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.is_assistant())
            .and_then(|message| message.tool_calls.clone())
            .filter(|tool_calls| !tool_calls.is_empty())
    }

    pub(crate) fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages
            .into_iter()
            .map(|mut message| {
                message.is_streaming = false;
                message
            })
            .collect();
    }

    pub(crate) fn reset_to(&mut self, welcome: Message) {
        self.messages = vec![welcome];
    }

    /// Appends a finished message, first settling any live one.
    pub(crate) fn push(&mut self, message: Message) {
        self.settle_live();
        self.messages.push(Message {
            is_streaming: false,
            ..message
        });
    }

    /// Appends the turn's live message. A leftover live message is settled so
    /// the new one is the only streaming entry.
    pub(crate) fn push_live(&mut self, message: Message) {
        self.settle_live();
        self.messages.push(Message {
            is_streaming: true,
            ..message
        });
    }

    /// Returns `candidate`, or a suffixed variant when the id is taken.
    pub(crate) fn unique_id(&self, candidate: String) -> String {
        if !self.contains_id(&candidate) {
            return candidate;
        }
        let mut suffix = 2;
        loop {
            let id = format!("{candidate}-{suffix}");
            if !self.contains_id(&id) {
                return id;
            }
            suffix += 1;
        }
    }

    fn settle_live(&mut self) {
        for message in self.messages.iter_mut().filter(|m| m.is_streaming) {
            tracing::warn!(id = %message.id, "settling leftover live message");
            message.is_streaming = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolCallKind, ToolCallStatus};
    use chrono::Utc;

    fn assistant(id: &str, tool_calls: Option<Vec<ToolCall>>) -> Message {
        Message {
            tool_calls,
            ..Message::assistant(id, id, Utc::now())
        }
    }

    #[test]
    fn test_push_live_keeps_single_streaming_message() {
        let mut timeline = Timeline::new();
        timeline.push_live(Message::live_assistant("a", None, Utc::now()));
        timeline.push_live(Message::live_assistant("b", None, Utc::now()));

        assert_eq!(timeline.streaming_count(), 1);
        assert_eq!(timeline.live().map(|m| m.id.as_str()), Some("b"));
    }

    #[test]
    fn test_live_is_only_the_last_streaming_message() {
        let mut timeline = Timeline::new();
        timeline.push_live(Message::live_assistant("a", None, Utc::now()));
        timeline.push(Message::user("u", "hi", None, Utc::now()));

        assert!(timeline.live().is_none());
        assert_eq!(timeline.streaming_count(), 0);
    }

    #[test]
    fn test_last_assistant_tool_calls_scans_from_end() {
        let call = ToolCall::new(ToolCallKind::Highlight, ToolCallStatus::Ok);
        let mut timeline = Timeline::new();
        timeline.replace(vec![
            assistant("a1", Some(vec![call.clone()])),
            Message::user("u1", "next", None, Utc::now()),
        ]);
        assert_eq!(timeline.last_assistant_tool_calls(), Some(vec![call]));

        timeline.push(assistant("a2", None));
        assert_eq!(timeline.last_assistant_tool_calls(), None);
    }

    #[test]
    fn test_replace_clears_streaming_flags() {
        let mut timeline = Timeline::new();
        timeline.replace(vec![Message::live_assistant("x", None, Utc::now())]);
        assert_eq!(timeline.streaming_count(), 0);
    }

    #[test]
    fn test_unique_id_suffixes_collisions() {
        let mut timeline = Timeline::new();
        timeline.push(assistant("m", None));
        timeline.push(assistant("m-2", None));
        assert_eq!(timeline.unique_id("n".to_string()), "n");
        assert_eq!(timeline.unique_id("m".to_string()), "m-3");
    }
}
