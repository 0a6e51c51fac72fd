use super::logging::emit_sse_parse_error;
use crate::types::StreamEvent;
use serde_json::Value;

/// Incremental SSE decoder for the chat event stream.
///
/// Frames are separated by a blank line. The `event:` line is optional; when
/// present it names the event type for payloads that omit `type`.
#[derive(Default)]
pub struct StreamParser {
    buffer: String,
    pending_bytes: Vec<u8>,
    pending_cr: bool,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.push_bytes(chunk);
        let mut events = Vec::new();
        let mut start = 0;

        while let Some(end) = self.buffer[start..].find("\n\n") {
            let frame_end = start + end + 2;
            if let Some(event) = parse_frame(&self.buffer[start..frame_end]) {
                events.push(event);
            }
            start = frame_end;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }

        events
    }

    /// Parses whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if !self.pending_bytes.is_empty() {
            let tail = std::mem::take(&mut self.pending_bytes);
            self.push_text(&String::from_utf8_lossy(&tail));
        }
        if std::mem::take(&mut self.pending_cr) {
            self.buffer.push('\n');
        }
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            return Vec::new();
        }
        parse_frame(&rest).into_iter().collect()
    }

    fn push_bytes(&mut self, chunk: &[u8]) {
        self.pending_bytes.extend_from_slice(chunk);
        loop {
            let (valid_up_to, invalid_len) = match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => (text.len(), None),
                Err(error) => (error.valid_up_to(), error.error_len()),
            };

            let rest = self.pending_bytes.split_off(valid_up_to);
            let complete = std::mem::replace(&mut self.pending_bytes, rest);
            if let Ok(text) = std::str::from_utf8(&complete) {
                self.push_text(text);
            }

            // An incomplete sequence at the end waits for the next chunk.
            let Some(invalid_len) = invalid_len else {
                return;
            };
            self.pending_bytes.drain(..invalid_len);
            self.push_text("\u{FFFD}");
        }
    }

    /// Appends decoded text with line endings normalized to `\n`. A trailing
    /// `\r` is held back since the next chunk may start with its `\n`.
    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }

        let mut text = if std::mem::take(&mut self.pending_cr) {
            format!("\r{text}")
        } else {
            text.to_string()
        };
        if text.ends_with('\r') {
            text.pop();
            self.pending_cr = true;
        }

        if text.contains('\r') {
            self.buffer
                .push_str(&text.replace("\r\n", "\n").replace('\r', "\n"));
        } else {
            self.buffer.push_str(&text);
        }
    }
}

fn parse_frame(frame: &str) -> Option<StreamEvent> {
    let mut event_type = None;
    let mut data_lines = Vec::new();

    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_type = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    let data = data_lines.join("\n");
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    let mut payload: Value = match serde_json::from_str(data) {
        Ok(payload) => payload,
        Err(error) => {
            emit_sse_parse_error(event_type.as_deref(), data, &error);
            return None;
        }
    };

    if let (Some(object), Some(name)) = (payload.as_object_mut(), event_type.as_deref()) {
        if !object.contains_key("type") && !name.is_empty() {
            object.insert("type".to_string(), Value::String(name.to_string()));
        }
    }

    let wire_type = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !StreamEvent::WIRE_TYPES.contains(&wire_type) {
        tracing::debug!(wire_type, "skipping unrecognized chat stream event");
        return None;
    }

    match serde_json::from_value::<StreamEvent>(payload) {
        Ok(event) => Some(event),
        Err(error) => {
            emit_sse_parse_error(event_type.as_deref(), data, &error);
            None
        }
    }
}
