use super::super::message::Message;
use super::super::timeline::Timeline;
use super::PanelUpdate;
use crate::types::{CanonicalMessage, StreamEvent, ToolCall};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnPhase {
    #[default]
    Streaming,
    Completed,
    Failed,
    Abandoned,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed(String),
    Abandoned,
}

/// Result of folding one event into the timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnStep {
    /// Text was appended and the live message shows it.
    Rendered,
    /// Text was appended but is held until the turn completes.
    Buffered,
    /// A tool call was recorded; carries every call seen so far.
    ToolCalls(Vec<ToolCall>),
    Completed { tool_calls: Option<Vec<ToolCall>> },
    Failed { message: String },
    Abandoned { tool_calls: Option<Vec<ToolCall>> },
    /// The turn already ended, or there is no live message to update.
    Ignored,
}

impl TurnStep {
    pub fn outcome(&self) -> Option<TurnOutcome> {
        match self {
            Self::Completed { .. } => Some(TurnOutcome::Completed),
            Self::Failed { message } => Some(TurnOutcome::Failed(message.clone())),
            Self::Abandoned { .. } => Some(TurnOutcome::Abandoned),
            Self::Rendered | Self::Buffered | Self::ToolCalls(_) | Self::Ignored => None,
        }
    }
}

/// Working state of one streaming turn.
///
/// Text streamed before the first tool call renders live. The first tool call
/// freezes that text as the acknowledgement; anything streamed afterwards is
/// only shown once the canonical record arrives with `done`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnAccumulator {
    aggregated_text: String,
    tool_calls: Vec<ToolCall>,
    acknowledgement: Option<String>,
    tool_calls_seen: bool,
    phase: TurnPhase,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregated_text(&self) -> &str {
        &self.aggregated_text
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn acknowledgement(&self) -> Option<&str> {
        self.acknowledgement.as_deref()
    }

    pub fn tool_calls_seen(&self) -> bool {
        self.tool_calls_seen
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Folds one event into the live message of `timeline`.
    pub fn apply(
        &mut self,
        timeline: &mut Timeline,
        event: StreamEvent,
        now: DateTime<Utc>,
    ) -> TurnStep {
        if self.phase != TurnPhase::Streaming {
            tracing::debug!(phase = ?self.phase, "ignoring event for a finished turn");
            return TurnStep::Ignored;
        }
        let Some(live) = timeline.live_mut() else {
            tracing::warn!("timeline has no live message; dropping stream event");
            return TurnStep::Ignored;
        };

        match event {
            StreamEvent::Delta { text } => {
                self.aggregated_text.push_str(&text);
                if self.tool_calls_seen {
                    return TurnStep::Buffered;
                }
                live.content.clone_from(&self.aggregated_text);
                TurnStep::Rendered
            }
            StreamEvent::ToolCall { tool_call } => {
                if !self.tool_calls_seen {
                    self.tool_calls_seen = true;
                    let acknowledgement = acknowledgement_text(&self.aggregated_text);
                    live.content.clone_from(&acknowledgement);
                    self.acknowledgement = Some(acknowledgement);
                }
                live.tool_calls
                    .get_or_insert_with(Vec::new)
                    .push(tool_call.clone());
                self.tool_calls.push(tool_call);
                TurnStep::ToolCalls(self.tool_calls.clone())
            }
            StreamEvent::Error { message } => {
                self.phase = TurnPhase::Failed;
                live.content.clone_from(&message);
                live.tool_calls = None;
                live.is_streaming = false;
                TurnStep::Failed { message }
            }
            StreamEvent::Done { final_message } => {
                self.phase = TurnPhase::Completed;
                if self.tool_calls_seen {
                    self.complete_after_tools(timeline, final_message, now)
                } else {
                    self.complete_in_place(timeline, final_message, now)
                }
            }
        }
    }

    /// Ends the turn without a terminal event. The live message keeps what it
    /// currently displays.
    pub fn abandon(&mut self, timeline: &mut Timeline) -> TurnStep {
        if self.phase != TurnPhase::Streaming {
            return TurnStep::Ignored;
        }
        self.phase = TurnPhase::Abandoned;

        let tool_calls = match timeline.live_mut() {
            Some(live) => {
                live.is_streaming = false;
                live.tool_calls.clone()
            }
            None => non_empty(self.tool_calls.clone()),
        };
        TurnStep::Abandoned { tool_calls }
    }

    fn complete_in_place(
        &self,
        timeline: &mut Timeline,
        canonical: CanonicalMessage,
        now: DateTime<Utc>,
    ) -> TurnStep {
        let CanonicalMessage {
            id,
            content,
            created_at,
            context_range,
            tool_calls,
        } = canonical;

        let id = id.filter(|id| !id.is_empty()).filter(|id| {
            let taken = timeline
                .messages()
                .iter()
                .any(|message| !message.is_streaming && message.id == *id);
            if taken {
                tracing::warn!(id = %id, "canonical id already in timeline; keeping local id");
            }
            !taken
        });
        let tool_calls = tool_calls.and_then(non_empty);

        let Some(live) = timeline.live_mut() else {
            return TurnStep::Ignored;
        };
        live.content = match content {
            Some(text) if !text.is_empty() => text,
            _ => self.aggregated_text.clone(),
        };
        live.tool_calls = tool_calls.clone();
        if let Some(id) = id {
            live.id = id;
        }
        live.created_at = created_at.unwrap_or(now);
        if context_range.is_some() {
            live.context_range = context_range;
        }
        live.is_streaming = false;

        TurnStep::Completed { tool_calls }
    }

    fn complete_after_tools(
        &self,
        timeline: &mut Timeline,
        canonical: CanonicalMessage,
        now: DateTime<Utc>,
    ) -> TurnStep {
        let CanonicalMessage {
            id,
            content,
            created_at,
            context_range,
            tool_calls,
        } = canonical;

        let acknowledgement = self
            .acknowledgement
            .clone()
            .unwrap_or_else(|| acknowledgement_text(&self.aggregated_text));
        let tool_calls = match tool_calls {
            Some(tool_calls) => non_empty(tool_calls),
            None => {
                tracing::warn!(
                    observed = self.tool_calls.len(),
                    "canonical record omitted tool calls; keeping the locally observed list"
                );
                non_empty(self.tool_calls.clone())
            }
        };

        let live_id = {
            let Some(live) = timeline.live_mut() else {
                return TurnStep::Ignored;
            };
            live.content = acknowledgement;
            live.tool_calls = tool_calls.clone();
            if let Some(range) = &context_range {
                live.context_range = Some(range.clone());
            }
            live.is_streaming = false;
            live.id.clone()
        };

        if let Some(answer) = content.filter(|text| !text.trim().is_empty()) {
            let id = id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("{live_id}-final"));
            let id = timeline.unique_id(id);
            timeline.push(Message {
                context_range,
                ..Message::assistant(id, answer, created_at.unwrap_or(now))
            });
        }

        TurnStep::Completed { tool_calls }
    }
}

/// Text shown as the acknowledgement once tool invocation starts.
pub(super) fn acknowledgement_text(aggregated: &str) -> String {
    let trimmed = aggregated.trim();
    if trimmed.is_empty() {
        aggregated.to_string()
    } else {
        trimmed.to_string()
    }
}

pub(super) fn non_empty(tool_calls: Vec<ToolCall>) -> Option<Vec<ToolCall>> {
    if tool_calls.is_empty() {
        None
    } else {
        Some(tool_calls)
    }
}

pub(super) fn emit_update(
    updates_tx: Option<&mpsc::UnboundedSender<PanelUpdate>>,
    update: PanelUpdate,
) {
    if let Some(tx) = updates_tx {
        let _ = tx.send(update);
    }
}
