use super::super::message::{Message, TurnId, TurnTarget};
use super::super::timeline::Timeline;
use super::streaming::{emit_update, TurnAccumulator};
use crate::api::ChatBackend;
use crate::config::Config;
use crate::types::{ConversationId, HistoryRecord, ToolCall};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Notifications for collaborators outside the panel.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelUpdate {
    /// The timeline was mutated.
    TimelineChanged,
    /// The current turn's tool calls changed; `None` means there are none.
    ToolCallsChanged(Option<Vec<ToolCall>>),
    /// A turn completed; carries the raw user text for command echo.
    TurnFinished { query: String },
    /// User-visible notice that is not part of the timeline.
    Notice(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("chat panel is busy: {0}")]
    Busy(&'static str),
    #[error("no conversation is active")]
    NoConversation,
    #[error("message is empty")]
    EmptyQuery,
    #[error("turn {attempted} is not the active turn")]
    StaleTurn { attempted: TurnTarget },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub(super) struct ActiveTurn {
    pub(super) target: TurnTarget,
    pub(super) query: String,
    pub(super) accumulator: TurnAccumulator,
}

/// What the panel is waiting on. Anything but `Idle` blocks new work.
pub(super) enum Activity {
    Idle,
    Streaming(ActiveTurn),
    AwaitingReply,
    LoadingHistory,
    ClearingHistory,
}

impl Activity {
    fn busy_reason(&self) -> Option<&'static str> {
        match self {
            Self::Idle => None,
            Self::Streaming(_) => Some("a reply is streaming"),
            Self::AwaitingReply => Some("waiting for a reply"),
            Self::LoadingHistory => Some("loading history"),
            Self::ClearingHistory => Some("clearing history"),
        }
    }
}

/// Chat panel state: the timeline plus the single in-flight operation.
pub struct ChatPanel {
    pub(super) backend: Arc<dyn ChatBackend>,
    pub(super) conversation_id: Option<ConversationId>,
    pub(super) timeline: Timeline,
    pub(super) welcome: Message,
    pub(super) streaming_enabled: bool,
    pub(super) stream_idle_timeout: Duration,
    pub(super) activity: Activity,
    pub(super) next_turn_id: u64,
    pub(super) updates_tx: Option<mpsc::UnboundedSender<PanelUpdate>>,
}

impl ChatPanel {
    pub fn new(backend: Arc<dyn ChatBackend>, config: &Config) -> Self {
        let welcome = Message::welcome(config.welcome_message.clone(), Utc::now());
        Self {
            backend,
            conversation_id: None,
            timeline: Timeline::seeded(welcome.clone()),
            welcome,
            streaming_enabled: config.streaming,
            stream_idle_timeout: config.stream_idle_timeout(),
            activity: Activity::Idle,
            next_turn_id: 1,
            updates_tx: None,
        }
    }

    pub fn with_updates(mut self, updates_tx: mpsc::UnboundedSender<PanelUpdate>) -> Self {
        self.updates_tx = Some(updates_tx);
        self
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn messages(&self) -> &[Message] {
        self.timeline.messages()
    }

    pub fn welcome(&self) -> &Message {
        &self.welcome
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    /// True while a turn, history load or clear is outstanding; input
    /// submission should be disabled.
    pub fn is_busy(&self) -> bool {
        self.activity.busy_reason().is_some()
    }

    pub fn active_turn(&self) -> Option<&TurnTarget> {
        match &self.activity {
            Activity::Streaming(turn) => Some(&turn.target),
            _ => None,
        }
    }

    pub fn streaming_enabled(&self) -> bool {
        self.streaming_enabled
    }

    pub fn set_streaming_enabled(&mut self, enabled: bool) {
        self.streaming_enabled = enabled;
    }

    pub(super) fn ensure_idle(&self) -> Result<(), PanelError> {
        match self.activity.busy_reason() {
            Some(reason) => Err(PanelError::Busy(reason)),
            None => Ok(()),
        }
    }

    pub(super) fn require_conversation(&self) -> Result<ConversationId, PanelError> {
        self.conversation_id
            .clone()
            .ok_or(PanelError::NoConversation)
    }

    pub(super) fn next_target(&mut self, conversation_id: ConversationId) -> TurnTarget {
        let turn_id = TurnId(self.next_turn_id);
        self.next_turn_id += 1;
        TurnTarget::new(conversation_id, turn_id)
    }

    pub(super) fn emit(&self, update: PanelUpdate) {
        emit_update(self.updates_tx.as_ref(), update);
    }

    pub(super) fn reset_to_welcome(&mut self) {
        self.timeline.reset_to(self.welcome.clone());
    }

    /// Replaces the timeline wholesale; an empty history shows the welcome entry.
    pub(super) fn replace_with_records(&mut self, records: Vec<HistoryRecord>) {
        if records.is_empty() {
            self.reset_to_welcome();
            return;
        }
        self.timeline
            .replace(records.into_iter().map(Message::from).collect());
    }
}
