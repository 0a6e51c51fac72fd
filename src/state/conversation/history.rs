use super::state::Activity;
use super::{ChatPanel, PanelError, PanelUpdate};
use crate::types::ConversationId;
use std::sync::Arc;

impl ChatPanel {
    /// Switches the panel to `conversation_id`, loading its persisted history.
    /// `None` shows the welcome entry without touching the backend.
    ///
    /// A turn still streaming for the previous conversation is abandoned, so
    /// its target can no longer apply events.
    pub async fn activate(
        &mut self,
        conversation_id: Option<ConversationId>,
    ) -> Result<(), PanelError> {
        if let Some(target) = self.active_turn().cloned() {
            tracing::info!(turn = %target, "abandoning turn on conversation switch");
            self.abandon_turn(&target)?;
        }
        self.ensure_idle()?;

        self.conversation_id = conversation_id;
        match self.conversation_id.clone() {
            Some(conversation_id) => self.load_history_for(conversation_id).await,
            None => {
                self.reset_to_welcome();
                self.emit(PanelUpdate::TimelineChanged);
                self.emit(PanelUpdate::ToolCallsChanged(None));
            }
        }
        Ok(())
    }

    /// Loads history for the active conversation again.
    pub async fn reload_history(&mut self) -> Result<(), PanelError> {
        self.ensure_idle()?;
        let conversation_id = self.require_conversation()?;
        self.load_history_for(conversation_id).await;
        Ok(())
    }

    /// Deletes persisted history and resets to the welcome entry. On failure
    /// the timeline is left as it was and a notice is emitted.
    pub async fn clear_history(&mut self) -> Result<(), PanelError> {
        self.ensure_idle()?;
        let conversation_id = self.require_conversation()?;

        self.activity = Activity::ClearingHistory;
        let backend = Arc::clone(&self.backend);
        let result = backend.clear_history(&conversation_id).await;
        self.activity = Activity::Idle;

        if let Err(error) = result {
            tracing::warn!(conversation = %conversation_id, error = %format!("{error:#}"), "failed to clear history");
            self.emit(PanelUpdate::Notice(format!(
                "Could not clear the conversation: {error:#}"
            )));
            return Err(PanelError::Backend(error));
        }

        tracing::info!(conversation = %conversation_id, "cleared history");
        self.reset_to_welcome();
        self.emit(PanelUpdate::TimelineChanged);
        self.emit(PanelUpdate::ToolCallsChanged(None));
        Ok(())
    }

    async fn load_history_for(&mut self, conversation_id: ConversationId) {
        self.activity = Activity::LoadingHistory;
        let backend = Arc::clone(&self.backend);
        let result = backend.get_history(&conversation_id).await;
        self.activity = Activity::Idle;

        match result {
            Ok(records) => {
                tracing::debug!(
                    conversation = %conversation_id,
                    count = records.len(),
                    "loaded history"
                );
                self.replace_with_records(records);
            }
            Err(error) => {
                tracing::warn!(
                    conversation = %conversation_id,
                    error = %format!("{error:#}"),
                    "history load failed; showing welcome entry"
                );
                self.reset_to_welcome();
            }
        }

        let tool_calls = self.timeline.last_assistant_tool_calls();
        self.emit(PanelUpdate::TimelineChanged);
        self.emit(PanelUpdate::ToolCallsChanged(tool_calls));
    }
}
