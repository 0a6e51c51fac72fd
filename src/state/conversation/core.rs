use super::super::message::{Message, TurnTarget};
use super::state::{ActiveTurn, Activity};
use super::{ChatPanel, PanelError, PanelUpdate, TurnAccumulator, TurnOutcome, TurnStep};
use crate::types::{ChatRequest, StreamEvent};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const STREAM_CLOSED_EARLY: &str = "stream closed before the turn completed";

impl ChatPanel {
    /// Runs one turn to its end, streaming when enabled and falling back to a
    /// single request otherwise. Failures surface in the timeline and come back
    /// as `TurnOutcome::Failed`; `Err` means the turn never started.
    pub async fn send_message(
        &mut self,
        request: ChatRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<TurnOutcome, PanelError> {
        if request.query.trim().is_empty() {
            return Err(PanelError::EmptyQuery);
        }
        if self.streaming_enabled {
            self.stream_turn(request, cancel).await
        } else {
            self.fallback_turn(request, cancel).await
        }
    }

    /// Appends the user message and the live assistant message, and returns
    /// the target every event of this turn must carry.
    pub fn begin_turn(&mut self, request: &ChatRequest) -> Result<TurnTarget, PanelError> {
        self.ensure_idle()?;
        let conversation_id = self.require_conversation()?;
        let target = self.next_target(conversation_id);
        let now = Utc::now();

        let user_id = self.timeline.unique_id(target.user_message_id());
        self.timeline.push(Message::user(
            user_id,
            request.query.clone(),
            request.selected_context.clone(),
            now,
        ));
        let live_id = self.timeline.unique_id(target.assistant_message_id());
        self.timeline.push_live(Message::live_assistant(
            live_id,
            request.selected_context.clone(),
            now,
        ));

        self.activity = Activity::Streaming(ActiveTurn {
            target: target.clone(),
            query: request.query.clone(),
            accumulator: TurnAccumulator::new(),
        });
        tracing::info!(turn = %target, "started streaming turn");
        self.emit(PanelUpdate::TimelineChanged);
        Ok(target)
    }

    /// Folds one event of the active turn. Returns the outcome once the turn
    /// has ended.
    pub fn apply_stream_event(
        &mut self,
        target: &TurnTarget,
        event: StreamEvent,
    ) -> Result<Option<TurnOutcome>, PanelError> {
        let Activity::Streaming(turn) = &mut self.activity else {
            return Err(stale_turn(target));
        };
        if turn.target != *target {
            return Err(stale_turn(target));
        }

        let step = turn.accumulator.apply(&mut self.timeline, event, Utc::now());
        Ok(self.settle_step(step))
    }

    /// Ends the active turn with a transport failure shown as an assistant message.
    pub fn fail_turn(
        &mut self,
        target: &TurnTarget,
        message: impl Into<String>,
    ) -> Result<TurnOutcome, PanelError> {
        let message = message.into();
        tracing::warn!(turn = %target, error = %message, "turn failed");

        if let Some(outcome) = self.apply_stream_event(target, StreamEvent::error(message.clone()))? {
            return Ok(outcome);
        }

        // No live message was left to carry the error.
        self.activity = Activity::Idle;
        let id = self.timeline.unique_id(target.assistant_message_id());
        self.timeline
            .push(Message::assistant(id, message.clone(), Utc::now()));
        self.emit(PanelUpdate::TimelineChanged);
        self.emit(PanelUpdate::ToolCallsChanged(None));
        Ok(TurnOutcome::Failed(message))
    }

    /// Stops listening to the active turn. Later events for it are stale.
    pub fn abandon_turn(&mut self, target: &TurnTarget) -> Result<TurnOutcome, PanelError> {
        let Activity::Streaming(turn) = &mut self.activity else {
            return Err(stale_turn(target));
        };
        if turn.target != *target {
            return Err(stale_turn(target));
        }

        let step = turn.accumulator.abandon(&mut self.timeline);
        let outcome = self.settle_step(step);
        self.activity = Activity::Idle;
        Ok(outcome.unwrap_or(TurnOutcome::Abandoned))
    }

    async fn stream_turn(
        &mut self,
        request: ChatRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<TurnOutcome, PanelError> {
        let target = self.begin_turn(&request)?;
        let backend = Arc::clone(&self.backend);

        let opened = tokio::select! {
            biased;
            _ = wait_cancelled(cancel) => return self.abandon_turn(&target),
            opened = backend.send_message_stream(&target.conversation_id, &request) => opened,
        };
        let mut events = match opened {
            Ok(events) => events,
            Err(error) => return self.fail_turn(&target, transport_failure_text(&error)),
        };

        let idle_timeout = self.stream_idle_timeout;
        loop {
            let next = tokio::select! {
                biased;
                _ = wait_cancelled(cancel) => return self.abandon_turn(&target),
                next = tokio::time::timeout(idle_timeout, events.next()) => next,
            };

            let outcome = match next {
                Ok(Some(Ok(event))) => self.apply_stream_event(&target, event)?,
                Ok(Some(Err(error))) => {
                    Some(self.fail_turn(&target, transport_failure_text(&error))?)
                }
                Ok(None) => Some(self.fail_turn(&target, STREAM_CLOSED_EARLY)?),
                Err(_) => Some(self.fail_turn(
                    &target,
                    format!(
                        "stream idle for {}s before the turn completed",
                        idle_timeout.as_secs()
                    ),
                )?),
            };

            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
        }
    }

    async fn fallback_turn(
        &mut self,
        request: ChatRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<TurnOutcome, PanelError> {
        self.ensure_idle()?;
        let conversation_id = self.require_conversation()?;
        let target = self.next_target(conversation_id.clone());

        let user_id = self.timeline.unique_id(target.user_message_id());
        self.timeline.push(Message::user(
            user_id,
            request.query.clone(),
            request.selected_context.clone(),
            Utc::now(),
        ));
        self.activity = Activity::AwaitingReply;
        self.emit(PanelUpdate::TimelineChanged);
        tracing::info!(turn = %target, "sending turn without streaming");

        let backend = Arc::clone(&self.backend);
        let result = tokio::select! {
            biased;
            _ = wait_cancelled(cancel) => {
                self.activity = Activity::Idle;
                tracing::info!(turn = %target, "abandoned turn while waiting for reply");
                return Ok(TurnOutcome::Abandoned);
            }
            result = backend.send_message(&conversation_id, &request) => result,
        };
        self.activity = Activity::Idle;

        match result {
            Ok(response) => {
                self.replace_with_records(response.messages);
                let tool_calls = self.timeline.last_assistant_tool_calls();
                self.emit(PanelUpdate::TimelineChanged);
                self.emit(PanelUpdate::ToolCallsChanged(tool_calls));
                self.emit(PanelUpdate::TurnFinished {
                    query: request.query,
                });
                Ok(TurnOutcome::Completed)
            }
            Err(error) => {
                let message = transport_failure_text(&error);
                tracing::warn!(turn = %target, error = %message, "turn failed");
                let id = self.timeline.unique_id(target.assistant_message_id());
                self.timeline
                    .push(Message::assistant(id, message.clone(), Utc::now()));
                self.emit(PanelUpdate::TimelineChanged);
                self.emit(PanelUpdate::ToolCallsChanged(None));
                Ok(TurnOutcome::Failed(message))
            }
        }
    }

    fn settle_step(&mut self, step: TurnStep) -> Option<TurnOutcome> {
        let outcome = step.outcome();
        match step {
            TurnStep::Buffered | TurnStep::Ignored => {}
            TurnStep::Rendered => self.emit(PanelUpdate::TimelineChanged),
            TurnStep::ToolCalls(tool_calls) => {
                self.emit(PanelUpdate::TimelineChanged);
                self.emit(PanelUpdate::ToolCallsChanged(Some(tool_calls)));
            }
            TurnStep::Completed { tool_calls } | TurnStep::Abandoned { tool_calls } => {
                self.emit(PanelUpdate::TimelineChanged);
                self.emit(PanelUpdate::ToolCallsChanged(tool_calls));
            }
            TurnStep::Failed { .. } => {
                self.emit(PanelUpdate::TimelineChanged);
                self.emit(PanelUpdate::ToolCallsChanged(None));
            }
        }

        let outcome = outcome?;
        if let Activity::Streaming(turn) = std::mem::replace(&mut self.activity, Activity::Idle) {
            tracing::info!(turn = %turn.target, outcome = ?outcome, "turn ended");
            if outcome == TurnOutcome::Completed {
                self.emit(PanelUpdate::TurnFinished { query: turn.query });
            }
        }
        Some(outcome)
    }
}

fn stale_turn(target: &TurnTarget) -> PanelError {
    tracing::debug!(turn = %target, "rejecting event for stale turn");
    PanelError::StaleTurn {
        attempted: target.clone(),
    }
}

fn transport_failure_text(error: &anyhow::Error) -> String {
    format!("{error:#}")
}

async fn wait_cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending::<()>().await,
    }
}
