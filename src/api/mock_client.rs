use super::client::{decode_event_stream, ByteStream, ChatBackend, EventStream};
use crate::types::{ChatRequest, ConversationId, HistoryRecord, SendMessageResponse, StreamEvent};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Scripted reply to one `send_message_stream` call.
pub enum MockStream {
    /// Yields the events, then ends.
    Events(Vec<StreamEvent>),
    /// Raw SSE frames, decoded exactly as a live response would be.
    Sse(Vec<String>),
    /// Yields the events, then a transport error.
    FailAfter {
        events: Vec<StreamEvent>,
        error: String,
    },
    /// Yields the events, then never produces another item.
    Stall(Vec<StreamEvent>),
    /// The request itself is rejected.
    Reject(String),
}

/// In-memory backend replaying scripted streams and replies.
#[derive(Default)]
pub struct MockBackend {
    streams: Mutex<VecDeque<MockStream>>,
    replies: Mutex<VecDeque<Result<Vec<HistoryRecord>, String>>>,
    history: Mutex<Vec<HistoryRecord>>,
    history_error: Mutex<Option<String>>,
    clear_error: Mutex<Option<String>>,
    calls: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(self, script: MockStream) -> Self {
        lock_owned(&self.streams).push_back(script);
        self
    }

    pub fn with_reply(self, messages: Vec<HistoryRecord>) -> Self {
        lock_owned(&self.replies).push_back(Ok(messages));
        self
    }

    pub fn with_reply_error(self, message: impl Into<String>) -> Self {
        lock_owned(&self.replies).push_back(Err(message.into()));
        self
    }

    pub fn with_history(self, records: Vec<HistoryRecord>) -> Self {
        *lock_owned(&self.history) = records;
        self
    }

    pub fn with_history_error(self, message: impl Into<String>) -> Self {
        *lock_owned(&self.history_error) = Some(message.into());
        self
    }

    pub fn with_clear_error(self, message: impl Into<String>) -> Self {
        *lock_owned(&self.clear_error) = Some(message.into());
        self
    }

    /// Backend calls in order, as `operation:conversation`.
    pub fn calls(&self) -> Vec<String> {
        lock_owned(&self.calls).clone()
    }

    pub fn stored_history(&self) -> Vec<HistoryRecord> {
        lock_owned(&self.history).clone()
    }

    fn record_call(&self, operation: &str, conversation_id: &ConversationId) -> Result<()> {
        lock(&self.calls)?.push(format!("{operation}:{conversation_id}"));
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn send_message_stream(
        &self,
        conversation_id: &ConversationId,
        _request: &ChatRequest,
    ) -> Result<EventStream> {
        self.record_call("send_message_stream", conversation_id)?;
        let script = lock(&self.streams)?
            .pop_front()
            .ok_or_else(|| anyhow!("MockBackend: No more streams configured"))?;

        let events: EventStream = match script {
            MockStream::Events(events) => Box::pin(stream::iter(events.into_iter().map(Ok))),
            MockStream::Sse(frames) => {
                let chunks: Vec<Result<Bytes>> = frames
                    .into_iter()
                    .map(|frame| {
                        let framed = if frame.ends_with("\n\n") {
                            frame
                        } else {
                            format!("{frame}\n\n")
                        };
                        Ok(Bytes::from(framed))
                    })
                    .collect();
                let bytes: ByteStream = Box::pin(stream::iter(chunks));
                decode_event_stream(bytes)
            }
            MockStream::FailAfter { events, error } => Box::pin(stream::iter(
                events
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(anyhow!(error)))),
            )),
            MockStream::Stall(events) => Box::pin(futures::StreamExt::chain(
                stream::iter(events.into_iter().map(Ok)),
                stream::pending::<Result<StreamEvent>>(),
            )),
            MockStream::Reject(error) => return Err(anyhow!(error)),
        };
        Ok(events)
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        _request: &ChatRequest,
    ) -> Result<SendMessageResponse> {
        self.record_call("send_message", conversation_id)?;
        let reply = lock(&self.replies)?
            .pop_front()
            .ok_or_else(|| anyhow!("MockBackend: No more replies configured"))?;
        let messages = reply.map_err(|error| anyhow!(error))?;
        *lock(&self.history)? = messages.clone();
        Ok(SendMessageResponse { messages })
    }

    async fn get_history(&self, conversation_id: &ConversationId) -> Result<Vec<HistoryRecord>> {
        self.record_call("get_history", conversation_id)?;
        if let Some(error) = lock(&self.history_error)?.clone() {
            return Err(anyhow!(error));
        }
        Ok(lock(&self.history)?.clone())
    }

    async fn clear_history(&self, conversation_id: &ConversationId) -> Result<()> {
        self.record_call("clear_history", conversation_id)?;
        if let Some(error) = lock(&self.clear_error)?.clone() {
            return Err(anyhow!(error));
        }
        lock(&self.history)?.clear();
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| anyhow!("MockBackend: state lock poisoned"))
}

fn lock_owned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
