use super::logging::{debug_payload_enabled, emit_debug_payload};
use super::stream::StreamParser;
use crate::config::Config;
use crate::types::{ChatRequest, ConversationId, HistoryRecord, SendMessageResponse, StreamEvent};
use crate::util::is_local_endpoint_url;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use std::pin::Pin;
use std::time::Duration;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// The chat backend as seen by the panel.
///
/// `send_message_stream` yields events in emission order and is expected to end
/// with exactly one `error` or `done`; callers treat an early end as a
/// transport failure.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send_message_stream(
        &self,
        conversation_id: &ConversationId,
        request: &ChatRequest,
    ) -> Result<EventStream>;

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        request: &ChatRequest,
    ) -> Result<SendMessageResponse>;

    async fn get_history(&self, conversation_id: &ConversationId) -> Result<Vec<HistoryRecord>>;

    async fn clear_history(&self, conversation_id: &ConversationId) -> Result<()>;
}

/// Decodes an SSE byte stream into chat events. A transport error ends the
/// stream after being yielded.
pub fn decode_event_stream(bytes: ByteStream) -> EventStream {
    let events = stream::unfold(Some((bytes, StreamParser::new())), |state| async move {
        let (mut bytes, mut parser) = state?;
        match bytes.next().await {
            Some(Ok(chunk)) => {
                let events: Vec<Result<StreamEvent>> =
                    parser.process(&chunk).into_iter().map(Ok).collect();
                Some((events, Some((bytes, parser))))
            }
            Some(Err(error)) => Some((vec![Err(error)], None)),
            None => {
                let rest: Vec<Result<StreamEvent>> =
                    parser.finish().into_iter().map(Ok).collect();
                if rest.is_empty() {
                    None
                } else {
                    Some((rest, None))
                }
            }
        }
    })
    .flat_map(stream::iter);

    Box::pin(events)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryPayload {
    Records(Vec<HistoryRecord>),
    Wrapped { messages: Vec<HistoryRecord> },
}

impl HistoryPayload {
    fn into_records(self) -> Vec<HistoryRecord> {
        match self {
            Self::Records(records) | Self::Wrapped { messages: records } => records,
        }
    }
}

/// HTTP binding of the chat backend.
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = Url::parse(config.api_url.trim())
            .with_context(|| format!("invalid CELLCHAT_API_URL '{}'", config.api_url))?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            api_token: config.api_token.clone(),
        })
    }

    fn conversation_url(&self, conversation_id: &ConversationId, tail: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("API URL '{}' cannot carry a path", self.base_url))?;
            segments
                .pop_if_empty()
                .push("conversations")
                .push(conversation_id.as_str())
                .extend(tail);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        let request = self.http.request(method, url.clone());
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn request_with_body(
        &self,
        method: Method,
        url: &Url,
        request: &ChatRequest,
    ) -> Result<RequestBuilder> {
        if debug_payload_enabled() {
            let payload = serde_json::to_value(request).context("failed to encode chat request")?;
            emit_debug_payload(url.as_str(), &payload);
        }
        Ok(self.request(method, url).json(request))
    }

    async fn send(&self, request: RequestBuilder, url: &Url) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|error| map_request_error(error, url.as_str()))?
            .error_for_status()
            .map_err(|error| map_request_error(error, url.as_str()))
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn send_message_stream(
        &self,
        conversation_id: &ConversationId,
        request: &ChatRequest,
    ) -> Result<EventStream> {
        let url = self.conversation_url(conversation_id, &["messages", "stream"])?;
        let builder = self
            .request_with_body(Method::POST, &url, request)?
            .header("accept", "text/event-stream");
        let response = self.send(builder, &url).await?;

        let stream_url = url.to_string();
        let bytes = response
            .bytes_stream()
            .map(move |item| item.map_err(|error| map_request_error(error, &stream_url)));
        Ok(decode_event_stream(Box::pin(bytes)))
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        request: &ChatRequest,
    ) -> Result<SendMessageResponse> {
        let url = self.conversation_url(conversation_id, &["messages"])?;
        let builder = self
            .request_with_body(Method::POST, &url, request)?
            .timeout(REQUEST_TIMEOUT);
        let response = self.send(builder, &url).await?;
        response
            .json::<SendMessageResponse>()
            .await
            .with_context(|| format!("invalid chat response from '{url}'"))
    }

    async fn get_history(&self, conversation_id: &ConversationId) -> Result<Vec<HistoryRecord>> {
        let url = self.conversation_url(conversation_id, &["history"])?;
        let builder = self.request(Method::GET, &url).timeout(REQUEST_TIMEOUT);
        let response = self.send(builder, &url).await?;
        let payload = response
            .json::<HistoryPayload>()
            .await
            .with_context(|| format!("invalid chat history from '{url}'"))?;
        Ok(payload.into_records())
    }

    async fn clear_history(&self, conversation_id: &ConversationId) -> Result<()> {
        let url = self.conversation_url(conversation_id, &["history"])?;
        let builder = self.request(Method::DELETE, &url).timeout(REQUEST_TIMEOUT);
        self.send(builder, &url).await?;
        Ok(())
    }
}

fn map_request_error(error: reqwest::Error, request_url: &str) -> anyhow::Error {
    if error.is_connect() && is_local_endpoint_url(request_url) {
        return anyhow!(
            "cannot reach local chat backend '{}': {}. Start the backend or update CELLCHAT_API_URL.",
            request_url,
            error
        );
    }
    if error.is_connect() {
        return anyhow!("cannot reach chat backend '{}': {}", request_url, error);
    }
    if error.is_timeout() {
        return anyhow!("request to '{}' timed out: {}", request_url, error);
    }
    if let Some(status) = error.status() {
        return anyhow!(
            "chat backend '{}' returned HTTP {}: {}",
            request_url,
            status,
            error
        );
    }
    anyhow!("request to '{}' failed: {}", request_url, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend(api_url: &str) -> HttpBackend {
        let config = Config {
            api_url: api_url.to_string(),
            ..Config::default()
        };
        HttpBackend::new(&config).expect("backend builds")
    }

    fn byte_stream(chunks: Vec<Result<&'static str>>) -> ByteStream {
        Box::pin(stream::iter(
            chunks
                .into_iter()
                .map(|chunk| chunk.map(|text| Bytes::from_static(text.as_bytes())))
                .collect::<Vec<_>>(),
        ))
    }

    #[test]
    fn test_conversation_url_appends_encoded_segments() {
        let backend = backend("http://localhost:8000/api/");
        let url = backend
            .conversation_url(&ConversationId::new("sheet 1/q"), &["messages", "stream"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/conversations/sheet%201%2Fq/messages/stream"
        );

        let history = backend
            .conversation_url(&ConversationId::new("c-7"), &["history"])
            .unwrap();
        assert_eq!(history.as_str(), "http://localhost:8000/api/conversations/c-7/history");
    }

    #[test]
    fn test_new_rejects_unparsable_url() {
        let config = Config {
            api_url: "::not a url".to_string(),
            ..Config::default()
        };
        assert!(HttpBackend::new(&config).is_err());
    }

    #[test]
    fn test_history_payload_accepts_bare_and_wrapped_forms() {
        let record = json!({"id": "m1", "role": "user", "content": "hi", "created_at": "2024-01-01T00:00:00Z"});
        let bare: HistoryPayload = serde_json::from_value(json!([record.clone()])).unwrap();
        assert_eq!(bare.into_records().len(), 1);
        let wrapped: HistoryPayload =
            serde_json::from_value(json!({"messages": [record.clone(), record]})).unwrap();
        assert_eq!(wrapped.into_records().len(), 2);
    }

    #[tokio::test]
    async fn test_decode_event_stream_spans_chunks_and_flushes_tail() {
        let bytes = byte_stream(vec![
            Ok("data: {\"type\":\"delta\",\"te"),
            Ok("xt\":\"Let me check\"}\n\n"),
            Ok("event: tool_call\ndata: {\"tool_call\":{\"kind\":\"read\",\"status\":\"ok\"}}\n\n"),
            Ok("data: {\"type\":\"done\",\"final_message\":{\"content\":\"Done\"}}"),
        ]);

        let events: Vec<StreamEvent> = decode_event_stream(bytes)
            .map(|item| item.expect("no transport error"))
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::delta("Let me check"));
        assert!(matches!(events[1], StreamEvent::ToolCall { .. }));
        assert!(events[2].is_terminal());
    }

    #[tokio::test]
    async fn test_decode_event_stream_stops_after_transport_error() {
        let bytes = byte_stream(vec![
            Ok("data: {\"type\":\"delta\",\"text\":\"a\"}\n\n"),
            Err(anyhow!("connection reset")),
            Ok("data: {\"type\":\"delta\",\"text\":\"b\"}\n\n"),
        ]);

        let items: Vec<Result<StreamEvent>> = decode_event_stream(bytes).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        let error = items[1].as_ref().unwrap_err();
        assert!(error.to_string().contains("connection reset"));
    }
}
