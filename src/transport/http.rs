//! HTTP transport for the hosted chat API

use super::sse::{SseDecoder, SseFrame};
use super::{ChatRequest, ReplyStream, StreamEvent, Transport, TransportError, TransportReply};
use crate::config::{ChatConfig, ConfigError};
use crate::session::{Message, MessageSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport that talks to the hosted chat API over HTTPS
pub struct HttpTransport {
    client: Client,
    api_key: String,
    bot_id: String,
    message_url: String,
    streaming_url: String,
}

impl HttpTransport {
    pub fn from_config(config: &ChatConfig) -> Result<Self, ConfigError> {
        let bot_id = config.bot_id.clone().ok_or(ConfigError::MissingBotId)?;
        let api_key = config.api_key.clone().ok_or(ConfigError::MissingApiKey)?;

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let base = format!(
            "{}/v2/accounts/me/chat/{}/message",
            config.base_url(),
            bot_id
        );

        Ok(Self {
            client,
            api_key,
            message_url: format!("{base}?v={}", config.api_version),
            streaming_url: format!("{base}/streaming?v={}", config.api_version),
            bot_id,
        })
    }

    fn translate_request(request: &ChatRequest) -> WireRequest<'_> {
        let mut messages: Vec<WireMessage> = request.history.iter().map(WireMessage::from).collect();
        if let Some(text) = &request.text {
            messages.push(WireMessage {
                text: text.clone(),
                source: MessageSource::User,
                timestamp: Some(Utc::now()),
            });
        }
        WireRequest {
            messages,
            context: request.context.as_ref(),
            notes: request.notes.as_ref(),
            conversation_id: request.conversation_id.as_deref(),
        }
    }

    async fn post(&self, url: &str, request: &ChatRequest) -> Result<reqwest::Response, TransportError> {
        let body = Self::translate_request(request);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("KEY {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::from_status(status.as_u16(), &body))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_next_message(&self, request: &ChatRequest) -> Result<TransportReply, TransportError> {
        let response = self.post(&self.message_url, request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::network(format!("Failed to read response: {e}")))?;
        parse_reply(&body)
    }

    async fn stream_next_message(&self, request: &ChatRequest) -> Result<ReplyStream, TransportError> {
        let response = self.post(&self.streaming_url, request).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::from))
            .boxed();
        Ok(decode_reply_stream(body))
    }

    fn bot_id(&self) -> &str {
        &self.bot_id
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    text: String,
    source: MessageSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            text: message.text.clone(),
            source: message.source,
            timestamp: Some(message.timestamp),
        }
    }
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        Message::new(wire.text, wire.source, wire.timestamp.unwrap_or_else(Utc::now))
    }
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    response: WireReply,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReply {
    message: WireMessage,
    #[serde(default)]
    notes: Option<Value>,
    #[serde(default)]
    conversation_id: Option<String>,
}

impl From<WireReply> for TransportReply {
    fn from(wire: WireReply) -> Self {
        Self {
            message: wire.message.into(),
            notes: wire.notes,
            conversation_id: wire.conversation_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireToken {
    token: String,
}

fn parse_reply(body: &str) -> Result<TransportReply, TransportError> {
    serde_json::from_str::<WireEnvelope>(body)
        .map(|envelope| envelope.response.into())
        .map_err(|e| TransportError::malformed(format!("Failed to parse response: {e}")))
}

/// Map one SSE frame to a stream item; `None` for frames that carry nothing
fn interpret_frame(frame: &SseFrame) -> Option<Result<StreamEvent, TransportError>> {
    match frame.event.as_deref() {
        Some("streamToken") => Some(
            serde_json::from_str::<WireToken>(&frame.data)
                .map(|t| StreamEvent::Token(t.token))
                .map_err(|e| TransportError::malformed(format!("Bad streamToken event: {e}"))),
        ),
        Some("endStream") => Some(
            serde_json::from_str::<WireReply>(&frame.data)
                .map(|reply| StreamEvent::Done(reply.into()))
                .map_err(|e| TransportError::malformed(format!("Bad endStream event: {e}"))),
        ),
        Some("error") => Some(Err(TransportError::server_error(format!(
            "Stream error: {}",
            frame.data
        )))),
        // startTokenStream, keep-alives, unknown events
        _ => None,
    }
}

struct DecodeState {
    body: BoxStream<'static, Result<Vec<u8>, TransportError>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamEvent, TransportError>>,
    body_done: bool,
    finished: bool,
}

impl DecodeState {
    fn queue(&mut self, frames: impl IntoIterator<Item = SseFrame>) {
        self.pending
            .extend(frames.into_iter().filter_map(|frame| interpret_frame(&frame)));
    }
}

/// Turn a raw SSE body into reply stream items.
///
/// The stream ends after the final message or the first error; a body that
/// ends without a final message yields a malformed-response error.
fn decode_reply_stream(body: BoxStream<'static, Result<Vec<u8>, TransportError>>) -> ReplyStream {
    let state = DecodeState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        body_done: false,
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if matches!(item, Ok(StreamEvent::Done(_)) | Err(_)) {
                    state.finished = true;
                    state.pending.clear();
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            if state.body_done {
                state.finished = true;
                let error = TransportError::malformed("Stream ended without endStream event");
                return Some((Err(error), state));
            }

            match state.body.next().await {
                Some(Ok(chunk)) => match state.decoder.push(&chunk) {
                    Ok(frames) => state.queue(frames),
                    Err(e) => state.pending.push_back(Err(e)),
                },
                Some(Err(e)) => state.pending.push_back(Err(e)),
                None => {
                    state.body_done = true;
                    let frames = state.decoder.finish();
                    state.queue(frames);
                }
            }
        }
    })
    .boxed()
}
