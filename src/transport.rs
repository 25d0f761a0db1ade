//! Transport abstraction
//!
//! A transport turns the transcript plus a new user message into the next
//! bot message, either in one response or as a token stream.

mod error;
pub mod http;
mod sse;

pub use error::{TransportError, TransportErrorKind};
pub use http::HttpTransport;

use crate::session::Message;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

/// Everything the transport needs to produce the next bot message
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Transcript before the new user message, oldest first
    pub history: Vec<Message>,
    /// New user text; `None` for a greeting request
    pub text: Option<String>,
    pub context: Option<Map<String, Value>>,
    pub notes: Option<Value>,
    pub conversation_id: Option<String>,
}

/// A completed bot reply
#[derive(Debug, Clone, PartialEq)]
pub struct TransportReply {
    pub message: Message,
    pub notes: Option<Value>,
    pub conversation_id: Option<String>,
}

impl TransportReply {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            notes: None,
            conversation_id: None,
        }
    }
}

/// One item of a streamed reply
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Partial text to append to the growing bot message
    Token(String),
    /// Final, authoritative reply; always the last item
    Done(TransportReply),
}

pub type ReplyStream = BoxStream<'static, Result<StreamEvent, TransportError>>;

/// Client for the hosted conversational backend
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the next bot message in one round trip
    async fn fetch_next_message(&self, request: &ChatRequest) -> Result<TransportReply, TransportError>;

    /// Open a token stream for the next bot message
    async fn stream_next_message(&self, request: &ChatRequest) -> Result<ReplyStream, TransportError>;

    /// Drop server-side state for a conversation
    async fn restart(&self, _conversation_id: Option<&str>) -> Result<(), TransportError> {
        Ok(())
    }

    /// Bot identity, for logging
    fn bot_id(&self) -> &str;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn fetch_next_message(&self, request: &ChatRequest) -> Result<TransportReply, TransportError> {
        (**self).fetch_next_message(request).await
    }

    async fn stream_next_message(&self, request: &ChatRequest) -> Result<ReplyStream, TransportError> {
        (**self).stream_next_message(request).await
    }

    async fn restart(&self, conversation_id: Option<&str>) -> Result<(), TransportError> {
        (**self).restart(conversation_id).await
    }

    fn bot_id(&self) -> &str {
        (**self).bot_id()
    }
}

/// Logging wrapper for transports
pub struct LoggingTransport {
    inner: Arc<dyn Transport>,
    bot_id: String,
}

impl LoggingTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        let bot_id = inner.bot_id().to_string();
        Self { inner, bot_id }
    }
}

#[async_trait]
impl Transport for LoggingTransport {
    async fn fetch_next_message(&self, request: &ChatRequest) -> Result<TransportReply, TransportError> {
        let start = Instant::now();
        let result = self.inner.fetch_next_message(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(reply) => {
                tracing::info!(
                    bot = %self.bot_id,
                    duration_ms = %duration.as_millis(),
                    history = request.history.len(),
                    reply_chars = reply.message.text.chars().count(),
                    "Chat request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    bot = %self.bot_id,
                    duration_ms = %duration.as_millis(),
                    kind = e.kind.as_str(),
                    error = %e.message,
                    "Chat request failed"
                );
            }
        }

        result
    }

    async fn stream_next_message(&self, request: &ChatRequest) -> Result<ReplyStream, TransportError> {
        let start = Instant::now();
        let bot_id = self.bot_id.clone();

        let stream = match self.inner.stream_next_message(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    bot = %bot_id,
                    kind = e.kind.as_str(),
                    error = %e.message,
                    "Chat stream failed to open"
                );
                return Err(e);
            }
        };

        tracing::debug!(bot = %bot_id, history = request.history.len(), "Chat stream opened");

        let logged = stream.inspect(move |item| match item {
            Ok(StreamEvent::Done(reply)) => {
                tracing::info!(
                    bot = %bot_id,
                    duration_ms = %start.elapsed().as_millis(),
                    reply_chars = reply.message.text.chars().count(),
                    "Chat stream completed"
                );
            }
            Ok(StreamEvent::Token(_)) => {}
            Err(e) => {
                tracing::error!(
                    bot = %bot_id,
                    duration_ms = %start.elapsed().as_millis(),
                    kind = e.kind.as_str(),
                    error = %e.message,
                    "Chat stream failed"
                );
            }
        });

        Ok(logged.boxed())
    }

    async fn restart(&self, conversation_id: Option<&str>) -> Result<(), TransportError> {
        let result = self.inner.restart(conversation_id).await;
        if let Err(e) = &result {
            tracing::warn!(bot = %self.bot_id, error = %e, "Conversation reset failed");
        }
        result
    }

    fn bot_id(&self) -> &str {
        &self.bot_id
    }
}
