//! Mock transports for testing
//!
//! These mocks let session tests run without network I/O.

use crate::transport::{
    ChatRequest, ReplyStream, StreamEvent, Transport, TransportError, TransportReply,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

// ============================================================================
// Mock Transport
// ============================================================================

/// Transport that returns queued replies and streams
pub struct MockTransport {
    bot_id: String,
    replies: Mutex<VecDeque<Result<TransportReply, TransportError>>>,
    streams: Mutex<VecDeque<Result<ReplyStream, TransportError>>>,
    restart_error: Mutex<Option<TransportError>>,
    /// Record of all requests made, in order
    pub requests: Mutex<Vec<ChatRequest>>,
    /// Conversation ids passed to `restart`
    pub restarts: Mutex<Vec<Option<String>>>,
}

impl MockTransport {
    pub fn new(bot_id: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            replies: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            restart_error: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            restarts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful fetch reply
    pub fn queue_reply(&self, reply: TransportReply) {
        self.replies.lock().unwrap().push_back(Ok(reply));
    }

    /// Queue a fetch failure
    pub fn queue_error(&self, error: TransportError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    /// Queue a stream that yields `items` and then ends
    pub fn queue_stream(&self, items: Vec<Result<StreamEvent, TransportError>>) {
        self.streams
            .lock()
            .unwrap()
            .push_back(Ok(futures::stream::iter(items).boxed()));
    }

    /// Queue a stream that fails to open
    pub fn queue_stream_error(&self, error: TransportError) {
        self.streams.lock().unwrap().push_back(Err(error));
    }

    /// Queue a stream fed by the returned sender; it ends when the sender drops
    pub fn stream_channel(&self) -> mpsc::UnboundedSender<Result<StreamEvent, TransportError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        self.streams.lock().unwrap().push_back(Ok(stream.boxed()));
        tx
    }

    /// Make every later `restart` call fail
    pub fn fail_restarts(&self, error: TransportError) {
        *self.restart_error.lock().unwrap() = Some(error);
    }

    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn recorded_restarts(&self) -> Vec<Option<String>> {
        self.restarts.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Result<TransportReply, TransportError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::network("No mock reply queued")))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_next_message(&self, request: &ChatRequest) -> Result<TransportReply, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.next_reply()
    }

    async fn stream_next_message(&self, request: &ChatRequest) -> Result<ReplyStream, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::network("No mock stream queued")))
    }

    async fn restart(&self, conversation_id: Option<&str>) -> Result<(), TransportError> {
        self.restarts
            .lock()
            .unwrap()
            .push(conversation_id.map(str::to_string));
        match self.restart_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn bot_id(&self) -> &str {
        &self.bot_id
    }
}

// ============================================================================
// Delayed Mock Transport
// ============================================================================

/// Fetch-only transport that waits before replying, for timing-sensitive tests
pub struct DelayedMockTransport {
    inner: MockTransport,
    delay: Duration,
    /// Signalled once per request, before the delay starts
    pub request_started: Arc<Notify>,
}

impl DelayedMockTransport {
    pub fn new(bot_id: impl Into<String>, delay: Duration) -> Self {
        Self {
            inner: MockTransport::new(bot_id),
            delay,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_reply(&self, reply: TransportReply) {
        self.inner.queue_reply(reply);
    }

    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.inner.recorded_requests()
    }
}

#[async_trait]
impl Transport for DelayedMockTransport {
    async fn fetch_next_message(&self, request: &ChatRequest) -> Result<TransportReply, TransportError> {
        self.inner.requests.lock().unwrap().push(request.clone());
        // notify_one stores a permit, so a waiter that arrives late still wakes
        self.request_started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.next_reply()
    }

    async fn stream_next_message(&self, _request: &ChatRequest) -> Result<ReplyStream, TransportError> {
        Err(TransportError::network("DelayedMockTransport does not stream"))
    }

    fn bot_id(&self) -> &str {
        self.inner.bot_id()
    }
}
