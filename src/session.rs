//! Client-side chat session
//!
//! Implements the Elm Architecture pattern: a pure transition function
//! (`transition.rs`) decides every state change, and `ChatSession` executes
//! the resulting effects against a transport and feeds the outcomes back in
//! as events.

mod effect;
pub mod event;
mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

#[cfg(test)]
pub mod testing;

pub use effect::Effect;
pub use event::Event;
pub use state::{
    ConversationSnapshot, ConversationState, Message, MessageSource, RequestMode, SessionPhase,
    FALLBACK_TEXT,
};
pub use transition::{transition, TransitionError, TransitionResult};

use crate::config::SessionConfig;
use crate::transport::{ChatRequest, StreamEvent, Transport, TransportError};
use chrono::Utc;
use futures::StreamExt;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio_util::sync::CancellationToken;

type Callback = Arc<dyn Fn(&ConversationSnapshot) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

/// Handle returned by [`ChatSession::subscribe`]; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    /// Keep the callback registered for the lifetime of the session
    pub fn detach(mut self) {
        self.registry = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).entries.retain(|(id, _)| *id != self.id);
        }
    }
}

/// One conversation with a bot, mediated through a transport
pub struct ChatSession<T: Transport> {
    session_id: String,
    config: SessionConfig,
    transport: T,
    state: Mutex<ConversationState>,
    /// Cancelled and replaced whenever the generation moves
    request_cancel: Mutex<CancellationToken>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl<T: Transport> ChatSession<T> {
    pub fn new(config: SessionConfig, transport: T) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            config,
            transport,
            state: Mutex::new(ConversationState::default()),
            request_cancel: Mutex::new(CancellationToken::new()),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state, for rendering
    pub fn snapshot(&self) -> ConversationSnapshot {
        lock(&self.state).snapshot()
    }

    /// Register a callback invoked with a fresh snapshot after every change
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConversationSnapshot) + Send + Sync + 'static,
    {
        let mut subscribers = lock(&self.subscribers);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.entries.push((id, Arc::new(callback)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Send `text` and wait for the full reply
    pub async fn send_message(&self, text: impl Into<String>) {
        self.submit(text.into(), RequestMode::Fetch).await;
    }

    /// Send `text` and grow the reply as tokens arrive
    pub async fn stream_message(&self, text: impl Into<String>) {
        self.submit(text.into(), RequestMode::Stream).await;
    }

    /// Send `text` in the given mode. Blank text asks for a reply without
    /// recording a user message.
    pub async fn submit(&self, text: String, mode: RequestMode) {
        let event = if text.trim().is_empty() {
            Event::RequestReply { mode }
        } else {
            Event::UserMessage {
                message: Message::user(text),
                mode,
            }
        };
        self.process_event(event).await;
    }

    /// Fetch the bot's opening message if configured and nothing has been said yet
    pub async fn bootstrap(&self) {
        if !self.config.auto_greet {
            return;
        }
        tracing::debug!(session = %self.session_id, "Requesting greeting");
        self.process_event(Event::Bootstrap {
            mode: self.config.default_mode,
        })
        .await;
    }

    /// Start over with an empty transcript; pending results are discarded
    pub fn restart_conversation(&self) {
        if let Err(e) = self.dispatch(Event::Restart) {
            self.log_rejection(&e);
            return;
        }
        tracing::info!(session = %self.session_id, "Conversation restarted");
    }

    /// Restart locally, then ask the transport to drop its conversation state
    pub async fn restart_with_transport(&self) {
        let previous = lock(&self.state).conversation_id.clone();
        self.restart_conversation();
        if let Err(e) = self.transport.restart(previous.as_deref()).await {
            tracing::warn!(
                session = %self.session_id,
                kind = e.kind.as_str(),
                error = %e,
                "Transport restart failed, continuing with local restart only"
            );
        }
    }

    /// Merge entries into the context sent with later requests
    pub fn set_context(&self, entries: Map<String, Value>) {
        if let Err(e) = self.dispatch(Event::SetContext { entries }) {
            self.log_rejection(&e);
        }
    }

    /// Append a message without contacting the transport
    pub fn add_message(&self, message: Message) {
        if let Err(e) = self.dispatch(Event::AddMessage { message }) {
            self.log_rejection(&e);
        }
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    async fn process_event(&self, event: Event) {
        // Effects may produce follow-up events; process them without recursion
        let mut events_to_process = vec![event];

        while let Some(current_event) = events_to_process.pop() {
            let effects = match self.dispatch(current_event) {
                Ok(effects) => effects,
                Err(e) => {
                    self.log_rejection(&e);
                    return;
                }
            };

            for effect in effects {
                if let Some(generated_event) = self.execute_effect(effect).await {
                    events_to_process.push(generated_event);
                }
            }
        }
    }

    /// Run one transition under the lock and notify subscribers.
    ///
    /// Returns the effects that still need executing.
    fn dispatch(&self, event: Event) -> Result<Vec<Effect>, TransitionError> {
        let (snapshot, effects) = {
            let mut state = lock(&self.state);
            let result = transition(&state, event)?;
            let restarted = result.new_state.generation != state.generation;
            *state = result.new_state;
            if restarted {
                std::mem::replace(&mut *lock(&self.request_cancel), CancellationToken::new())
                    .cancel();
            }

            let notify = result
                .effects
                .iter()
                .any(|e| matches!(e, Effect::NotifySubscribers));
            let snapshot = notify.then(|| state.snapshot());
            let effects: Vec<Effect> = result
                .effects
                .into_iter()
                .filter(|e| !matches!(e, Effect::NotifySubscribers))
                .collect();
            (snapshot, effects)
        };

        if let Some(snapshot) = snapshot {
            self.notify(&snapshot);
        }
        Ok(effects)
    }

    async fn execute_effect(&self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::RequestNext {
                generation,
                mode: RequestMode::Fetch,
                request,
            } => self.fetch(generation, &request).await,
            Effect::RequestNext {
                generation,
                mode: RequestMode::Stream,
                request,
            } => self.stream(generation, &request).await,
            // Delivered by dispatch while the snapshot was current
            Effect::NotifySubscribers => None,
        }
    }

    /// Token cancelled by the next restart, or `None` if `generation` is already stale
    fn cancel_token(&self, generation: u64) -> Option<CancellationToken> {
        let state = lock(&self.state);
        (state.generation == generation).then(|| lock(&self.request_cancel).clone())
    }

    async fn fetch(&self, generation: u64, request: &ChatRequest) -> Option<Event> {
        let cancel = self.cancel_token(generation)?;
        let timeout = self.config.response_timeout;

        // Race the request against restart
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                self.log_cancelled(generation);
                None
            }

            result = tokio::time::timeout(timeout, self.transport.fetch_next_message(request)) => {
                let event = match result.unwrap_or_else(|_| Err(TransportError::timeout(timeout))) {
                    Ok(reply) => Event::ResponseReceived { generation, reply },
                    Err(error) => self.failed(generation, error),
                };
                Some(event)
            }
        }
    }

    /// Consume a reply stream, dispatching tokens as they arrive.
    ///
    /// Returns the terminal event, or `None` once a restart made the stream stale.
    async fn stream(&self, generation: u64, request: &ChatRequest) -> Option<Event> {
        let cancel = self.cancel_token(generation)?;
        let timeout = self.config.response_timeout;

        let opened = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                self.log_cancelled(generation);
                return None;
            }

            opened = tokio::time::timeout(timeout, self.transport.stream_next_message(request)) => {
                opened.unwrap_or_else(|_| Err(TransportError::timeout(timeout)))
            }
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(error) => return Some(self.failed(generation, error)),
        };

        loop {
            let next = tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    // Dropping the stream closes the connection
                    self.log_cancelled(generation);
                    return None;
                }

                next = tokio::time::timeout(timeout, stream.next()) => next,
            };

            let Ok(item) = next else {
                return Some(self.failed(generation, TransportError::timeout(timeout)));
            };

            match item {
                Some(Ok(StreamEvent::Token(token))) => {
                    let event = Event::StreamToken {
                        generation,
                        token,
                        at: Utc::now(),
                    };
                    if let Err(e) = self.dispatch(event) {
                        self.log_rejection(&e);
                        return None;
                    }
                }
                Some(Ok(StreamEvent::Done(reply))) => {
                    return Some(Event::StreamFinished { generation, reply });
                }
                Some(Err(error)) => return Some(self.failed(generation, error)),
                None => {
                    return Some(self.failed(
                        generation,
                        TransportError::malformed("Stream ended without a final message"),
                    ));
                }
            }
        }
    }

    fn failed(&self, generation: u64, error: TransportError) -> Event {
        let current = lock(&self.state).generation;
        if current == generation {
            tracing::warn!(
                session = %self.session_id,
                generation,
                kind = error.kind.as_str(),
                transient = error.kind.is_transient(),
                error = %error,
                "Transport failed, replying with fallback message"
            );
        } else {
            tracing::debug!(
                session = %self.session_id,
                generation,
                current,
                error = %error,
                "Ignoring transport failure from before restart"
            );
        }
        Event::TransportFailed {
            generation,
            error,
            at: Utc::now(),
        }
    }

    fn log_cancelled(&self, generation: u64) {
        tracing::debug!(session = %self.session_id, generation, "Request cancelled by restart");
    }

    fn notify(&self, snapshot: &ConversationSnapshot) {
        let callbacks: Vec<Callback> = lock(&self.subscribers)
            .entries
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(snapshot);
        }
    }

    fn log_rejection(&self, error: &TransitionError) {
        match error {
            TransitionError::Busy => {
                tracing::debug!(session = %self.session_id, "Ignoring message while a reply is pending");
            }
            TransitionError::StaleGeneration { current, got } => {
                tracing::debug!(
                    session = %self.session_id,
                    current,
                    got,
                    "Discarding result from before restart"
                );
            }
            TransitionError::InvalidTransition(reason) => {
                tracing::debug!(session = %self.session_id, reason = %reason, "Ignoring event");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
