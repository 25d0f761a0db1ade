//! Pure state transition function
//!
//! Given the same state and event this always produces the same result,
//! with no I/O. The runtime in `session.rs` executes the returned effects.

use super::{ConversationState, Effect, Event, Message, MessageSource, RequestMode, SessionPhase};
use crate::transport::{ChatRequest, TransportReply};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConversationState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConversationState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Shorthand for a state change that only needs a re-render
    fn notify(state: ConversationState) -> Self {
        Self::new(state).with_effect(Effect::NotifySubscribers)
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("A reply is already pending, cannot accept another message")]
    Busy,
    #[error("Result for generation {got} arrived after restart to generation {current}")]
    StaleGeneration { current: u64, got: u64 },
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
pub fn transition(
    state: &ConversationState,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    if let Some(got) = event.generation() {
        if got != state.generation {
            return Err(TransitionError::StaleGeneration {
                current: state.generation,
                got,
            });
        }
    }

    match (&state.phase, event) {
        // ============================================================
        // User input
        // ============================================================

        // Idle + UserMessage -> AwaitingResponse
        (SessionPhase::Idle, Event::UserMessage { message, mode }) => {
            let request = build_request(state, Some(message.text.clone()));
            let mut new_state = state.clone();
            new_state.messages.push(message);
            new_state.phase = SessionPhase::AwaitingResponse {
                mode,
                streaming: None,
            };
            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::NotifySubscribers)
                .with_effect(Effect::request_next(state.generation, mode, request)))
        }

        // Idle + Bootstrap on a non-empty transcript: nothing to greet
        (SessionPhase::Idle, Event::Bootstrap { .. }) if !state.messages.is_empty() => {
            Err(TransitionError::InvalidTransition(
                "greeting requires an empty transcript".to_string(),
            ))
        }

        // Idle + RequestReply/Bootstrap -> AwaitingResponse, nothing appended
        (SessionPhase::Idle, Event::RequestReply { mode } | Event::Bootstrap { mode }) => {
            let request = build_request(state, None);
            let mut new_state = state.clone();
            new_state.phase = SessionPhase::AwaitingResponse {
                mode,
                streaming: None,
            };
            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::NotifySubscribers)
                .with_effect(Effect::request_next(state.generation, mode, request)))
        }

        // Single request in flight: reject, never queue
        (
            SessionPhase::AwaitingResponse { .. },
            Event::UserMessage { .. } | Event::RequestReply { .. } | Event::Bootstrap { .. },
        ) => Err(TransitionError::Busy),

        // ============================================================
        // Session-local operations, valid in any phase
        // ============================================================
        (_, Event::Restart) => Ok(TransitionResult::notify(ConversationState::fresh(
            state.generation + 1,
        ))),

        (_, Event::SetContext { entries }) => {
            let mut new_state = state.clone();
            if !entries.is_empty() {
                new_state
                    .context
                    .get_or_insert_with(serde_json::Map::new)
                    .extend(entries);
            }
            Ok(TransitionResult::notify(new_state))
        }

        (_, Event::AddMessage { message }) => {
            let mut new_state = state.clone();
            new_state.messages.push(message);
            Ok(TransitionResult::notify(new_state))
        }

        // ============================================================
        // Request/response replies
        // ============================================================
        (
            SessionPhase::AwaitingResponse {
                mode: RequestMode::Fetch,
                ..
            },
            Event::ResponseReceived { reply, .. },
        ) => {
            let mut new_state = state.clone();
            append_reply(&mut new_state, reply);
            new_state.phase = SessionPhase::Idle;
            Ok(TransitionResult::notify(new_state))
        }

        // ============================================================
        // Streamed replies: one bot entry, grown in place
        // ============================================================
        (
            SessionPhase::AwaitingResponse {
                mode: RequestMode::Stream,
                streaming,
            },
            Event::StreamToken { token, at, .. },
        ) => {
            if token.is_empty() {
                return Ok(TransitionResult::new(state.clone()));
            }
            let mut new_state = state.clone();
            match *streaming {
                Some(index) => {
                    let entry = streaming_entry(&mut new_state, index)?;
                    entry.text.push_str(&token);
                }
                None => {
                    new_state
                        .messages
                        .push(Message::new(token, MessageSource::Bot, at));
                    new_state.phase = SessionPhase::AwaitingResponse {
                        mode: RequestMode::Stream,
                        streaming: Some(new_state.messages.len() - 1),
                    };
                }
            }
            Ok(TransitionResult::notify(new_state))
        }

        (
            SessionPhase::AwaitingResponse {
                mode: RequestMode::Stream,
                streaming,
            },
            Event::StreamFinished { reply, .. },
        ) => {
            let mut new_state = state.clone();
            match *streaming {
                Some(index) => {
                    let entry = streaming_entry(&mut new_state, index)?;
                    // The final message is authoritative over the accumulated tokens
                    *entry = reply.message;
                    apply_reply_metadata(&mut new_state, reply.notes, reply.conversation_id);
                }
                None => append_reply(&mut new_state, reply),
            }
            new_state.phase = SessionPhase::Idle;
            Ok(TransitionResult::notify(new_state))
        }

        // ============================================================
        // Failure: replace any partial reply with the fallback message
        // ============================================================
        (SessionPhase::AwaitingResponse { streaming, .. }, Event::TransportFailed { at, .. }) => {
            let mut new_state = state.clone();
            if let Some(index) = *streaming {
                if index < new_state.messages.len() {
                    new_state.messages.remove(index);
                }
            }
            new_state.messages.push(Message::fallback(at));
            new_state.phase = SessionPhase::Idle;
            Ok(TransitionResult::notify(new_state))
        }

        // ============================================================
        // Everything else is a protocol violation
        // ============================================================
        (
            SessionPhase::Idle,
            Event::ResponseReceived { .. }
            | Event::StreamToken { .. }
            | Event::StreamFinished { .. }
            | Event::TransportFailed { .. },
        ) => Err(TransitionError::InvalidTransition(
            "transport result with no request pending".to_string(),
        )),

        (
            SessionPhase::AwaitingResponse { mode, .. },
            Event::ResponseReceived { .. } | Event::StreamToken { .. } | Event::StreamFinished { .. },
        ) => Err(TransitionError::InvalidTransition(format!(
            "result does not match pending {mode:?} request"
        ))),
    }
}

/// Snapshot what the transport needs, before the new user message is added
fn build_request(state: &ConversationState, text: Option<String>) -> ChatRequest {
    ChatRequest {
        history: state.messages.clone(),
        text: text.filter(|t| !t.trim().is_empty()),
        context: state.context.clone(),
        notes: state.notes.clone(),
        conversation_id: state.conversation_id.clone(),
    }
}

fn append_reply(state: &mut ConversationState, reply: TransportReply) {
    state.messages.push(reply.message);
    apply_reply_metadata(state, reply.notes, reply.conversation_id);
}

fn apply_reply_metadata(
    state: &mut ConversationState,
    notes: Option<serde_json::Value>,
    conversation_id: Option<String>,
) {
    if notes.is_some() {
        state.notes = notes;
    }
    if conversation_id.is_some() {
        state.conversation_id = conversation_id;
    }
}

fn streaming_entry(
    state: &mut ConversationState,
    index: usize,
) -> Result<&mut Message, TransitionError> {
    state.messages.get_mut(index).ok_or_else(|| {
        TransitionError::InvalidTransition(format!("no streaming entry at index {index}"))
    })
}
