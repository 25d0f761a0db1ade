//! Conversation state types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reply appended when the transport fails for any reason
pub const FALLBACK_TEXT: &str =
    "Sorry, I'm unable to respond at the moment. Please try again later!";

// ============================================================================
// Messages
// ============================================================================

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageSource {
    User,
    Bot,
}

/// A single transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub source: MessageSource,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(text: impl Into<String>, source: MessageSource, timestamp: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            source,
            timestamp,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(text, MessageSource::User, Utc::now())
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::new(text, MessageSource::Bot, Utc::now())
    }

    pub fn fallback(at: DateTime<Utc>) -> Self {
        Self::new(FALLBACK_TEXT, MessageSource::Bot, at)
    }

    pub fn is_user(&self) -> bool {
        self.source == MessageSource::User
    }
}

// ============================================================================
// Session Phase
// ============================================================================

/// How the pending reply is being fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    /// Single request, single reply
    Fetch,
    /// Reply arrives as incremental tokens
    Stream,
}

/// Where the session is in its request cycle
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionPhase {
    /// Ready for input, nothing outstanding
    #[default]
    Idle,

    /// One transport request in flight
    AwaitingResponse {
        mode: RequestMode,
        /// Transcript index of the bot entry a stream is growing
        #[serde(default)]
        streaming: Option<usize>,
    },
}

// ============================================================================
// Conversation State
// ============================================================================

/// Everything a session owns about one conversation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub phase: SessionPhase,
    /// Forwarded with every outgoing request
    pub context: Option<Map<String, Value>>,
    /// Opaque server notes, echoed back on the next request
    pub notes: Option<Value>,
    /// Server conversation id, once the transport has assigned one
    pub conversation_id: Option<String>,
    /// Bumped by every restart; results tagged with an older value are dropped
    pub generation: u64,
}

impl ConversationState {
    /// Fresh state for the given generation
    pub fn fresh(generation: u64) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, SessionPhase::AwaitingResponse { .. })
    }

    pub fn can_send_message(&self) -> bool {
        !self.is_loading()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            messages: self.messages.clone(),
            is_loading: self.is_loading(),
            can_send_message: self.can_send_message(),
            context: self.context.clone(),
            notes: self.notes.clone(),
            generation: self.generation,
        }
    }
}

/// Read-only view handed to UI observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSnapshot {
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub can_send_message: bool,
    pub context: Option<Map<String, Value>>,
    pub notes: Option<Value>,
    pub generation: u64,
}

impl ConversationSnapshot {
    /// Convenience for widgets that branch on the query result note
    pub fn query_result(&self) -> Option<&Value> {
        self.notes.as_ref().and_then(|n| n.get("queryResult"))
    }
}
