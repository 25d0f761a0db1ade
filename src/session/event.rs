//! Events that drive the session

use super::state::{Message, RequestMode};
use crate::transport::{TransportError, TransportReply};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage {
        message: Message,
        mode: RequestMode,
    },
    /// Ask for the next bot message without any user text
    RequestReply {
        mode: RequestMode,
    },
    /// Opening greeting; only valid on an empty transcript
    Bootstrap {
        mode: RequestMode,
    },
    Restart,
    SetContext {
        entries: Map<String, Value>,
    },
    AddMessage {
        message: Message,
    },

    // Transport events, tagged with the generation they were issued under
    ResponseReceived {
        generation: u64,
        reply: TransportReply,
    },
    StreamToken {
        generation: u64,
        token: String,
        at: DateTime<Utc>,
    },
    StreamFinished {
        generation: u64,
        reply: TransportReply,
    },
    TransportFailed {
        generation: u64,
        error: TransportError,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// Generation a transport result belongs to; `None` for user events
    pub fn generation(&self) -> Option<u64> {
        match self {
            Event::ResponseReceived { generation, .. }
            | Event::StreamToken { generation, .. }
            | Event::StreamFinished { generation, .. }
            | Event::TransportFailed { generation, .. } => Some(*generation),
            Event::UserMessage { .. }
            | Event::RequestReply { .. }
            | Event::Bootstrap { .. }
            | Event::Restart
            | Event::SetContext { .. }
            | Event::AddMessage { .. } => None,
        }
    }
}
