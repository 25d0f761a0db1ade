//! Client-side chat sessions for hosted conversational bots
//!
//! A [`ChatSession`] owns the transcript and request lifecycle for one
//! conversation and talks to the backend through an injected [`Transport`].

pub mod command;
pub mod config;
pub mod render;
pub mod session;
pub mod transport;

pub use config::{ChatConfig, ConfigError, Environment, SessionConfig};
pub use session::{
    ChatSession, ConversationSnapshot, Message, MessageSource, RequestMode, Subscription,
    FALLBACK_TEXT,
};
pub use transport::{
    ChatRequest, HttpTransport, LoggingTransport, ReplyStream, StreamEvent, Transport,
    TransportError, TransportErrorKind, TransportReply,
};
