//! Effects produced by state transitions

use super::state::RequestMode;
use crate::transport::ChatRequest;

/// Effects to be executed after a state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Ask the transport for the next bot message
    RequestNext {
        generation: u64,
        mode: RequestMode,
        request: ChatRequest,
    },

    /// Push a fresh snapshot to subscribers
    NotifySubscribers,
}

impl Effect {
    pub fn request_next(generation: u64, mode: RequestMode, request: ChatRequest) -> Self {
        Effect::RequestNext {
            generation,
            mode,
            request,
        }
    }
}
