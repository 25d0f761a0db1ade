//! Property-based tests for the session transition function
//!
//! These tests verify key invariants hold across arbitrary event sequences.

use super::*;
use crate::transport::{TransportError, TransportReply};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{json, Map};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn at() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn arb_mode() -> impl Strategy<Value = RequestMode> {
    prop_oneof![Just(RequestMode::Fetch), Just(RequestMode::Stream)]
}

fn arb_reply() -> impl Strategy<Value = TransportReply> {
    ("[a-zA-Z ]{0,20}", proptest::option::of("[a-z]{4}")).prop_map(|(text, conv)| TransportReply {
        message: Message::new(text, MessageSource::Bot, at()),
        notes: None,
        conversation_id: conv,
    })
}

fn arb_user_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        ("[a-zA-Z ]{1,20}", arb_mode()).prop_map(|(text, mode)| Event::UserMessage {
            message: Message::new(text, MessageSource::User, at()),
            mode,
        }),
        arb_mode().prop_map(|mode| Event::RequestReply { mode }),
        arb_mode().prop_map(|mode| Event::Bootstrap { mode }),
        Just(Event::Restart),
        ("[a-z]{1,5}", "[a-z0-9]{1,5}").prop_map(|(k, v)| Event::SetContext {
            entries: Map::from_iter([(k, json!(v))]),
        }),
        "[a-z ]{1,10}".prop_map(|text| Event::AddMessage {
            message: Message::new(text, MessageSource::Bot, at()),
        }),
    ]
}

fn arb_result_event(generation: u64) -> impl Strategy<Value = Event> {
    prop_oneof![
        arb_reply().prop_map(move |reply| Event::ResponseReceived { generation, reply }),
        "[a-z]{0,4}".prop_map(move |token| Event::StreamToken {
            generation,
            token,
            at: at(),
        }),
        arb_reply().prop_map(move |reply| Event::StreamFinished { generation, reply }),
        Just(Event::TransportFailed {
            generation,
            error: TransportError::network("down"),
            at: at(),
        }),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        arb_user_event(),
        (0u64..3).prop_flat_map(arb_result_event),
    ]
}

fn arb_awaiting_state() -> impl Strategy<Value = ConversationState> {
    (arb_mode(), 0u64..3, proptest::collection::vec("[a-z]{1,8}", 1..4)).prop_map(
        |(mode, generation, texts)| ConversationState {
            messages: texts
                .into_iter()
                .map(|t| Message::new(t, MessageSource::User, at()))
                .collect(),
            phase: SessionPhase::AwaitingResponse {
                mode,
                streaming: None,
            },
            generation,
            ..ConversationState::default()
        },
    )
}

fn is_consistent(state: &ConversationState) -> bool {
    if state.is_loading() == state.can_send_message() {
        return false;
    }
    match &state.phase {
        SessionPhase::AwaitingResponse {
            mode: RequestMode::Stream,
            streaming: Some(index),
        } => state
            .messages
            .get(*index)
            .is_some_and(|m| m.source == MessageSource::Bot),
        SessionPhase::AwaitingResponse {
            mode: RequestMode::Fetch,
            streaming: Some(_),
        } => false,
        _ => true,
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Any sequence of events leaves the state internally consistent
    #[test]
    fn prop_transitions_preserve_consistency(events in proptest::collection::vec(arb_event(), 0..30)) {
        let mut state = ConversationState::default();
        for event in events {
            if let Ok(result) = transition(&state, event) {
                state = result.new_state;
                prop_assert!(is_consistent(&state), "Inconsistent state: {:?}", state);
            }
        }
    }

    /// While a reply is pending, new messages are rejected without side effects
    #[test]
    fn prop_busy_rejects_messages(state in arb_awaiting_state(), mode in arb_mode(), text in "[a-z]{1,10}") {
        let event = Event::UserMessage {
            message: Message::new(text, MessageSource::User, at()),
            mode,
        };
        prop_assert_eq!(transition(&state, event).unwrap_err(), TransitionError::Busy);
        prop_assert_eq!(transition(&state, Event::RequestReply { mode }).unwrap_err(), TransitionError::Busy);
        prop_assert_eq!(transition(&state, Event::Bootstrap { mode }).unwrap_err(), TransitionError::Busy);
    }

    /// Restart always yields an empty idle state one generation later
    #[test]
    fn prop_restart_is_fresh(events in proptest::collection::vec(arb_event(), 0..20)) {
        let mut state = ConversationState::default();
        for event in events {
            if let Ok(result) = transition(&state, event) {
                state = result.new_state;
            }
        }
        let result = transition(&state, Event::Restart).unwrap();
        prop_assert_eq!(result.new_state, ConversationState::fresh(state.generation + 1));
        prop_assert_eq!(result.effects, vec![Effect::NotifySubscribers]);
    }

    /// Results from another generation never touch the state
    #[test]
    fn prop_stale_results_rejected(state in arb_awaiting_state(), offset in 1u64..3) {
        let stale = state.generation + offset;
        let reply = TransportReply::new(Message::new("late", MessageSource::Bot, at()));
        let result = transition(&state, Event::ResponseReceived { generation: stale, reply });
        let is_stale = matches!(result, Err(TransitionError::StaleGeneration { .. }));
        prop_assert!(is_stale);
    }

    /// A fetch cycle from idle grows the transcript by exactly user + bot
    #[test]
    fn prop_fetch_cycle_adds_two(text in "[a-zA-Z]{1,20}", reply in arb_reply(), fail in any::<bool>()) {
        let state = ConversationState::default();
        let sent = transition(&state, Event::UserMessage {
            message: Message::new(text, MessageSource::User, at()),
            mode: RequestMode::Fetch,
        }).unwrap().new_state;
        let outcome = if fail {
            Event::TransportFailed { generation: 0, error: TransportError::timeout(std::time::Duration::from_secs(1)), at: at() }
        } else {
            Event::ResponseReceived { generation: 0, reply }
        };
        let done = transition(&sent, outcome).unwrap().new_state;
        prop_assert_eq!(done.messages.len(), 2);
        prop_assert_eq!(done.messages[0].source, MessageSource::User);
        prop_assert_eq!(done.messages[1].source, MessageSource::Bot);
        prop_assert!(done.can_send_message());
    }

    /// A stream cycle ends with one bot entry no matter how many tokens arrive
    #[test]
    fn prop_stream_cycle_single_entry(tokens in proptest::collection::vec("[a-z]{0,4}", 0..8), fail in any::<bool>()) {
        let state = ConversationState::default();
        let mut state = transition(&state, Event::UserMessage {
            message: Message::new("hi", MessageSource::User, at()),
            mode: RequestMode::Stream,
        }).unwrap().new_state;
        for token in &tokens {
            state = transition(&state, Event::StreamToken { generation: 0, token: token.clone(), at: at() })
                .unwrap()
                .new_state;
        }
        let outcome = if fail {
            Event::TransportFailed { generation: 0, error: TransportError::network("down"), at: at() }
        } else {
            Event::StreamFinished { generation: 0, reply: TransportReply::new(Message::new(tokens.concat(), MessageSource::Bot, at())) }
        };
        let done = transition(&state, outcome).unwrap().new_state;
        prop_assert_eq!(done.messages.len(), 2);
        let expected = if fail { FALLBACK_TEXT.to_string() } else { tokens.concat() };
        prop_assert_eq!(&done.messages[1].text, &expected);
    }

    /// Same input, same output
    #[test]
    fn prop_transition_is_pure(events in proptest::collection::vec(arb_event(), 1..15)) {
        let mut state = ConversationState::default();
        for event in events {
            let first = transition(&state, event.clone());
            let second = transition(&state, event);
            match (first, second) {
                (Ok(a), Ok(b)) => {
                    prop_assert_eq!(&a.new_state, &b.new_state);
                    prop_assert_eq!(&a.effects, &b.effects);
                    state = a.new_state;
                }
                (Err(a), Err(b)) => prop_assert_eq!(a, b),
                (a, b) => prop_assert!(false, "Diverged: {:?} vs {:?}", a, b),
            }
        }
    }
}
