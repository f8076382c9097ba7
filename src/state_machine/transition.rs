//! Pure state transition function
//!
//! Given the same state, context, event and clock reading, `transition`
//! always produces the same new state and effects. All I/O lives in the
//! runtime that executes the effects.

use super::state::{
    ConvPhase, ConversationState, Message, ReadState, ScenarioPrompt, CLARIFYING_QUESTION_TEXT,
    FILE_ACK_TEXT,
};
use super::{ConvContext, Effect, Event};
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

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    /// True when the transition left nothing to do
    pub fn is_noop(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("A reply is still pending, wait for it before sending more text")]
    ReplyPending,
    /// The event refers to a request, message or generation that no longer applies
    #[error("Stale event: {0}")]
    Stale(String),
}

/// Pure transition function
///
/// `now` is the display time (`HH:MM`) stamped on any message created here.
pub fn transition(
    state: &ConversationState,
    context: &ConvContext,
    event: Event,
    now: &str,
) -> Result<TransitionResult, TransitionError> {
    match event {
        // ============================================================
        // Composing
        // ============================================================
        Event::ComposeText { text } => {
            let mut next = state.clone();
            next.draft_text = text;
            Ok(TransitionResult::new(next).with_effects(Effect::persist_and_notify()))
        }

        Event::AttachFile { file } => {
            let mut next = state.clone();
            next.attachment = Some(file);
            Ok(TransitionResult::new(next).with_effects(Effect::persist_and_notify()))
        }

        Event::RemoveAttachment => {
            if state.attachment.is_none() {
                return Ok(TransitionResult::new(state.clone()));
            }
            let mut next = state.clone();
            next.attachment = None;
            Ok(TransitionResult::new(next).with_effects(Effect::persist_and_notify()))
        }

        // ============================================================
        // Sending
        // ============================================================
        Event::Send { request_id } => {
            if let Some(file) = &state.attachment {
                // File sends never talk to the dialog backend
                let mut next = state.clone();
                let id = next.allocate_id();
                next.messages.push(Message::user_file(id, &file.name, now));
                next.attachment = None;
                next.draft_text.clear();
                next.scenario_prompts_visible = false;
                let generation = next.generation;
                return Ok(TransitionResult::new(next)
                    .with_effects(Effect::persist_and_notify())
                    .with_effect(Effect::read_receipt(
                        id,
                        generation,
                        context.read_receipt_delay,
                    ))
                    .with_effect(Effect::ScheduleFileAck {
                        generation,
                        delay: context.file_ack_delay,
                    }));
            }

            if state.draft_text.trim().is_empty() {
                return Ok(TransitionResult::new(state.clone()));
            }

            if state.pending() {
                return Err(TransitionError::ReplyPending);
            }

            let mut next = state.clone();
            let text = std::mem::take(&mut next.draft_text);
            let id = next.allocate_id();
            next.messages.push(Message::user_text(id, text.clone(), now));
            next.scenario_prompts_visible = false;
            next.phase = ConvPhase::Sending {
                request_id: request_id.clone(),
            };
            next.last_error = None;
            let generation = next.generation;
            Ok(TransitionResult::new(next)
                .with_effects(Effect::persist_and_notify())
                .with_effect(Effect::read_receipt(
                    id,
                    generation,
                    context.read_receipt_delay,
                ))
                .with_effect(Effect::request_reply(request_id, text)))
        }

        Event::ReplyReceived { request_id, reply } => {
            ensure_in_flight(state, &request_id)?;
            let mut next = state.clone();
            let id = next.allocate_id();
            next.messages.push(Message::bot_text(id, reply.message, now));
            next.scenario_prompts_visible = !reply.awaiting_clarification;
            next.phase = ConvPhase::Idle;
            Ok(TransitionResult::new(next).with_effects(Effect::persist_and_notify()))
        }

        Event::ReplyFailed {
            request_id,
            message,
        } => {
            ensure_in_flight(state, &request_id)?;
            let mut next = state.clone();
            next.last_error = Some(message);
            next.phase = ConvPhase::Idle;
            // Nothing persisted changed: phase and error are session-only
            Ok(TransitionResult::new(next).with_effect(Effect::NotifyClient))
        }

        // ============================================================
        // Delayed follow-ups
        // ============================================================
        Event::MarkRead {
            message_id,
            generation,
        } => {
            ensure_generation(state, generation)?;
            let mut next = state.clone();
            let target = next
                .messages
                .iter_mut()
                .find(|m| m.id == message_id && m.read_state == Some(ReadState::Unread))
                .ok_or_else(|| {
                    TransitionError::Stale(format!("no unread user message {message_id}"))
                })?;
            target.read_state = Some(ReadState::Read);
            Ok(TransitionResult::new(next).with_effects(Effect::persist_and_notify()))
        }

        Event::FileAcknowledged { generation } => {
            ensure_generation(state, generation)?;
            let mut next = state.clone();
            let id = next.allocate_id();
            next.messages.push(Message::bot_text(id, FILE_ACK_TEXT, now));
            next.scenario_prompts_visible = true;
            Ok(TransitionResult::new(next).with_effects(Effect::persist_and_notify()))
        }

        // ============================================================
        // Scenario prompts
        // ============================================================
        Event::SelectPrompt { prompt } => match prompt {
            ScenarioPrompt::NewConversation => Ok(reset(state, now)),
            ScenarioPrompt::Other => {
                let mut next = state.clone();
                let id = next.allocate_id();
                next.messages
                    .push(Message::bot_text(id, CLARIFYING_QUESTION_TEXT, now));
                next.scenario_prompts_visible = false;
                Ok(TransitionResult::new(next).with_effects(Effect::persist_and_notify()))
            }
            ordinary => {
                let mut next = state.clone();
                next.draft_text = ordinary.text().to_string();
                next.scenario_prompts_visible = false;
                Ok(TransitionResult::new(next).with_effects(Effect::persist_and_notify()))
            }
        },
    }
}

/// Start a new conversation, keeping the id counter so ids are never reused
fn reset(state: &ConversationState, now: &str) -> TransitionResult {
    let mut next = ConversationState::new(now);
    next.generation = state.generation + 1;
    next.next_message_id = state.next_message_id;
    let greeting_id = next.allocate_id();
    next.messages[0].id = greeting_id;

    // The store is purged rather than rewritten: a reload after a reset
    // observes defaults, numbered on from the kept id counter.
    TransitionResult::new(next)
        .with_effect(Effect::CancelFollowUps)
        .with_effect(Effect::PurgeStore)
        .with_effect(Effect::NotifyClient)
}

fn ensure_in_flight(state: &ConversationState, request_id: &str) -> Result<(), TransitionError> {
    match state.in_flight_request() {
        Some(current) if current == request_id => Ok(()),
        Some(current) => Err(TransitionError::Stale(format!(
            "reply for {request_id} while {current} is in flight"
        ))),
        None => Err(TransitionError::Stale(format!(
            "reply for {request_id} with no request in flight"
        ))),
    }
}

fn ensure_generation(state: &ConversationState, generation: u64) -> Result<(), TransitionError> {
    if state.generation == generation {
        Ok(())
    } else {
        Err(TransitionError::Stale(format!(
            "follow-up from generation {generation}, now at {}",
            state.generation
        )))
    }
}
