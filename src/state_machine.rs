//! Widget conversation state machine
//!
//! Pure `transition` from state and event to new state plus effects;
//! all I/O is left to the runtime.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::Event;
pub use state::{
    Author, ConvContext, ConvPhase, ConversationState, Message, MessageBody, ReadState,
    ScenarioPrompt,
};
pub use transition::{transition, TransitionError, TransitionResult};
