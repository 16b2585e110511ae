//! Conversation state machine
//!
//! Four device states:
//! - Idle: nothing captured, nothing playing
//! - Connecting: the session layer is reaching the server
//! - Listening: user speech is captured through the shared stream
//! - Speaking: assistant audio is playing
//!
//! Every request goes through one queue, so at most one transition is in
//! flight and its side effects finish before the next request is judged.

mod effects;
mod machine;
mod transition;

pub use effects::{Dispatcher, InlineDispatcher, PlaybackControl, SpeechCapture, TransitionListener};
pub use machine::{ConversationError, ConversationHandle, ConversationStateMachine, MachineSnapshot};
pub use transition::{
    AbortReason, DeviceState, ListeningMode, StateTransition, TransitionOutcome, Trigger,
};
