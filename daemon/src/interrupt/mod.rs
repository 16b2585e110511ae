//! Interrupt coordination
//!
//! Wake word, voice activity, the global hotkey and manual UI commands all
//! race to interrupt the conversation. The coordinator batches whatever
//! arrives within one dispatch tick, keeps the highest-priority signal and
//! turns it into a single `Abort` request.

mod coordinator;
mod signal;

pub use coordinator::{InterruptCoordinator, InterruptHandle};
pub use signal::{InterruptSignal, SignalSource};
