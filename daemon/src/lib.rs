//! parley: real-time conversation core for a voice assistant
//!
//! Owns the microphone and decides what the device is doing:
//! - `audio`: native engine lifetime and the shared capture stream
//! - `state`: the conversation state machine
//! - `interrupt`: resolution of competing interrupt signals
//! - `recovery`: watchdog that resynchronises audio with the machine
//! - `vad`, `hotkey`: interrupt sources
//! - `ipc`: socket interface for the session layer and UI

pub mod audio;
pub mod bridge;
pub mod config;
pub mod events;
pub mod hotkey;
pub mod interrupt;
pub mod ipc;
pub mod lifecycle;
pub mod recovery;
pub mod state;
pub mod vad;

#[cfg(test)]
mod testing;
