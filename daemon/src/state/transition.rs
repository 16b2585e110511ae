//! Device states, triggers and the transition table

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// What the device is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Not capturing speech, not playing
    #[default]
    Idle,
    /// Session layer is connecting to the server
    Connecting,
    /// User speech is being captured and streamed
    Listening,
    /// Assistant audio is playing
    Speaking,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Idle => write!(f, "Idle"),
            DeviceState::Connecting => write!(f, "Connecting"),
            DeviceState::Listening => write!(f, "Listening"),
            DeviceState::Speaking => write!(f, "Speaking"),
        }
    }
}

/// Whether listening restarts by itself after a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListeningMode {
    AlwaysOn,
    AutoStop,
    Manual,
}

/// Why an interrupt was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    None,
    WakeWordDetected,
    UserInterruption,
    VoiceInterruption,
    KeyboardInterruption,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AbortReason::None => "none",
            AbortReason::WakeWordDetected => "wake_word_detected",
            AbortReason::UserInterruption => "user_interruption",
            AbortReason::VoiceInterruption => "voice_interruption",
            AbortReason::KeyboardInterruption => "keyboard_interruption",
        };
        f.write_str(name)
    }
}

/// A transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Trigger {
    Connect,
    ConnectionEstablished,
    StartListening,
    StopListening,
    PlaybackStarted,
    PlaybackEnded,
    Abort(AbortReason),
    Disconnect,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Connect => write!(f, "CONNECT"),
            Trigger::ConnectionEstablished => write!(f, "CONNECTION_ESTABLISHED"),
            Trigger::StartListening => write!(f, "START_LISTENING"),
            Trigger::StopListening => write!(f, "STOP_LISTENING"),
            Trigger::PlaybackStarted => write!(f, "PLAYBACK_STARTED"),
            Trigger::PlaybackEnded => write!(f, "PLAYBACK_ENDED"),
            Trigger::Abort(reason) => write!(f, "ABORT({reason})"),
            Trigger::Disconnect => write!(f, "DISCONNECT"),
        }
    }
}

/// Record of one accepted transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: DeviceState,
    pub to: DeviceState,
    pub trigger: Trigger,
    pub timestamp: SystemTime,
}

/// Result of a transition request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// The request matched the table and its side effects ran
    Applied(StateTransition),
    /// Not valid from the current state; nothing happened
    Ignored { state: DeviceState, trigger: Trigger },
    /// A side effect failed and the machine fell back to Idle
    Failed {
        state: DeviceState,
        message: String,
        recoverable: bool,
    },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }

    /// State the machine was left in
    pub fn state(&self) -> DeviceState {
        match self {
            TransitionOutcome::Applied(t) => t.to,
            TransitionOutcome::Ignored { state, .. } => *state,
            TransitionOutcome::Failed { state, .. } => *state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum CaptureEffect {
    #[default]
    None,
    Subscribe,
    Unsubscribe,
}

/// Side effects of an accepted transition, run before it is committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Effects {
    pub stop_playback: bool,
    pub capture: CaptureEffect,
}

impl Effects {
    const NONE: Effects = Effects {
        stop_playback: false,
        capture: CaptureEffect::None,
    };

    const fn capture(capture: CaptureEffect) -> Self {
        Effects {
            stop_playback: false,
            capture,
        }
    }

    const fn stop_playback(capture: CaptureEffect) -> Self {
        Effects {
            stop_playback: true,
            capture,
        }
    }
}

/// Look up `(from, trigger)` in the transition table.
///
/// `None` means the request is not valid from `from`.
pub(crate) fn resolve(
    from: DeviceState,
    trigger: Trigger,
    keep_listening: bool,
) -> Option<(DeviceState, Effects)> {
    use AbortReason::{KeyboardInterruption, UserInterruption, VoiceInterruption, WakeWordDetected};
    use CaptureEffect::{Subscribe, Unsubscribe};
    use DeviceState::*;

    let next = match (from, trigger) {
        (_, Trigger::Disconnect) => (Idle, Effects::stop_playback(Unsubscribe)),

        (Idle, Trigger::Connect) => (Connecting, Effects::NONE),
        (Connecting, Trigger::ConnectionEstablished) => (Idle, Effects::NONE),

        (Idle, Trigger::StartListening) => (Listening, Effects::capture(Subscribe)),
        (Listening, Trigger::StopListening) => (Idle, Effects::capture(Unsubscribe)),
        (Listening, Trigger::PlaybackStarted) => (Speaking, Effects::capture(Unsubscribe)),
        (Speaking, Trigger::PlaybackEnded) => (Idle, Effects::NONE),

        // barge-in
        (Speaking, Trigger::Abort(VoiceInterruption | WakeWordDetected)) => {
            (Listening, Effects::stop_playback(Subscribe))
        }
        (Speaking, Trigger::Abort(UserInterruption | KeyboardInterruption)) => {
            (Idle, Effects::stop_playback(CaptureEffect::None))
        }
        (Listening, Trigger::Abort(UserInterruption | KeyboardInterruption)) => {
            (Idle, Effects::capture(Unsubscribe))
        }
        (Idle, Trigger::Abort(WakeWordDetected | VoiceInterruption)) if keep_listening => {
            (Listening, Effects::capture(Subscribe))
        }

        _ => return None,
    };
    Some(next)
}
