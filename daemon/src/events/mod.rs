//! Events published by the conversation core
//!
//! Every accepted state transition, interrupt resolution, audio failure and
//! recovery action goes out on one broadcast bus. Listeners (IPC clients,
//! logging) consume them; nothing feeds them back into the state machine.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::state::{AbortReason, StateTransition};

/// Capacity of the event bus
pub const EVENT_BUS_CAPACITY: usize = 64;

/// Events emitted by the core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// An accepted state transition
    StateChanged(StateTransition),

    /// The session layer should stop playing assistant audio
    PlaybackStopRequested,

    /// Competing interrupt signals were resolved to one abort
    InterruptResolved {
        reason: AbortReason,
        /// Lower-priority signals discarded in the same tick
        dropped: usize,
    },

    /// Audio could not be started for the current turn
    AudioError { message: String, recoverable: bool },

    /// The recovery monitor tore down and reinitialized audio
    RecoveryPerformed {
        /// Recoveries performed since the daemon started, this one included
        attempt: u64,
        reason: String,
    },

    /// Recovery failed twice in a row
    RecoveryFailed { message: String },
}

impl std::fmt::Display for ConversationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationEvent::StateChanged(t) => {
                write!(f, "STATE_CHANGED ({} -> {} on {})", t.from, t.to, t.trigger)
            }
            ConversationEvent::PlaybackStopRequested => write!(f, "PLAYBACK_STOP_REQUESTED"),
            ConversationEvent::InterruptResolved { reason, dropped } => {
                write!(f, "INTERRUPT_RESOLVED ({reason}, {dropped} dropped)")
            }
            ConversationEvent::AudioError { message, .. } => write!(f, "AUDIO_ERROR ({message})"),
            ConversationEvent::RecoveryPerformed { attempt, reason } => {
                write!(f, "RECOVERY_PERFORMED (#{attempt}: {reason})")
            }
            ConversationEvent::RecoveryFailed { message } => {
                write!(f, "RECOVERY_FAILED ({message})")
            }
        }
    }
}

/// Create the event bus shared by the core components
pub fn channel() -> broadcast::Sender<ConversationEvent> {
    let (tx, _rx) = broadcast::channel(EVENT_BUS_CAPACITY);
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DeviceState, Trigger};
    use std::time::SystemTime;

    #[test]
    fn test_event_serialization() {
        let event = ConversationEvent::StateChanged(StateTransition {
            from: DeviceState::Idle,
            to: DeviceState::Listening,
            trigger: Trigger::StartListening,
            timestamp: SystemTime::now(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("state_changed"));
        assert!(json.contains("listening"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"playback_stop_requested"}"#;
        let event: ConversationEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ConversationEvent::PlaybackStopRequested));
    }

    #[test]
    fn test_display() {
        let event = ConversationEvent::InterruptResolved {
            reason: AbortReason::KeyboardInterruption,
            dropped: 1,
        };
        assert_eq!(
            event.to_string(),
            "INTERRUPT_RESOLVED (keyboard_interruption, 1 dropped)"
        );
    }

    #[test]
    fn test_recovery_event_carries_attempt() {
        let event = ConversationEvent::RecoveryPerformed {
            attempt: 2,
            reason: "capture stream running with no subscribers".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "recovery_performed");
        assert_eq!(json["attempt"], 2);
        assert_eq!(
            event.to_string(),
            "RECOVERY_PERFORMED (#2: capture stream running with no subscribers)"
        );
    }
}
