//! Daemon-side ends of the collaborators the core drives
//!
//! Playback and speech encoding live in the session layer, outside this
//! process. The core only needs to tell it to stop playing and to hand it
//! captured speech.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::audio::{AudioFrame, FrameCallback};
use crate::events::ConversationEvent;
use crate::state::PlaybackControl;

/// Stops playback by asking the session layer over the event bus
pub struct EventBusPlayback {
    events: broadcast::Sender<ConversationEvent>,
}

impl EventBusPlayback {
    pub fn new(events: broadcast::Sender<ConversationEvent>) -> Self {
        Self { events }
    }
}

impl PlaybackControl for EventBusPlayback {
    fn stop_playback(&self) {
        let receivers = self
            .events
            .send(ConversationEvent::PlaybackStopRequested)
            .unwrap_or(0);
        debug!(receivers, "playback stop requested");
    }
}

/// Receives captured speech while Listening. Counts frames; encoding and
/// streaming happen in the session layer.
#[derive(Clone, Default)]
pub struct SpeechSink {
    frames: Arc<AtomicU64>,
}

impl SpeechSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> FrameCallback {
        let frames = Arc::clone(&self.frames);
        Arc::new(move |_frame: AudioFrame| {
            frames.fetch_add(1, Ordering::Relaxed);
        })
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}
