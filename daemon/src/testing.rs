//! Fixtures shared by unit tests

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::audio::sim::SimulatedBackend;
use crate::audio::{AudioFrame, FrameCallback, NativeAudioEngineGuard, SharedCaptureStream};
use crate::config::{AudioTiming, ConversationConfig, InterruptConfig};
use crate::events::ConversationEvent;
use crate::interrupt::{InterruptCoordinator, InterruptHandle};
use crate::state::{
    ConversationHandle, ConversationStateMachine, InlineDispatcher, PlaybackControl, SpeechCapture,
};

/// Native timings short enough for tests
pub(crate) fn timing() -> AudioTiming {
    AudioTiming {
        native_timeout_ms: 1_000,
        teardown_backoff_ms: 20,
        restart_backoff_ms: 0,
        restart_retry_backoff_ms: 20,
    }
}

pub(crate) struct NoPlayback;

impl PlaybackControl for NoPlayback {
    fn stop_playback(&self) {}
}

pub(crate) fn noop_sink() -> FrameCallback {
    Arc::new(|_frame: AudioFrame| {})
}

/// Simulated audio, capture stream and a running state machine
pub(crate) struct Core {
    pub backend: SimulatedBackend,
    pub engine: Arc<NativeAudioEngineGuard>,
    pub capture: Arc<SharedCaptureStream>,
    pub conversation: ConversationHandle,
    pub bus: broadcast::Sender<ConversationEvent>,
}

impl Core {
    /// Spawn an interrupt coordinator with default tick and rate limit
    pub fn interrupts(&self) -> InterruptHandle {
        let (handle, _task) = InterruptCoordinator::spawn(
            &InterruptConfig::default(),
            self.conversation.clone(),
            Arc::clone(&self.capture),
            self.bus.clone(),
        );
        handle
    }
}

pub(crate) fn core(config: &ConversationConfig) -> Core {
    let backend = SimulatedBackend::new();
    let engine = Arc::new(NativeAudioEngineGuard::new(
        Arc::new(backend.clone()),
        timing(),
    ));
    let capture = Arc::new(SharedCaptureStream::new(
        Arc::clone(&engine),
        Arc::new(backend.clone()),
        timing(),
    ));
    let bus = crate::events::channel();
    let (conversation, _task) = ConversationStateMachine::spawn(
        config,
        SpeechCapture::new(Arc::clone(&capture), noop_sink()),
        Arc::new(NoPlayback),
        Arc::new(InlineDispatcher),
        bus.clone(),
    );

    Core {
        backend,
        engine,
        capture,
        conversation,
        bus,
    }
}
