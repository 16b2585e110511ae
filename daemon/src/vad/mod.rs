//! Voice activity detection
//!
//! Runs as an ordinary capture subscriber. Frames are handed off to a
//! worker task so the driver thread never does more than a channel send.

mod energy;

pub use energy::{rms, EnergyVad};

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audio::{AudioFrame, CaptureError, FrameCallback, SharedCaptureStream, SubscriptionId};
use crate::config::VadConfig;
use crate::interrupt::{InterruptHandle, SignalSource};

/// Frames buffered between the capture callback and the detector task
const FRAME_QUEUE: usize = 64;

/// A voice activity detection backend
pub trait VoiceDetector: Send {
    /// Returns true if the frame likely contains speech
    fn is_speech(&mut self, samples: &[i16]) -> bool;
    fn name(&self) -> &str;
}

/// Rising-edge detector over per-frame speech decisions
#[derive(Debug)]
struct SpeechGate {
    min_frames: u32,
    run: u32,
}

impl SpeechGate {
    fn new(min_frames: u32) -> Self {
        Self {
            min_frames: min_frames.max(1),
            run: 0,
        }
    }

    /// True exactly once per burst, when it reaches `min_frames`
    fn push(&mut self, speech: bool) -> bool {
        if !speech {
            self.run = 0;
            return false;
        }
        self.run = self.run.saturating_add(1);
        self.run == self.min_frames
    }
}

/// Feeds captured frames through a detector and reports voice activity to
/// the interrupt coordinator
pub struct VoiceActivityMonitor {
    frames: mpsc::Sender<AudioFrame>,
}

impl VoiceActivityMonitor {
    pub fn spawn(
        config: &VadConfig,
        detector: Box<dyn VoiceDetector>,
        interrupts: InterruptHandle,
    ) -> (Self, JoinHandle<()>) {
        let (frames, rx) = mpsc::channel(FRAME_QUEUE);
        let gate = SpeechGate::new(config.min_speech_frames);
        let task = tokio::spawn(detect(rx, detector, gate, interrupts));
        (Self { frames }, task)
    }

    /// Capture callback that forwards frames without blocking; a full queue
    /// drops the frame
    pub fn frame_callback(&self) -> FrameCallback {
        let frames = self.frames.clone();
        Arc::new(move |frame: AudioFrame| {
            let _ = frames.try_send(frame);
        })
    }

    /// Subscribe the detector to the shared capture stream
    pub async fn attach(&self, capture: &SharedCaptureStream) -> Result<SubscriptionId, CaptureError> {
        capture.subscribe("vad", self.frame_callback()).await
    }
}

async fn detect(
    mut rx: mpsc::Receiver<AudioFrame>,
    mut detector: Box<dyn VoiceDetector>,
    mut gate: SpeechGate,
    interrupts: InterruptHandle,
) {
    info!(detector = detector.name(), min_frames = gate.min_frames, "voice activity monitor started");

    while let Some(frame) = rx.recv().await {
        if gate.push(detector.is_speech(&frame)) {
            debug!(level = rms(&frame), "voice activity detected");
            if !interrupts.report_now(SignalSource::VoiceActivity) {
                break;
            }
        }
    }

    info!("voice activity monitor stopped");
}
