//! Collaborators the state machine drives as side effects

use std::sync::Arc;

use tracing::debug;

use crate::audio::{CaptureError, FrameCallback, SharedCaptureStream, SubscriptionId};

use super::transition::StateTransition;

/// Stops assistant audio. Implemented by whoever owns playback.
pub trait PlaybackControl: Send + Sync {
    fn stop_playback(&self);
}

/// Runs a notification on the context that owns UI/logging
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs notifications immediately on the caller
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

/// Observer called for every accepted transition
pub type TransitionListener = Arc<dyn Fn(&StateTransition) + Send + Sync>;

/// The speech pipeline's capture subscription, held only while Listening
pub struct SpeechCapture {
    capture: Arc<SharedCaptureStream>,
    sink: FrameCallback,
    subscription: Option<SubscriptionId>,
}

impl SpeechCapture {
    pub fn new(capture: Arc<SharedCaptureStream>, sink: FrameCallback) -> Self {
        Self {
            capture,
            sink,
            subscription: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    pub(crate) async fn start(&mut self) -> Result<(), CaptureError> {
        if self.subscription.is_some() {
            return Ok(());
        }
        let id = self
            .capture
            .subscribe("speech", Arc::clone(&self.sink))
            .await?;
        self.subscription = Some(id);
        Ok(())
    }

    pub(crate) async fn stop(&mut self) {
        if let Some(id) = self.subscription.take() {
            if !self.capture.unsubscribe(id).await {
                debug!(subscription = %id, "speech subscription was already gone");
            }
        }
    }
}
