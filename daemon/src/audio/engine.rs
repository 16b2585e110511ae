//! Reference-counted guard around the native audio engine
//!
//! Recorder, player and capture stream each acquire the engine around their
//! own use of it. Native init happens on the 0→1 edge and native terminate
//! on the 1→0 edge, both under the same lock as the counter so nobody ever
//! observes a half-initialized or half-terminated engine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::backend::{AudioEngine, BackendError};
use super::native::{run_native, teardown_with_retry};
use crate::config::AudioTiming;

/// Errors returned by [`NativeAudioEngineGuard::acquire`]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("native audio engine failed to initialize: {0}")]
    Init(#[source] BackendError),
}

/// Snapshot of the engine guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub initialized: bool,
    pub refcount: usize,
}

/// The only owner of the native engine handle
pub struct NativeAudioEngineGuard {
    engine: Arc<dyn AudioEngine>,
    timing: AudioTiming,
    refcount: Mutex<usize>,
}

impl NativeAudioEngineGuard {
    pub fn new(engine: Arc<dyn AudioEngine>, timing: AudioTiming) -> Self {
        Self {
            engine,
            timing,
            refcount: Mutex::new(0),
        }
    }

    /// Take a reference, initializing the engine if this is the first one
    pub async fn acquire(&self) -> Result<(), EngineError> {
        let mut count = self.refcount.lock().await;

        if *count == 0 {
            let engine = Arc::clone(&self.engine);
            run_native("engine init", self.timing.native_timeout(), move || {
                engine.initialize()
            })
            .await
            .map_err(EngineError::Init)?;
            info!("native audio engine initialized");
        }

        *count += 1;
        debug!(refcount = *count, "audio engine acquired");
        Ok(())
    }

    /// Drop a reference, terminating the engine when it was the last one.
    ///
    /// Teardown failures are retried once and then swallowed: the count is
    /// zero either way and the next acquire performs a fresh init.
    pub async fn release(&self) {
        let mut count = self.refcount.lock().await;

        if *count == 0 {
            warn!("audio engine released without a matching acquire");
            return;
        }

        *count -= 1;
        debug!(refcount = *count, "audio engine released");
        if *count > 0 {
            return;
        }

        let engine = Arc::clone(&self.engine);
        match teardown_with_retry("engine terminate", &self.timing, move || engine.terminate())
            .await
        {
            Ok(()) => info!("native audio engine terminated"),
            Err(e) => warn!(error = %e, "engine terminate failed twice, marking released"),
        }
    }

    /// Zero the count and terminate unconditionally.
    ///
    /// Used when recovery tears everything down; outstanding holders are
    /// expected to have been discarded.
    pub async fn force_reset(&self) {
        let mut count = self.refcount.lock().await;
        if *count == 0 {
            return;
        }

        warn!(refcount = *count, "forcing audio engine reset");
        *count = 0;

        let engine = Arc::clone(&self.engine);
        if let Err(e) = run_native("engine terminate", self.timing.native_timeout(), move || {
            engine.terminate()
        })
        .await
        {
            warn!(error = %e, "engine terminate failed during forced reset");
        }
    }

    pub async fn status(&self) -> EngineStatus {
        let count = *self.refcount.lock().await;
        EngineStatus {
            initialized: count > 0,
            refcount: count,
        }
    }
}
