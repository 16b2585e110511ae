//! Shared microphone capture
//!
//! One hardware input stream, many consumers. The stream is opened when the
//! first subscriber arrives and closed when the last one leaves; while it
//! runs it holds exactly one engine reference.
//!
//! Two locks with different jobs:
//! - `hardware` (async) serializes subscribe/unsubscribe/cleanup together
//!   with the native open/stop calls they trigger.
//! - `subscribers` (std `RwLock`) holds an immutable snapshot of the list.
//!   Writers build a new list and swap it in; the driver thread only holds
//!   the read lock long enough to clone the `Arc`, so every frame reaches
//!   every subscriber registered before it, and callbacks run unlocked.
//!
//! The in-progress cleanup flag is only ever set while `hardware` is held.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::backend::{
    AudioFrame, BackendError, CaptureFormat, InputDevice, InputStream, RawFrameCallback,
};
use super::engine::{EngineError, NativeAudioEngineGuard};
use super::native::{run_native, teardown_with_retry};
use crate::config::AudioTiming;

/// Consumer callback. Runs on the driver thread: it must hand the frame off
/// (channel send, atomic update) and return.
pub type FrameCallback = Arc<dyn Fn(AudioFrame) + Send + Sync>;

/// Handle returned by [`SharedCaptureStream::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Errors surfaced by [`SharedCaptureStream::subscribe`]
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to open input stream: {0}")]
    Open(#[source] BackendError),
}

impl CaptureError {
    /// Recoverable errors leave the conversation running with degraded
    /// audio; the rest mean there is no device to capture from.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CaptureError::Engine(_) => false,
            CaptureError::Open(e) => e.is_transient(),
        }
    }
}

/// Snapshot of the capture stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStatus {
    pub running: bool,
    pub subscribers: usize,
    pub active_subscribers: usize,
}

struct Subscription {
    id: SubscriptionId,
    label: String,
    callback: FrameCallback,
    active: AtomicBool,
}

#[derive(Default)]
struct Hardware {
    stream: Option<Arc<dyn InputStream>>,
    last_stop: Option<Instant>,
}

type Snapshot = Arc<Vec<Arc<Subscription>>>;
type SubscriberList = RwLock<Snapshot>;

/// Owner of the single hardware input stream
pub struct SharedCaptureStream {
    engine: Arc<NativeAudioEngineGuard>,
    device: Arc<dyn InputDevice>,
    format: CaptureFormat,
    timing: AudioTiming,
    hardware: Mutex<Hardware>,
    subscribers: Arc<SubscriberList>,
    cleanup_in_progress: AtomicBool,
    next_id: AtomicU64,
    dropped_frames: Arc<AtomicU64>,
}

impl SharedCaptureStream {
    pub fn new(
        engine: Arc<NativeAudioEngineGuard>,
        device: Arc<dyn InputDevice>,
        timing: AudioTiming,
    ) -> Self {
        Self {
            engine,
            device,
            format: CaptureFormat::default(),
            timing,
            hardware: Mutex::new(Hardware::default()),
            subscribers: Arc::new(RwLock::new(Arc::new(Vec::new()))),
            cleanup_in_progress: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            dropped_frames: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a consumer, opening the hardware stream if it is the first
    pub async fn subscribe(
        &self,
        label: &str,
        callback: FrameCallback,
    ) -> Result<SubscriptionId, CaptureError> {
        let mut hw = self.hardware.lock().await;

        if hw.stream.is_none() {
            self.engine.acquire().await?;
            match self.open_stream(&hw).await {
                Ok(stream) => {
                    hw.stream = Some(stream);
                    info!(
                        sample_rate = self.format.sample_rate,
                        frame_samples = self.format.frame_samples,
                        "hardware input stream started"
                    );
                }
                Err(e) => {
                    self.engine.release().await;
                    return Err(e);
                }
            }
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Arc::new(Subscription {
            id,
            label: label.to_string(),
            callback,
            active: AtomicBool::new(true),
        });

        let count = update_list(&self.subscribers, |list| {
            list.push(subscription);
            list.len()
        });

        info!(subscription = %id, label, subscribers = count, "capture subscription added");
        Ok(id)
    }

    /// Remove a consumer, stopping the hardware stream if it was the last.
    ///
    /// Returns false for an unknown id, which makes repeated calls harmless.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut hw = self.hardware.lock().await;

        // an older snapshot may still be dispatching; make it skip this one
        let remaining = update_list(&self.subscribers, |list| {
            let index = list.iter().position(|sub| sub.id == id)?;
            list.remove(index).active.store(false, Ordering::Release);
            Some(list.len())
        });
        let Some(remaining) = remaining else {
            debug!(subscription = %id, "unsubscribe for unknown subscription ignored");
            return false;
        };

        info!(subscription = %id, remaining, "capture subscription removed");

        if remaining == 0 {
            self.cleanup_in_progress.store(true, Ordering::Release);
            self.stop_hardware(&mut hw).await;
            self.engine.release().await;
            self.cleanup_in_progress.store(false, Ordering::Release);
        }

        true
    }

    /// Stop delivering frames to `id` without touching the hardware stream
    pub fn pause(&self, id: SubscriptionId) -> bool {
        self.set_active(id, false)
    }

    /// Resume delivering frames to `id`
    pub fn resume(&self, id: SubscriptionId) -> bool {
        self.set_active(id, true)
    }

    /// Tear everything down regardless of who still holds a subscription.
    ///
    /// Returns false when another cleanup is already running; the caller
    /// should check again later instead of racing it.
    pub async fn force_cleanup(&self) -> bool {
        if self.cleanup_in_progress.load(Ordering::Acquire) {
            warn!("capture cleanup already in progress, forced cleanup rejected");
            return false;
        }

        let mut hw = self.hardware.lock().await;
        self.cleanup_in_progress.store(true, Ordering::Release);
        let dropped = update_list(&self.subscribers, |list| {
            list.drain(..)
                .map(|sub| sub.active.store(false, Ordering::Release))
                .count()
        });
        warn!(subscriptions = dropped, "forcing capture cleanup");

        self.stop_hardware(&mut hw).await;
        self.engine.force_reset().await;
        self.cleanup_in_progress.store(false, Ordering::Release);
        true
    }

    pub async fn status(&self) -> CaptureStatus {
        let hw = self.hardware.lock().await;
        let list = snapshot(&self.subscribers);
        CaptureStatus {
            running: hw.stream.is_some(),
            subscribers: list.len(),
            active_subscribers: list
                .iter()
                .filter(|sub| sub.active.load(Ordering::Acquire))
                .count(),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.hardware.lock().await.stream.is_some()
    }

    /// Deliveries lost to a panicking subscriber
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    fn set_active(&self, id: SubscriptionId, active: bool) -> bool {
        let list = snapshot(&self.subscribers);
        match list.iter().find(|sub| sub.id == id) {
            Some(sub) => {
                let was = sub.active.swap(active, Ordering::AcqRel);
                if was != active {
                    debug!(subscription = %id, label = %sub.label, active, "capture subscription toggled");
                }
                true
            }
            None => false,
        }
    }

    /// Open the device, honouring the restart backoff after a recent stop
    async fn open_stream(&self, hw: &Hardware) -> Result<Arc<dyn InputStream>, CaptureError> {
        if let Some(stopped) = hw.last_stop {
            let since = stopped.elapsed();
            let backoff = self.timing.restart_backoff();
            if since < backoff {
                debug!(
                    wait_ms = (backoff - since).as_millis() as u64,
                    "waiting out restart backoff before reopening input"
                );
                tokio::time::sleep(backoff - since).await;
            }
        }

        match self.open_once().await {
            Ok(stream) => Ok(stream),
            Err(e) if e.is_transient() => {
                warn!(
                    error = %e,
                    retry_in_ms = self.timing.restart_retry_backoff_ms,
                    "input stream open failed, retrying once"
                );
                tokio::time::sleep(self.timing.restart_retry_backoff()).await;
                self.open_once().await.map_err(CaptureError::Open)
            }
            Err(e) => Err(CaptureError::Open(e)),
        }
    }

    async fn open_once(&self) -> Result<Arc<dyn InputStream>, BackendError> {
        let device = Arc::clone(&self.device);
        let format = self.format;
        let on_frame = self.frame_dispatcher();
        run_native("input open", self.timing.native_timeout(), move || {
            device.open(format, on_frame)
        })
        .await
    }

    /// Stop and forget the hardware stream. Exhausted retries still leave
    /// the stream marked stopped.
    async fn stop_hardware(&self, hw: &mut Hardware) {
        let Some(stream) = hw.stream.take() else {
            return;
        };

        let handle = Arc::clone(&stream);
        match teardown_with_retry("input stop", &self.timing, move || handle.stop()).await {
            Ok(()) => info!("hardware input stream stopped"),
            Err(e) => warn!(error = %e, "input stream stop failed twice, marking stopped"),
        }
        drop(stream);
        hw.last_stop = Some(Instant::now());
    }

    fn frame_dispatcher(&self) -> RawFrameCallback {
        let subscribers = Arc::clone(&self.subscribers);
        let dropped = Arc::clone(&self.dropped_frames);
        Arc::new(move |samples: &[i16]| dispatch_frame(&subscribers, &dropped, samples))
    }
}

/// Driver-thread side of the fan-out: one copy of the frame, shared by
/// every active subscriber.
fn dispatch_frame(subscribers: &SubscriberList, dropped: &AtomicU64, samples: &[i16]) {
    let list = snapshot(subscribers);
    if list.is_empty() {
        return;
    }

    let frame: AudioFrame = Arc::from(samples);
    for sub in list.iter() {
        if !sub.active.load(Ordering::Acquire) {
            continue;
        }
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
            (sub.callback)(Arc::clone(&frame));
        }));
        if delivered.is_err() {
            dropped.fetch_add(1, Ordering::Relaxed);
            warn!(subscription = %sub.id, label = %sub.label, "capture subscriber panicked, frame dropped");
        }
    }
}

fn snapshot(list: &SubscriberList) -> Snapshot {
    Arc::clone(&list.read().unwrap_or_else(|poisoned| poisoned.into_inner()))
}

/// Copy, edit, swap. Callers hold `hardware`, so edits never interleave.
fn update_list<R>(list: &SubscriberList, edit: impl FnOnce(&mut Vec<Arc<Subscription>>) -> R) -> R {
    let mut next = snapshot(list).as_ref().clone();
    let result = edit(&mut next);
    *list.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(next);
    result
}
