//! Microphone capture through cpal
//!
//! `cpal::Stream` is not `Send` on every host, so each open stream lives on
//! its own thread and is stopped by message. The data callback converts to
//! mono i16 and re-chunks into fixed frames with a preallocated buffer.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, SampleRate, StreamConfig};
use tracing::{error, info, warn};

use super::backend::{
    AudioEngine, BackendError, CaptureFormat, InputDevice, InputStream, RawFrameCallback,
};

/// cpal needs no global init; the engine check is that an input exists
pub struct CpalEngine;

impl AudioEngine for CpalEngine {
    fn initialize(&self) -> Result<(), BackendError> {
        let host = cpal::default_host();
        host.default_input_device()
            .map(|_| ())
            .ok_or_else(|| BackendError::unavailable("no audio input device available"))
    }

    fn terminate(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Input device selected by name substring, or the host default
pub struct CpalInput {
    device_pattern: Option<String>,
}

impl CpalInput {
    pub fn new(device_pattern: Option<String>) -> Self {
        Self { device_pattern }
    }
}

impl InputDevice for CpalInput {
    fn open(
        &self,
        format: CaptureFormat,
        on_frame: RawFrameCallback,
    ) -> Result<Arc<dyn InputStream>, BackendError> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<StopRequest>();
        let pattern = self.device_pattern.clone();

        thread::Builder::new()
            .name("cpal-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(pattern.as_deref(), format, on_frame) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(BackendError::other(format!(
                        "failed to start input stream: {e}"
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                serve_stop_requests(&stop_rx, || {
                    stream
                        .pause()
                        .map_err(|e| BackendError::other(format!("failed to pause input: {e}")))
                });
                drop(stream);
            })
            .map_err(|e| BackendError::other(format!("failed to spawn capture thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| BackendError::other("capture thread exited during open"))??;

        Ok(Arc::new(CpalStream {
            stop_tx: Mutex::new(Some(stop_tx)),
        }))
    }
}

type StopRequest = Sender<Result<(), BackendError>>;

/// Park the capture thread until a stop succeeds or the handle is dropped.
/// A failed pause keeps the stream so the caller can retry.
fn serve_stop_requests(
    stop_rx: &mpsc::Receiver<StopRequest>,
    mut pause: impl FnMut() -> Result<(), BackendError>,
) {
    while let Ok(reply) = stop_rx.recv() {
        let result = pause();
        let stopped = result.is_ok();
        let _ = reply.send(result);
        if stopped {
            return;
        }
    }
}

struct CpalStream {
    stop_tx: Mutex<Option<Sender<StopRequest>>>,
}

impl InputStream for CpalStream {
    fn stop(&self) -> Result<(), BackendError> {
        let mut slot = self
            .stop_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(tx) = slot.as_ref() else {
            return Ok(());
        };

        let (reply_tx, reply_rx) = mpsc::channel();
        tx.send(reply_tx)
            .map_err(|_| BackendError::invalid_handle("capture thread is gone"))?;
        let result = reply_rx
            .recv()
            .map_err(|_| BackendError::invalid_handle("capture thread exited during stop"))?;
        if result.is_ok() {
            *slot = None;
        }
        result
    }
}

fn find_device(pattern: Option<&str>) -> Result<Device, BackendError> {
    let host = cpal::default_host();
    let wanted = pattern.map(str::to_lowercase);

    let by_name = match wanted {
        Some(ref pat) => host
            .input_devices()
            .map_err(|e| BackendError::unavailable(format!("cannot enumerate inputs: {e}")))?
            .find(|d| {
                d.name()
                    .map(|n| n.to_lowercase().contains(pat.as_str()))
                    .unwrap_or(false)
            }),
        None => None,
    };

    by_name
        .or_else(|| host.default_input_device())
        .ok_or_else(|| BackendError::unavailable("no audio input device available"))
}

fn build_stream(
    pattern: Option<&str>,
    format: CaptureFormat,
    on_frame: RawFrameCallback,
) -> Result<cpal::Stream, BackendError> {
    let device = find_device(pattern)?;
    let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());

    let rate = SampleRate(format.sample_rate);
    let range = device
        .supported_input_configs()
        .map_err(|e| BackendError::unavailable(format!("cannot query input configs: {e}")))?
        .find(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
        .ok_or_else(|| {
            BackendError::unavailable(format!(
                "'{device_name}' does not support {} Hz capture",
                format.sample_rate
            ))
        })?;
    let channels = range.channels().max(1) as usize;
    let config: StreamConfig = range.with_sample_rate(rate).config();

    info!(device = %device_name, channels, sample_rate = format.sample_rate, "opening input device");

    let frame_len = format.frame_samples;
    let mut pending: Vec<i16> = Vec::with_capacity(frame_len * 2);

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks_exact(channels) {
                    let mono = frame.iter().sum::<f32>() / channels as f32;
                    pending.push((mono.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                    if pending.len() == frame_len {
                        on_frame(&pending);
                        pending.clear();
                    }
                }
            },
            |err| error!(%err, "audio input stream error"),
            None,
        )
        .map_err(|e| match e {
            BuildStreamError::DeviceNotAvailable => {
                warn!(device = %device_name, "input device not available");
                BackendError::invalid_handle("input device not available")
            }
            other => BackendError::other(format!("failed to build input stream: {other}")),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn stream_with_pause(failures: u32) -> (CpalStream, Arc<AtomicU32>, thread::JoinHandle<()>) {
        let (stop_tx, stop_rx) = mpsc::channel::<StopRequest>();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let thread = thread::spawn(move || {
            serve_stop_requests(&stop_rx, || {
                if seen.fetch_add(1, Ordering::SeqCst) < failures {
                    Err(BackendError::other("pause refused"))
                } else {
                    Ok(())
                }
            })
        });
        let stream = CpalStream {
            stop_tx: Mutex::new(Some(stop_tx)),
        };
        (stream, calls, thread)
    }

    #[test]
    fn test_failed_pause_can_be_retried() {
        let (stream, calls, thread) = stream_with_pause(1);

        assert!(stream.stop().is_err());
        assert!(stream.stop().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        thread.join().unwrap();
    }

    #[test]
    fn test_stop_after_success_is_noop() {
        let (stream, calls, thread) = stream_with_pause(0);

        assert!(stream.stop().is_ok());
        thread.join().unwrap();
        assert!(stream.stop().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_handle_releases_thread() {
        let (stream, calls, thread) = stream_with_pause(u32::MAX);

        assert!(stream.stop().is_err());
        drop(stream);
        thread.join().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
