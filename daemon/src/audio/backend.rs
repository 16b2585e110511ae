//! Native audio boundary
//!
//! Everything that touches the platform audio stack goes through the two
//! traits in this module. Only the engine guard and the shared capture
//! stream hold implementations of them.

use std::sync::Arc;

/// Capture sample rate in Hz
pub const SAMPLE_RATE: u32 = 16_000;

/// Capture channel count (mono)
pub const CHANNELS: u16 = 1;

/// Frame duration in milliseconds
pub const FRAME_MS: u32 = 20;

/// Samples per frame (320 at 16 kHz / 20 ms)
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE * FRAME_MS / 1000) as usize;

/// One captured frame, shared by every subscriber that receives it
pub type AudioFrame = Arc<[i16]>;

/// Callback the backend invokes on its capture thread, once per frame
pub type RawFrameCallback = Arc<dyn Fn(&[i16]) + Send + Sync>;

/// Fixed capture format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_samples: usize,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_samples: FRAME_SAMPLES,
        }
    }
}

/// Classes of native failures the core reacts to differently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// No usable input device or engine could not come up at all
    Unavailable,
    /// The device handle was rejected, typically after a too-fast restart
    InvalidHandle,
    /// The native call did not return within the hard timeout
    Timeout,
    /// Anything else the driver reports
    Other,
}

/// Error reported by a native audio call
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unavailable, message)
    }

    pub fn invalid_handle(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::InvalidHandle, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Other, message)
    }

    /// Whether another attempt after a backoff may succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self.kind, BackendErrorKind::Unavailable)
    }
}

/// The one-per-process native engine (PortAudio-style init/terminate)
pub trait AudioEngine: Send + Sync {
    fn initialize(&self) -> Result<(), BackendError>;
    fn terminate(&self) -> Result<(), BackendError>;
}

/// A physical input device that can open a capture stream
pub trait InputDevice: Send + Sync {
    /// Open and start a stream. `on_frame` is called from the driver thread
    /// with exactly `format.frame_samples` samples per call.
    fn open(
        &self,
        format: CaptureFormat,
        on_frame: RawFrameCallback,
    ) -> Result<Arc<dyn InputStream>, BackendError>;
}

/// A running hardware stream. Dropping the last handle closes it.
pub trait InputStream: Send + Sync {
    fn stop(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        assert_eq!(FRAME_SAMPLES, 320);
        assert_eq!(CaptureFormat::default().frame_samples, 320);
    }

    #[test]
    fn test_transient_classification() {
        assert!(!BackendError::unavailable("no mic").is_transient());
        assert!(BackendError::invalid_handle("bad handle").is_transient());
        assert!(BackendError::new(BackendErrorKind::Timeout, "slow").is_transient());
    }
}
