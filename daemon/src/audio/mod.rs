//! Audio resource management
//!
//! The native engine and the microphone are the only shared mutable
//! resources in the daemon. Nothing outside this module calls native code:
//! - `engine`: reference-counted init/terminate of the native engine
//! - `capture`: the single input stream and its subscriber fan-out
//! - `backend`: the traits native implementations provide
//! - `sim` / `cpal_backend`: those implementations

mod backend;
mod capture;
mod engine;
mod native;
pub mod sim;

#[cfg(feature = "cpal-backend")]
pub mod cpal_backend;

pub use backend::{
    AudioEngine, AudioFrame, BackendError, BackendErrorKind, CaptureFormat, InputDevice,
    InputStream, RawFrameCallback, CHANNELS, FRAME_MS, FRAME_SAMPLES, SAMPLE_RATE,
};
pub use capture::{CaptureError, CaptureStatus, FrameCallback, SharedCaptureStream, SubscriptionId};
pub use engine::{EngineError, EngineStatus, NativeAudioEngineGuard};
