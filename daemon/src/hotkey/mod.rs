//! Global hotkey
//!
//! On macOS a CGEventTap watches modifier changes and reports the
//! Control+Option chord as a keyboard interruption. Elsewhere the listener
//! refuses to start and the daemon runs without it.

mod keys;
#[cfg(target_os = "macos")]
mod listener;
#[cfg(not(target_os = "macos"))]
mod unsupported;

pub use keys::{ChordDetector, ModifierState};
#[cfg(target_os = "macos")]
pub use listener::HotkeyListener;
#[cfg(not(target_os = "macos"))]
pub use unsupported::HotkeyListener;

/// Errors that can occur in the hotkey listener
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("global hotkeys are not supported on this platform")]
    Unsupported,
}
