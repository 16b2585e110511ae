//! Stand-in for platforms without a global hotkey tap

use crate::interrupt::InterruptHandle;

use super::HotkeyError;

pub struct HotkeyListener {
    _interrupts: InterruptHandle,
}

impl HotkeyListener {
    pub fn new(interrupts: InterruptHandle) -> Self {
        Self {
            _interrupts: interrupts,
        }
    }

    pub fn start(&self) -> Result<(), HotkeyError> {
        Err(HotkeyError::Unsupported)
    }

    pub fn stop(&self) {}

    pub fn is_running(&self) -> bool {
        false
    }
}
