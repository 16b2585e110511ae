//! Modifier key state and the interrupt chord
//!
//! Control+Option pressed together interrupts the conversation. Only the
//! moment the chord becomes complete counts; holding it does nothing more.

#[cfg(target_os = "macos")]
use core_graphics::event::CGEventFlags;

/// Modifier key flag masks from macOS CGEventFlags
#[cfg(target_os = "macos")]
pub mod flags {
    use core_graphics::event::CGEventFlags;

    pub const CONTROL: CGEventFlags = CGEventFlags::CGEventFlagControl;
    pub const OPTION: CGEventFlags = CGEventFlags::CGEventFlagAlternate;
    pub const COMMAND: CGEventFlags = CGEventFlags::CGEventFlagCommand;
}

/// Tracks which modifier keys are currently pressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    pub control: bool,
    pub option: bool,
    pub command: bool,
}

impl ModifierState {
    #[cfg(target_os = "macos")]
    pub fn from_flags(flags: CGEventFlags) -> Self {
        Self {
            control: flags.contains(flags::CONTROL),
            option: flags.contains(flags::OPTION),
            command: flags.contains(flags::COMMAND),
        }
    }

    /// Control + Option without Command
    pub fn is_interrupt_chord(&self) -> bool {
        self.control && self.option && !self.command
    }
}

/// Reports the rising edge of the interrupt chord
#[derive(Debug, Default)]
pub struct ChordDetector {
    held: bool,
}

impl ChordDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the latest modifier state; true when the chord was just completed
    pub fn update(&mut self, state: ModifierState) -> bool {
        let chord = state.is_interrupt_chord();
        let fired = chord && !self.held;
        self.held = chord;
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTROL: ModifierState = ModifierState {
        control: true,
        option: false,
        command: false,
    };
    const CHORD: ModifierState = ModifierState {
        control: true,
        option: true,
        command: false,
    };
    const CHORD_WITH_COMMAND: ModifierState = ModifierState {
        control: true,
        option: true,
        command: true,
    };

    #[test]
    fn test_empty_state() {
        let state = ModifierState::default();
        assert!(!state.is_interrupt_chord());
        assert!(!ChordDetector::new().update(state));
    }

    #[test]
    fn test_chord() {
        assert!(!CONTROL.is_interrupt_chord());
        assert!(CHORD.is_interrupt_chord());
        assert!(!CHORD_WITH_COMMAND.is_interrupt_chord());
    }

    #[test]
    fn test_rising_edge_only() {
        let mut detector = ChordDetector::new();
        assert!(!detector.update(CONTROL));
        assert!(detector.update(CHORD));
        // still held
        assert!(!detector.update(CHORD));
        assert!(!detector.update(CONTROL));
        assert!(detector.update(CHORD));
    }

    #[test]
    fn test_adding_command_breaks_chord() {
        let mut detector = ChordDetector::new();
        assert!(detector.update(CHORD));
        assert!(!detector.update(CHORD_WITH_COMMAND));
        assert!(detector.update(CHORD));
    }
}
