//! Global hotkey listener using macOS CGEventTap
//!
//! Runs on a dedicated thread with its own CFRunLoop and a listen-only tap
//! on modifier changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventType,
};
use tracing::{debug, error, info, warn};

use crate::interrupt::{InterruptHandle, SignalSource};

use super::keys::{ChordDetector, ModifierState};
use super::HotkeyError;

/// Reports the interrupt chord to the coordinator
pub struct HotkeyListener {
    interrupts: InterruptHandle,
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    pub fn new(interrupts: InterruptHandle) -> Self {
        Self {
            interrupts,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the listener thread. It runs until `stop()` is called.
    pub fn start(&self) -> Result<(), HotkeyError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        let interrupts = self.interrupts.clone();
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");

                if let Err(e) = run_event_loop(interrupts, Arc::clone(&running)) {
                    error!(error = %e, "hotkey listener error");
                }

                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                HotkeyError::ThreadSpawn(e.to_string())
            })?;

        Ok(())
    }

    /// The run loop notices on its next slice
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn run_event_loop(interrupts: InterruptHandle, running: Arc<AtomicBool>) -> Result<(), HotkeyError> {
    let mut last_state = ModifierState::default();
    let mut chord = ChordDetector::new();

    let (callback_tx, callback_rx) = std::sync::mpsc::channel::<CGEventFlags>();

    // must stay fast and non-blocking
    let callback = move |_proxy: core_graphics::event::CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
          -> Option<CGEvent> {
        match event_type {
            CGEventType::FlagsChanged => {
                let _ = callback_tx.send(event.get_flags());
            }
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                warn!("event tap disabled by the system");
            }
            _ => {}
        }
        Some(event.clone())
    };

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::FlagsChanged],
        callback,
    )
    .map_err(|_| HotkeyError::EventTapCreation)?;

    tap.enable();

    let run_loop_source = tap
        .mach_port
        .create_runloop_source(0)
        .map_err(|_| HotkeyError::EventTapCreation)?;
    let run_loop = CFRunLoop::get_current();

    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }

    info!("event tap created and enabled");

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
        }

        while let Ok(flags) = callback_rx.try_recv() {
            let state = ModifierState::from_flags(flags);
            if state == last_state {
                continue;
            }
            debug!(?last_state, ?state, "modifier state changed");
            last_state = state;

            if chord.update(state) {
                info!("interrupt chord pressed");
                if !interrupts.report_now(SignalSource::Hotkey) {
                    warn!("interrupt coordinator stopped, hotkey listener exiting");
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}
