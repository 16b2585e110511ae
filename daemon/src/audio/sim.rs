//! Simulated audio backend
//!
//! Stands in for the platform stack when the daemon is built without
//! `cpal-backend`, and gives tests a way to inject native failures. It
//! mimics the two native behaviours the core has to survive: teardown calls
//! that fail or stall, and a device that rejects a restart arriving too
//! soon after a stop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::backend::{
    AudioEngine, BackendError, CaptureFormat, InputDevice, InputStream, RawFrameCallback,
};

#[derive(Debug, Default)]
struct Faults {
    init_failures: u32,
    terminate_failures: u32,
    open_failures: VecDeque<BackendError>,
    stop_failures: u32,
    stop_delay: Option<Duration>,
    rapid_restart_window: Option<Duration>,
}

struct Running {
    id: u64,
    callback: RawFrameCallback,
    format: CaptureFormat,
}

#[derive(Default)]
struct SimState {
    engine_initialized: AtomicBool,
    init_calls: AtomicU32,
    terminate_calls: AtomicU32,
    open_calls: AtomicU32,
    stop_calls: AtomicU32,
    faults: Mutex<Faults>,
    running: Mutex<Option<Running>>,
    last_stop: Mutex<Option<Instant>>,
    next_stream_id: Mutex<u64>,
    frame_clock: Option<Duration>,
}

/// In-process engine and input device
#[derive(Clone)]
pub struct SimulatedBackend {
    state: Arc<SimState>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    /// Backend that only delivers frames passed to [`emit`](Self::emit)
    pub fn new() -> Self {
        Self {
            state: Arc::new(SimState::default()),
        }
    }

    /// Backend that also delivers a silent frame every frame period while
    /// a stream is open
    pub fn with_frame_clock() -> Self {
        let format = CaptureFormat::default();
        let period = Duration::from_millis(
            (format.frame_samples as u64 * 1000) / format.sample_rate as u64,
        );
        Self {
            state: Arc::new(SimState {
                frame_clock: Some(period),
                ..SimState::default()
            }),
        }
    }

    pub fn fail_next_init(&self, times: u32) {
        self.faults().init_failures = times;
    }

    pub fn fail_next_terminate(&self, times: u32) {
        self.faults().terminate_failures = times;
    }

    pub fn fail_next_open(&self, error: BackendError) {
        self.faults().open_failures.push_back(error);
    }

    pub fn fail_next_stop(&self, times: u32) {
        self.faults().stop_failures = times;
    }

    pub fn set_stop_delay(&self, delay: Duration) {
        self.faults().stop_delay = Some(delay);
    }

    /// Reject any open arriving within `window` of the previous stop with
    /// an invalid-handle error
    pub fn set_rapid_restart_window(&self, window: Duration) {
        self.faults().rapid_restart_window = Some(window);
    }

    /// Deliver one frame to the open stream, as the driver thread would.
    /// Returns false when no stream is open.
    pub fn emit(&self, samples: &[i16]) -> bool {
        let callback = match lock(&self.state.running).as_ref() {
            Some(running) => Arc::clone(&running.callback),
            None => return false,
        };
        callback(samples);
        true
    }

    pub fn is_engine_initialized(&self) -> bool {
        self.state.engine_initialized.load(Ordering::SeqCst)
    }

    pub fn is_stream_running(&self) -> bool {
        lock(&self.state.running).is_some()
    }

    pub fn init_calls(&self) -> u32 {
        self.state.init_calls.load(Ordering::SeqCst)
    }

    pub fn terminate_calls(&self) -> u32 {
        self.state.terminate_calls.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> u32 {
        self.state.open_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.state.stop_calls.load(Ordering::SeqCst)
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        lock(&self.state.faults)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn take_failure(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

impl AudioEngine for SimulatedBackend {
    fn initialize(&self) -> Result<(), BackendError> {
        self.state.init_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&mut self.faults().init_failures) {
            return Err(BackendError::unavailable("simulated engine init failure"));
        }
        self.state.engine_initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&self) -> Result<(), BackendError> {
        self.state.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&mut self.faults().terminate_failures) {
            return Err(BackendError::other("simulated engine terminate failure"));
        }
        self.state.engine_initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl InputDevice for SimulatedBackend {
    fn open(
        &self,
        format: CaptureFormat,
        on_frame: RawFrameCallback,
    ) -> Result<Arc<dyn InputStream>, BackendError> {
        self.state.open_calls.fetch_add(1, Ordering::SeqCst);

        if !self.is_engine_initialized() {
            return Err(BackendError::unavailable("engine not initialized"));
        }
        {
            let mut faults = self.faults();
            if let Some(error) = faults.open_failures.pop_front() {
                return Err(error);
            }
            if let (Some(window), Some(stopped)) =
                (faults.rapid_restart_window, *lock(&self.state.last_stop))
            {
                if stopped.elapsed() < window {
                    return Err(BackendError::invalid_handle(
                        "device reopened too soon after stop",
                    ));
                }
            }
        }

        let mut running = lock(&self.state.running);
        if running.is_some() {
            return Err(BackendError::other("device already has an open stream"));
        }

        let id = {
            let mut next = lock(&self.state.next_stream_id);
            *next += 1;
            *next
        };
        *running = Some(Running {
            id,
            callback: Arc::clone(&on_frame),
            format,
        });
        drop(running);

        if let Some(period) = self.state.frame_clock {
            let state = Arc::clone(&self.state);
            thread::Builder::new()
                .name("sim-capture".to_string())
                .spawn(move || run_frame_clock(state, id, period))
                .map_err(|e| BackendError::other(format!("failed to spawn frame clock: {e}")))?;
        }

        debug!(stream = id, "simulated input stream opened");
        Ok(Arc::new(SimStream {
            state: Arc::clone(&self.state),
            id,
        }))
    }
}

fn run_frame_clock(state: Arc<SimState>, id: u64, period: Duration) {
    let mut silence = Vec::new();
    loop {
        thread::sleep(period);
        let callback = match lock(&state.running).as_ref() {
            Some(running) if running.id == id => {
                silence.resize(running.format.frame_samples, 0i16);
                Arc::clone(&running.callback)
            }
            _ => return,
        };
        callback(&silence);
    }
}

struct SimStream {
    state: Arc<SimState>,
    id: u64,
}

impl InputStream for SimStream {
    fn stop(&self) -> Result<(), BackendError> {
        self.state.stop_calls.fetch_add(1, Ordering::SeqCst);

        let (fail, delay) = {
            let mut faults = lock(&self.state.faults);
            (take_failure(&mut faults.stop_failures), faults.stop_delay)
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if fail {
            return Err(BackendError::other("simulated stop failure"));
        }

        let mut running = lock(&self.state.running);
        match running.as_ref() {
            Some(current) if current.id == self.id => {
                *running = None;
                *lock(&self.state.last_stop) = Some(Instant::now());
                Ok(())
            }
            _ => Err(BackendError::invalid_handle("stream already stopped")),
        }
    }
}
