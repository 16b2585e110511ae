//! Interrupt coordinator actor

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::{SharedCaptureStream, SubscriptionId};
use crate::config::InterruptConfig;
use crate::events::ConversationEvent;
use crate::state::{ConversationHandle, DeviceState, Trigger};

use super::signal::{resolve, InterruptSignal, RateLimiter, SignalSource};

enum Control {
    PauseWakeWord,
    ResumeWakeWord,
    AttachWakeWord(SubscriptionId),
    Shutdown,
}

enum Command {
    Report(InterruptSignal),
    Control(Control),
}

/// Cloneable front end to the coordinator. Reporting never blocks, so
/// detectors may call it from any thread.
#[derive(Clone)]
pub struct InterruptHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl InterruptHandle {
    pub fn report(&self, signal: InterruptSignal) -> bool {
        self.tx.send(Command::Report(signal)).is_ok()
    }

    /// Report a signal stamped with the current time
    pub fn report_now(&self, source: SignalSource) -> bool {
        self.report(InterruptSignal::now(source))
    }

    pub fn pause_wake_word(&self) -> bool {
        self.tx.send(Command::Control(Control::PauseWakeWord)).is_ok()
    }

    pub fn resume_wake_word(&self) -> bool {
        self.tx.send(Command::Control(Control::ResumeWakeWord)).is_ok()
    }

    /// Tell the coordinator which capture subscription feeds the wake-word
    /// detector
    pub fn attach_wake_word(&self, id: SubscriptionId) {
        let _ = self.tx.send(Command::Control(Control::AttachWakeWord(id)));
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Control(Control::Shutdown));
    }
}

/// Resolves competing interrupt signals into a single abort request
pub struct InterruptCoordinator {
    conversation: ConversationHandle,
    capture: Arc<SharedCaptureStream>,
    events: broadcast::Sender<ConversationEvent>,
    limiter: RateLimiter,
    tick: Duration,
    wake_word: Option<SubscriptionId>,
    manual_pause: bool,
    listening: bool,
    applied_pause: Option<bool>,
}

impl InterruptCoordinator {
    pub fn spawn(
        config: &InterruptConfig,
        conversation: ConversationHandle,
        capture: Arc<SharedCaptureStream>,
        events: broadcast::Sender<ConversationEvent>,
    ) -> (InterruptHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = events.subscribe();
        let listening = conversation.state() == DeviceState::Listening;

        let coordinator = Self {
            conversation,
            capture,
            events,
            limiter: RateLimiter::new(config.min_signal_interval()),
            tick: config.dispatch_tick(),
            wake_word: None,
            manual_pause: false,
            listening,
            applied_pause: None,
        };

        let task = tokio::spawn(coordinator.run(rx, bus));
        (InterruptHandle { tx }, task)
    }

    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Command>,
        mut bus: broadcast::Receiver<ConversationEvent>,
    ) {
        info!(tick_ms = self.tick.as_millis() as u64, "interrupt coordinator started");

        loop {
            tokio::select! {
                // state changes first, so a signal is judged against the latest state
                biased;

                event = bus.recv() => match event {
                    Ok(ConversationEvent::StateChanged(transition)) => {
                        self.listening = transition.to == DeviceState::Listening;
                        self.apply_wake_word_pause();
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "interrupt coordinator lagged behind events");
                        self.listening = self.conversation.state() == DeviceState::Listening;
                        self.apply_wake_word_pause();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                command = rx.recv() => {
                    let keep_running = match command {
                        Some(Command::Report(signal)) => {
                            if self.accept(signal) {
                                self.resolve_tick(signal, &mut rx).await
                            } else {
                                true
                            }
                        }
                        Some(Command::Control(control)) => self.handle_control(control),
                        None => false,
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        info!("interrupt coordinator stopped");
    }

    fn wake_word_paused(&self) -> bool {
        self.manual_pause || self.listening
    }

    fn accept(&mut self, signal: InterruptSignal) -> bool {
        if signal.source == SignalSource::WakeWord && self.wake_word_paused() {
            debug!("wake word signal while paused, dropped");
            return false;
        }
        if !self.limiter.accept(&signal) {
            debug!(source = ?signal.source, "interrupt signal rate limited");
            return false;
        }
        true
    }

    /// Collect everything reported during one tick and act on the winner.
    /// Returns false if a shutdown arrived meanwhile.
    async fn resolve_tick(
        &mut self,
        first: InterruptSignal,
        rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> bool {
        let mut batch = vec![first];
        tokio::time::sleep(self.tick).await;

        let mut keep_running = true;
        while let Ok(command) = rx.try_recv() {
            match command {
                Command::Report(signal) => {
                    if self.accept(signal) {
                        batch.push(signal);
                    }
                }
                Command::Control(control) => keep_running &= self.handle_control(control),
            }
        }

        let Some((winner, dropped)) = resolve(&batch) else {
            return keep_running;
        };
        let reason = winner.source.abort_reason();
        info!(source = ?winner.source, %reason, dropped, "interrupt resolved");

        if !self.conversation.request(Trigger::Abort(reason)) {
            warn!(%reason, "state machine stopped, interrupt discarded");
        }
        let _ = self
            .events
            .send(ConversationEvent::InterruptResolved { reason, dropped });

        keep_running
    }

    fn handle_control(&mut self, control: Control) -> bool {
        match control {
            Control::PauseWakeWord => self.manual_pause = true,
            Control::ResumeWakeWord => self.manual_pause = false,
            Control::AttachWakeWord(id) => {
                debug!(subscription = %id, "wake word subscription attached");
                self.wake_word = Some(id);
                self.applied_pause = None;
            }
            Control::Shutdown => return false,
        }
        self.apply_wake_word_pause();
        true
    }

    fn apply_wake_word_pause(&mut self) {
        let Some(id) = self.wake_word else {
            return;
        };
        let paused = self.wake_word_paused();
        if self.applied_pause == Some(paused) {
            return;
        }

        let found = if paused {
            self.capture.pause(id)
        } else {
            self.capture.resume(id)
        };
        if found {
            debug!(subscription = %id, paused, "wake word subscription updated");
            self.applied_pause = Some(paused);
        } else {
            debug!(subscription = %id, "wake word subscription no longer exists");
            self.applied_pause = None;
        }
    }
}
