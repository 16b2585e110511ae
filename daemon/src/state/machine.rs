//! Conversation state machine
//!
//! A single actor task owns the state. Callers enqueue requests through a
//! [`ConversationHandle`]; the actor takes them one at a time, runs the side
//! effects of an accepted transition to completion, and only then commits
//! the new state and looks at the next request. A request is therefore
//! always evaluated against the state left by the one before it.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ConversationConfig;
use crate::events::ConversationEvent;

use super::effects::{Dispatcher, PlaybackControl, SpeechCapture, TransitionListener};
use super::transition::{
    resolve, CaptureEffect, DeviceState, Effects, ListeningMode, StateTransition,
    TransitionOutcome, Trigger,
};

/// Errors returned by [`ConversationHandle`]
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("conversation state machine is not running")]
    Closed,
}

/// What the machine currently looks like from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub state: DeviceState,
    pub listening_mode: ListeningMode,
    pub keep_listening: bool,
    /// Whether the speech pipeline currently holds a capture subscription
    pub speech_capture: bool,
}

enum Command {
    Trigger {
        trigger: Trigger,
        reply: Option<oneshot::Sender<TransitionOutcome>>,
    },
    AutoRestart {
        generation: u64,
    },
    SetKeepListening(bool),
    SetListeningMode(ListeningMode),
    OnTransition(TransitionListener),
    Shutdown,
}

/// Cloneable front end to the state machine actor
#[derive(Clone)]
pub struct ConversationHandle {
    tx: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<MachineSnapshot>,
    events: broadcast::Sender<ConversationEvent>,
}

impl ConversationHandle {
    /// Enqueue a transition request without waiting for it.
    ///
    /// Returns false if the machine has stopped.
    pub fn request(&self, trigger: Trigger) -> bool {
        self.tx
            .send(Command::Trigger {
                trigger,
                reply: None,
            })
            .is_ok()
    }

    /// Enqueue a transition request and wait for its outcome
    pub async fn request_and_wait(
        &self,
        trigger: Trigger,
    ) -> Result<TransitionOutcome, ConversationError> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(Command::Trigger {
                trigger,
                reply: Some(reply),
            })
            .map_err(|_| ConversationError::Closed)?;
        outcome.await.map_err(|_| ConversationError::Closed)
    }

    pub fn state(&self) -> DeviceState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        *self.snapshot.borrow()
    }

    /// Watch the snapshot; changes are published on every commit
    pub fn watch(&self) -> watch::Receiver<MachineSnapshot> {
        self.snapshot.clone()
    }

    pub fn set_keep_listening(&self, enabled: bool) -> bool {
        self.tx.send(Command::SetKeepListening(enabled)).is_ok()
    }

    pub fn set_listening_mode(&self, mode: ListeningMode) -> bool {
        self.tx.send(Command::SetListeningMode(mode)).is_ok()
    }

    /// Register an observer for accepted transitions. It runs through the
    /// machine's dispatcher.
    pub fn on_transition(&self, listener: TransitionListener) -> bool {
        self.tx.send(Command::OnTransition(listener)).is_ok()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    /// Ask the actor to release audio and exit
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

struct PendingRestart {
    generation: u64,
    task: JoinHandle<()>,
}

/// The state machine actor
pub struct ConversationStateMachine {
    state: DeviceState,
    state_entered_at: Instant,
    mode: ListeningMode,
    keep_listening: bool,
    restart_delay: Duration,
    speech: SpeechCapture,
    playback: Arc<dyn PlaybackControl>,
    dispatcher: Arc<dyn Dispatcher>,
    listeners: Vec<TransitionListener>,
    events: broadcast::Sender<ConversationEvent>,
    snapshot_tx: watch::Sender<MachineSnapshot>,
    self_tx: mpsc::WeakUnboundedSender<Command>,
    pending_restart: Option<PendingRestart>,
    restart_generation: u64,
}

impl ConversationStateMachine {
    /// Start the actor for one session and return its handle and task
    pub fn spawn(
        config: &ConversationConfig,
        speech: SpeechCapture,
        playback: Arc<dyn PlaybackControl>,
        dispatcher: Arc<dyn Dispatcher>,
        events: broadcast::Sender<ConversationEvent>,
    ) -> (ConversationHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let initial = MachineSnapshot {
            state: DeviceState::Idle,
            listening_mode: config.listening_mode,
            keep_listening: config.keep_listening,
            speech_capture: false,
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let machine = Self {
            state: DeviceState::Idle,
            state_entered_at: Instant::now(),
            mode: config.listening_mode,
            keep_listening: config.keep_listening,
            restart_delay: config.auto_restart_delay(),
            speech,
            playback,
            dispatcher,
            listeners: Vec::new(),
            events: events.clone(),
            snapshot_tx,
            self_tx: tx.downgrade(),
            pending_restart: None,
            restart_generation: 0,
        };

        let task = tokio::spawn(machine.run(rx));
        let handle = ConversationHandle {
            tx,
            snapshot: snapshot_rx,
            events,
        };
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!(mode = ?self.mode, keep_listening = self.keep_listening, "state machine started in Idle state");

        while let Some(command) = rx.recv().await {
            match command {
                Command::Trigger { trigger, reply } => {
                    let outcome = self.handle_trigger(trigger).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
                Command::AutoRestart { generation } => self.handle_auto_restart(generation).await,
                Command::SetKeepListening(enabled) => {
                    self.keep_listening = enabled;
                    info!(enabled, "keep listening changed");
                    if enabled {
                        if self.state == DeviceState::Idle {
                            self.schedule_restart();
                        }
                    } else {
                        self.cancel_restart("keep listening disabled");
                    }
                    self.publish_snapshot();
                }
                Command::SetListeningMode(mode) => {
                    self.mode = mode;
                    info!(?mode, "listening mode changed");
                    if mode == ListeningMode::Manual {
                        self.cancel_restart("manual listening mode");
                    } else if self.state == DeviceState::Idle && self.pending_restart.is_none() {
                        self.schedule_restart();
                    }
                    self.publish_snapshot();
                }
                Command::OnTransition(listener) => self.listeners.push(listener),
                Command::Shutdown => break,
            }
        }

        self.cancel_restart("state machine stopping");
        self.speech.stop().await;
        info!("state machine stopped");
    }

    async fn handle_trigger(&mut self, trigger: Trigger) -> TransitionOutcome {
        let from = self.state;
        let Some((to, effects)) = resolve(from, trigger, self.keep_listening) else {
            debug!(state = %from, %trigger, "transition not valid from current state, ignored");
            return TransitionOutcome::Ignored {
                state: from,
                trigger,
            };
        };

        if trigger == Trigger::Disconnect {
            self.cancel_restart("disconnect");
        } else if from == DeviceState::Idle && to != DeviceState::Idle {
            self.cancel_restart("left Idle");
        }

        if let Err(e) = self.apply(effects).await {
            let recoverable = e.is_recoverable();
            error!(error = %e, %trigger, recoverable, "side effect failed, resetting to Idle");
            let _ = self.events.send(ConversationEvent::AudioError {
                message: e.to_string(),
                recoverable,
            });
            self.speech.stop().await;
            if from != DeviceState::Idle {
                self.commit(from, DeviceState::Idle, trigger);
            } else {
                self.publish_snapshot();
            }
            return TransitionOutcome::Failed {
                state: DeviceState::Idle,
                message: e.to_string(),
                recoverable,
            };
        }

        let transition = self.commit(from, to, trigger);
        if to == DeviceState::Idle && trigger != Trigger::Disconnect {
            self.schedule_restart();
        }
        TransitionOutcome::Applied(transition)
    }

    async fn apply(&mut self, effects: Effects) -> Result<(), crate::audio::CaptureError> {
        if effects.stop_playback {
            self.playback.stop_playback();
        }
        match effects.capture {
            CaptureEffect::Subscribe => self.speech.start().await?,
            CaptureEffect::Unsubscribe => self.speech.stop().await,
            CaptureEffect::None => {}
        }
        Ok(())
    }

    /// Perform a state transition
    fn commit(&mut self, from: DeviceState, to: DeviceState, trigger: Trigger) -> StateTransition {
        let duration_ms = self.state_entered_at.elapsed().as_millis() as u64;
        info!(
            from = %from,
            to = %to,
            %trigger,
            duration_ms,
            "state transition"
        );

        self.state = to;
        self.state_entered_at = Instant::now();
        self.publish_snapshot();

        let transition = StateTransition {
            from,
            to,
            trigger,
            timestamp: SystemTime::now(),
        };
        let _ = self
            .events
            .send(ConversationEvent::StateChanged(transition.clone()));

        for listener in &self.listeners {
            let listener = Arc::clone(listener);
            let transition = transition.clone();
            self.dispatcher
                .dispatch(Box::new(move || listener(&transition)));
        }

        transition
    }

    fn publish_snapshot(&self) {
        let snapshot = MachineSnapshot {
            state: self.state,
            listening_mode: self.mode,
            keep_listening: self.keep_listening,
            speech_capture: self.speech.is_active(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }

    fn restart_enabled(&self) -> bool {
        self.keep_listening && self.mode != ListeningMode::Manual
    }

    fn schedule_restart(&mut self) {
        if !self.restart_enabled() {
            return;
        }
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };

        self.cancel_restart("rescheduled");
        self.restart_generation += 1;
        let generation = self.restart_generation;
        let delay = self.restart_delay;

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Command::AutoRestart { generation });
        });
        debug!(generation, delay_ms = delay.as_millis() as u64, "auto-restart scheduled");
        self.pending_restart = Some(PendingRestart { generation, task });
    }

    fn cancel_restart(&mut self, reason: &'static str) {
        if let Some(pending) = self.pending_restart.take() {
            pending.task.abort();
            debug!(generation = pending.generation, reason, "auto-restart cancelled");
        }
    }

    async fn handle_auto_restart(&mut self, generation: u64) {
        match self.pending_restart {
            Some(ref pending) if pending.generation == generation => {
                self.pending_restart = None;
            }
            _ => {
                debug!(generation, "stale auto-restart ignored");
                return;
            }
        }

        if self.state != DeviceState::Idle || !self.restart_enabled() {
            debug!(state = %self.state, "auto-restart no longer applicable");
            return;
        }

        info!("auto-restarting listening");
        if let TransitionOutcome::Failed { message, .. } =
            self.handle_trigger(Trigger::StartListening).await
        {
            warn!(%message, "auto-restart failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sim::SimulatedBackend;
    use crate::audio::{AudioFrame, FrameCallback, NativeAudioEngineGuard, SharedCaptureStream};
    use crate::config::AudioTiming;
    use crate::state::{AbortReason, InlineDispatcher};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPlayback {
        stops: AtomicUsize,
    }

    impl PlaybackControl for RecordingPlayback {
        fn stop_playback(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        backend: SimulatedBackend,
        capture: Arc<SharedCaptureStream>,
        playback: Arc<RecordingPlayback>,
        handle: ConversationHandle,
        events: broadcast::Receiver<ConversationEvent>,
        _task: JoinHandle<()>,
    }

    fn timing() -> AudioTiming {
        AudioTiming {
            native_timeout_ms: 1_000,
            teardown_backoff_ms: 50,
            restart_backoff_ms: 0,
            restart_retry_backoff_ms: 20,
        }
    }

    fn fixture(mode: ListeningMode, keep_listening: bool) -> Fixture {
        let backend = SimulatedBackend::new();
        let engine = Arc::new(NativeAudioEngineGuard::new(
            Arc::new(backend.clone()),
            timing(),
        ));
        let capture = Arc::new(SharedCaptureStream::new(
            engine,
            Arc::new(backend.clone()),
            timing(),
        ));
        let sink: FrameCallback = Arc::new(|_frame: AudioFrame| {});
        let playback = Arc::new(RecordingPlayback::default());
        let bus = crate::events::channel();
        let events = bus.subscribe();
        let config = ConversationConfig {
            listening_mode: mode,
            keep_listening,
            auto_restart_delay_ms: 200,
        };

        let (handle, task) = ConversationStateMachine::spawn(
            &config,
            SpeechCapture::new(Arc::clone(&capture), sink),
            Arc::clone(&playback) as Arc<dyn PlaybackControl>,
            Arc::new(InlineDispatcher),
            bus,
        );

        Fixture {
            backend,
            capture,
            playback,
            handle,
            events,
            _task: task,
        }
    }

    async fn send(f: &Fixture, trigger: Trigger) -> TransitionOutcome {
        f.handle.request_and_wait(trigger).await.unwrap()
    }

    fn transitions(events: &mut broadcast::Receiver<ConversationEvent>) -> Vec<(DeviceState, DeviceState)> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ConversationEvent::StateChanged(t) = event {
                seen.push((t.from, t.to));
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_initial_state() {
        let f = fixture(ListeningMode::AutoStop, false);
        assert_eq!(f.handle.state(), DeviceState::Idle);
        assert!(!f.handle.snapshot().speech_capture);
    }

    #[tokio::test]
    async fn test_connect_cycle() {
        let f = fixture(ListeningMode::AutoStop, false);
        assert!(send(&f, Trigger::Connect).await.is_applied());
        assert_eq!(f.handle.state(), DeviceState::Connecting);
        assert!(send(&f, Trigger::ConnectionEstablished).await.is_applied());
        assert_eq!(f.handle.state(), DeviceState::Idle);
    }

    #[tokio::test]
    async fn test_listening_subscribes_speech_capture() {
        let f = fixture(ListeningMode::AutoStop, false);

        send(&f, Trigger::StartListening).await;
        assert_eq!(f.handle.state(), DeviceState::Listening);
        assert!(f.capture.is_running().await);
        assert!(f.handle.snapshot().speech_capture);

        send(&f, Trigger::PlaybackStarted).await;
        assert_eq!(f.handle.state(), DeviceState::Speaking);
        assert!(!f.capture.is_running().await);

        send(&f, Trigger::PlaybackEnded).await;
        assert_eq!(f.handle.state(), DeviceState::Idle);
        assert_eq!(f.playback.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_is_ignored() {
        let mut f = fixture(ListeningMode::AutoStop, false);

        let outcome = send(&f, Trigger::PlaybackEnded).await;
        assert_eq!(
            outcome,
            TransitionOutcome::Ignored {
                state: DeviceState::Idle,
                trigger: Trigger::PlaybackEnded
            }
        );
        assert!(transitions(&mut f.events).is_empty());
    }

    #[tokio::test]
    async fn test_stop_listening_twice_is_idempotent() {
        let f = fixture(ListeningMode::AutoStop, false);
        send(&f, Trigger::StartListening).await;

        assert!(send(&f, Trigger::StopListening).await.is_applied());
        let second = send(&f, Trigger::StopListening).await;
        assert!(matches!(second, TransitionOutcome::Ignored { .. }));
        assert_eq!(f.handle.state(), DeviceState::Idle);
        assert!(!f.capture.is_running().await);
    }

    #[tokio::test]
    async fn test_requests_are_evaluated_in_order() {
        let mut f = fixture(ListeningMode::AutoStop, false);

        // fire-and-forget; each is judged against the state left by the previous
        for trigger in [
            Trigger::StartListening,
            Trigger::StartListening,
            Trigger::PlaybackStarted,
            Trigger::StopListening,
        ] {
            assert!(f.handle.request(trigger));
        }
        let last = send(&f, Trigger::PlaybackEnded).await;

        assert_eq!(last.state(), DeviceState::Idle);
        assert_eq!(
            transitions(&mut f.events),
            vec![
                (DeviceState::Idle, DeviceState::Listening),
                (DeviceState::Listening, DeviceState::Speaking),
                (DeviceState::Speaking, DeviceState::Idle),
            ]
        );
    }

    #[tokio::test]
    async fn test_racing_aborts_apply_once() {
        let f = fixture(ListeningMode::AutoStop, false);
        send(&f, Trigger::StartListening).await;
        send(&f, Trigger::PlaybackStarted).await;

        let voice = Trigger::Abort(AbortReason::VoiceInterruption);
        let (a, b) = tokio::join!(
            f.handle.request_and_wait(voice),
            f.handle.request_and_wait(voice)
        );
        let applied = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|o| o.is_applied())
            .count();

        assert_eq!(applied, 1);
        assert_eq!(f.handle.state(), DeviceState::Listening);
        assert_eq!(f.playback.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_barge_in_round_trip_with_auto_restart() {
        let f = fixture(ListeningMode::AlwaysOn, true);

        send(&f, Trigger::StartListening).await;
        send(&f, Trigger::PlaybackStarted).await;
        send(&f, Trigger::Abort(AbortReason::VoiceInterruption)).await;
        assert_eq!(f.handle.state(), DeviceState::Listening);
        assert!(f.capture.is_running().await);

        send(&f, Trigger::StopListening).await;
        assert_eq!(f.handle.state(), DeviceState::Idle);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(f.handle.state(), DeviceState::Listening);
        assert!(f.capture.is_running().await);
    }

    #[tokio::test]
    async fn test_auto_restart_waits_out_grace_delay() {
        let f = fixture(ListeningMode::AlwaysOn, true);
        let mut watch = f.handle.watch();
        send(&f, Trigger::StartListening).await;
        send(&f, Trigger::StopListening).await;
        let stopped = Instant::now();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.handle.state(), DeviceState::Idle);

        tokio::time::timeout(
            Duration::from_millis(250),
            watch.wait_for(|snapshot| snapshot.state == DeviceState::Listening),
        )
        .await
        .expect("no restart after the grace delay")
        .unwrap();
        let restarted = stopped.elapsed();
        assert!(restarted >= Duration::from_millis(200), "restarted after {restarted:?}");
        assert!(restarted < Duration::from_millis(350), "restarted after {restarted:?}");
    }

    #[tokio::test]
    async fn test_leaving_manual_mode_schedules_restart() {
        let f = fixture(ListeningMode::Manual, true);
        send(&f, Trigger::StartListening).await;
        send(&f, Trigger::StopListening).await;

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(f.handle.state(), DeviceState::Idle);

        f.handle.set_listening_mode(ListeningMode::AlwaysOn);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(f.handle.state(), DeviceState::Listening);
        assert!(f.capture.is_running().await);
    }

    #[tokio::test]
    async fn test_auto_restart_cancelled_by_keep_listening_off() {
        let f = fixture(ListeningMode::AlwaysOn, true);
        send(&f, Trigger::StartListening).await;
        send(&f, Trigger::StopListening).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        f.handle.set_keep_listening(false);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(f.handle.state(), DeviceState::Idle);
        assert!(!f.handle.snapshot().keep_listening);
    }

    #[tokio::test]
    async fn test_manual_mode_never_restarts() {
        let f = fixture(ListeningMode::Manual, true);
        send(&f, Trigger::StartListening).await;
        send(&f, Trigger::StopListening).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(f.handle.state(), DeviceState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_while_speaking() {
        let f = fixture(ListeningMode::AlwaysOn, true);
        send(&f, Trigger::StartListening).await;
        send(&f, Trigger::PlaybackStarted).await;

        let outcome = send(&f, Trigger::Disconnect).await;
        assert!(outcome.is_applied());
        assert_eq!(f.playback.stops.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(f.handle.state(), DeviceState::Idle);
        assert!(!f.capture.is_running().await);
        assert!(!f.handle.snapshot().speech_capture);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_restart() {
        let f = fixture(ListeningMode::AlwaysOn, true);
        send(&f, Trigger::Connect).await;
        // entering Idle schedules a restart
        send(&f, Trigger::ConnectionEstablished).await;
        send(&f, Trigger::Disconnect).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(f.handle.state(), DeviceState::Idle);
        assert!(!f.capture.is_running().await);
    }

    #[tokio::test]
    async fn test_disconnect_waits_for_teardown_retry() {
        let f = fixture(ListeningMode::AutoStop, false);
        send(&f, Trigger::StartListening).await;

        f.backend.fail_next_stop(1);
        assert!(f.handle.request(Trigger::StopListening));
        let outcome = send(&f, Trigger::Disconnect).await;

        assert!(outcome.is_applied());
        assert_eq!(outcome.state(), DeviceState::Idle);
        assert_eq!(f.backend.stop_calls(), 2);
        assert!(!f.capture.is_running().await);
    }

    #[tokio::test]
    async fn test_capture_failure_resets_to_idle() {
        let mut f = fixture(ListeningMode::AutoStop, false);
        f.backend.fail_next_init(1);

        let outcome = send(&f, Trigger::StartListening).await;
        match outcome {
            TransitionOutcome::Failed { state, recoverable, .. } => {
                assert_eq!(state, DeviceState::Idle);
                assert!(!recoverable);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(f.handle.state(), DeviceState::Idle);

        let mut saw_error = false;
        while let Ok(event) = f.events.try_recv() {
            saw_error |= matches!(event, ConversationEvent::AudioError { .. });
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_wake_word_from_idle_with_keep_listening() {
        let f = fixture(ListeningMode::AutoStop, false);
        let wake = Trigger::Abort(AbortReason::WakeWordDetected);

        assert!(!send(&f, wake).await.is_applied());

        f.handle.set_keep_listening(true);
        assert!(send(&f, wake).await.is_applied());
        assert_eq!(f.handle.state(), DeviceState::Listening);
    }

    #[tokio::test]
    async fn test_transition_listener() {
        let f = fixture(ListeningMode::AutoStop, false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        f.handle.on_transition(Arc::new(move |t: &StateTransition| {
            sink.lock().unwrap().push(t.trigger);
        }));

        send(&f, Trigger::StartListening).await;
        send(&f, Trigger::Abort(AbortReason::KeyboardInterruption)).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Trigger::StartListening,
                Trigger::Abort(AbortReason::KeyboardInterruption)
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_releases_capture() {
        let f = fixture(ListeningMode::AutoStop, false);
        send(&f, Trigger::StartListening).await;

        f.handle.shutdown();
        f._task.await.unwrap();

        assert!(!f.capture.is_running().await);
        assert!(matches!(
            f.handle.request_and_wait(Trigger::StopListening).await,
            Err(ConversationError::Closed)
        ));
    }
}
