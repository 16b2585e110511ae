//! Recovery monitor
//!
//! Periodically compares what the state machine believes with what the
//! capture stream is actually doing. When the two disagree on two checks in
//! a row, audio is torn down completely, the machine is sent back to Idle
//! and long-lived detectors are resubscribed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::audio::{CaptureError, SharedCaptureStream};
use crate::config::RecoveryConfig;
use crate::events::ConversationEvent;
use crate::state::{ConversationError, ConversationHandle, DeviceState, Trigger};

/// Consecutive failed recoveries before the failure is surfaced
const FAILURES_BEFORE_REPORT: u32 = 2;

pub type ReinitFuture = Pin<Box<dyn Future<Output = Result<(), CaptureError>> + Send>>;

/// Re-establishes long-lived capture subscriptions after a forced cleanup
pub type ReinitHook = Arc<dyn Fn() -> ReinitFuture + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("capture cleanup already in progress")]
    CleanupBusy,

    #[error(transparent)]
    Conversation(#[from] ConversationError),

    #[error("reinitialization failed: {0}")]
    Reinit(#[source] CaptureError),
}

pub struct RecoveryMonitor {
    capture: Arc<SharedCaptureStream>,
    conversation: ConversationHandle,
    events: broadcast::Sender<ConversationEvent>,
    reinit: Option<ReinitHook>,
    interval: Duration,
    suspect: bool,
    failures: u32,
    recoveries: u64,
}

impl RecoveryMonitor {
    pub fn new(
        config: &RecoveryConfig,
        capture: Arc<SharedCaptureStream>,
        conversation: ConversationHandle,
        events: broadcast::Sender<ConversationEvent>,
    ) -> Self {
        Self {
            capture,
            conversation,
            events,
            reinit: None,
            interval: config.check_interval(),
            suspect: false,
            failures: 0,
            recoveries: 0,
        }
    }

    pub fn with_reinit(mut self, hook: ReinitHook) -> Self {
        self.reinit = Some(hook);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        info!(interval_ms = self.interval.as_millis() as u64, "recovery monitor started");
        loop {
            ticker.tick().await;
            self.check().await;
        }
    }

    /// Describe the mismatch between machine and hardware, if any
    async fn divergence(&self) -> Option<&'static str> {
        let state = self.conversation.state();
        let status = self.capture.status().await;

        if state == DeviceState::Listening && !status.running {
            Some("listening without a running capture stream")
        } else if status.running && status.subscribers == 0 {
            Some("capture stream running with no subscribers")
        } else {
            None
        }
    }

    async fn check(&mut self) {
        let Some(reason) = self.divergence().await else {
            self.suspect = false;
            return;
        };

        // a transition may be mid-flight; act only if it persists
        if !self.suspect {
            debug!(reason, "possible audio divergence, checking again next tick");
            self.suspect = true;
            return;
        }
        self.suspect = false;

        warn!(reason, "audio state diverged, recovering");
        match self.recover().await {
            Ok(()) => {
                self.failures = 0;
                self.recoveries += 1;
                info!(reason, attempt = self.recoveries, "audio recovered");
                let _ = self.events.send(ConversationEvent::RecoveryPerformed {
                    attempt: self.recoveries,
                    reason: reason.to_string(),
                });
            }
            Err(e) => {
                self.failures += 1;
                if self.failures >= FAILURES_BEFORE_REPORT {
                    error!(error = %e, failures = self.failures, "audio recovery failed");
                    let _ = self.events.send(ConversationEvent::RecoveryFailed {
                        message: e.to_string(),
                    });
                    self.failures = 0;
                } else {
                    warn!(error = %e, "audio recovery attempt failed");
                }
            }
        }
    }

    async fn recover(&self) -> Result<(), RecoveryError> {
        if !self.capture.force_cleanup().await {
            return Err(RecoveryError::CleanupBusy);
        }
        self.conversation
            .request_and_wait(Trigger::Disconnect)
            .await?;
        if let Some(reinit) = &self.reinit {
            reinit().await.map_err(RecoveryError::Reinit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BackendError;
    use crate::config::ConversationConfig;
    use crate::testing::{core, noop_sink};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        capture: Arc<SharedCaptureStream>,
        conversation: ConversationHandle,
        bus: broadcast::Sender<ConversationEvent>,
        events: broadcast::Receiver<ConversationEvent>,
    }

    fn fixture() -> Fixture {
        let core = core(&ConversationConfig::default());
        let events = core.bus.subscribe();
        Fixture {
            capture: core.capture,
            conversation: core.conversation,
            bus: core.bus,
            events,
        }
    }

    fn monitor(f: &Fixture) -> RecoveryMonitor {
        let config = RecoveryConfig {
            enabled: true,
            check_interval_ms: 30,
        };
        RecoveryMonitor::new(
            &config,
            Arc::clone(&f.capture),
            f.conversation.clone(),
            f.bus.clone(),
        )
    }

    fn recovery_events(events: &mut broadcast::Receiver<ConversationEvent>) -> (usize, usize) {
        let (mut performed, mut failed) = (0, 0);
        while let Ok(event) = events.try_recv() {
            match event {
                ConversationEvent::RecoveryPerformed { .. } => performed += 1,
                ConversationEvent::RecoveryFailed { .. } => failed += 1,
                _ => {}
            }
        }
        (performed, failed)
    }

    /// Listening in the machine, but the hardware was torn down underneath it
    async fn diverge(f: &Fixture) {
        f.conversation
            .request_and_wait(Trigger::StartListening)
            .await
            .unwrap();
        assert!(f.capture.force_cleanup().await);
        assert_eq!(f.conversation.state(), DeviceState::Listening);
    }

    #[tokio::test]
    async fn test_healthy_system_is_left_alone() {
        let mut f = fixture();
        f.conversation
            .request_and_wait(Trigger::StartListening)
            .await
            .unwrap();
        let task = monitor(&f).spawn();

        tokio::time::sleep(Duration::from_millis(200)).await;
        task.abort();

        assert_eq!(f.conversation.state(), DeviceState::Listening);
        assert_eq!(recovery_events(&mut f.events), (0, 0));
    }

    #[tokio::test]
    async fn test_recovers_listening_without_stream() {
        let mut f = fixture();
        let reinits = Arc::new(AtomicUsize::new(0));
        let hook_capture = Arc::clone(&f.capture);
        let hook_count = Arc::clone(&reinits);
        let hook: ReinitHook = Arc::new(move || {
            let capture = Arc::clone(&hook_capture);
            let count = Arc::clone(&hook_count);
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                capture.subscribe("wake_word", noop_sink()).await.map(|_| ())
            }) as ReinitFuture
        });

        diverge(&f).await;
        let task = monitor(&f).with_reinit(hook).spawn();

        tokio::time::sleep(Duration::from_millis(300)).await;
        task.abort();

        assert_eq!(f.conversation.state(), DeviceState::Idle);
        assert_eq!(reinits.load(Ordering::SeqCst), 1);
        let status = f.capture.status().await;
        assert!(status.running);
        assert_eq!(status.subscribers, 1);
        assert_eq!(recovery_events(&mut f.events), (1, 0));
    }

    #[tokio::test]
    async fn test_recovery_events_count_attempts() {
        let mut f = fixture();
        let task = monitor(&f).spawn();

        for expected in 1..=2u64 {
            diverge(&f).await;
            let event = tokio::time::timeout(Duration::from_millis(500), async {
                loop {
                    if let Ok(ConversationEvent::RecoveryPerformed { attempt, reason }) =
                        f.events.recv().await
                    {
                        break (attempt, reason);
                    }
                }
            })
            .await
            .unwrap();
            assert_eq!(
                event,
                (expected, "listening without a running capture stream".to_string())
            );
        }
        task.abort();
    }

    #[tokio::test]
    async fn test_second_consecutive_failure_is_reported() {
        let mut f = fixture();
        let hook: ReinitHook = Arc::new(|| {
            Box::pin(async { Err(CaptureError::Open(BackendError::other("device gone"))) })
                as ReinitFuture
        });
        let task = monitor(&f).with_reinit(hook).spawn();

        diverge(&f).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.conversation.state(), DeviceState::Idle);
        assert_eq!(recovery_events(&mut f.events), (0, 0));

        diverge(&f).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        task.abort();

        assert_eq!(recovery_events(&mut f.events), (0, 1));
    }
}
