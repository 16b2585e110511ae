//! parley-daemon: conversation core of a voice assistant
//!
//! Runs as a background agent and provides:
//! - Exclusive ownership of the microphone, shared by speech capture and
//!   voice activity detection
//! - The conversation state machine
//! - Interrupts from voice activity, the global hotkey and the UI
//! - IPC for the session layer and the menu bar app. Wake-word detection
//!   runs outside the daemon and reports over IPC.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use parley::audio::{AudioEngine, InputDevice, NativeAudioEngineGuard, SharedCaptureStream};
use parley::bridge::{EventBusPlayback, SpeechSink};
use parley::config::Config;
use parley::hotkey::HotkeyListener;
use parley::interrupt::InterruptCoordinator;
use parley::ipc::{Server, ServerContext};
use parley::lifecycle::ShutdownSignal;
use parley::recovery::{RecoveryMonitor, ReinitFuture, ReinitHook};
use parley::state::{ConversationStateMachine, InlineDispatcher, SpeechCapture};
use parley::vad::{EnergyVad, VoiceActivityMonitor};

#[cfg(feature = "cpal-backend")]
fn audio_backend(config: &Config) -> (Arc<dyn AudioEngine>, Arc<dyn InputDevice>) {
    use parley::audio::cpal_backend::{CpalEngine, CpalInput};

    info!(device = ?config.input_device, "using cpal audio backend");
    (
        Arc::new(CpalEngine),
        Arc::new(CpalInput::new(config.input_device.clone())),
    )
}

#[cfg(not(feature = "cpal-backend"))]
fn audio_backend(_config: &Config) -> (Arc<dyn AudioEngine>, Arc<dyn InputDevice>) {
    use parley::audio::sim::SimulatedBackend;

    warn!("built without cpal-backend, capturing from a simulated silent microphone");
    let backend = SimulatedBackend::with_frame_clock();
    (Arc::new(backend.clone()), Arc::new(backend))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "parley-daemon starting");

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, mode = ?config.conversation.listening_mode, "configuration loaded");

    let shutdown = ShutdownSignal::new();
    let events = parley::events::channel();

    // Audio resources: one engine guard, one capture stream
    let (engine_backend, input) = audio_backend(&config);
    let engine = Arc::new(NativeAudioEngineGuard::new(engine_backend, config.audio.clone()));
    let capture = Arc::new(SharedCaptureStream::new(
        Arc::clone(&engine),
        input,
        config.audio.clone(),
    ));

    // Conversation state machine
    let speech = SpeechSink::new();
    let (conversation, machine_task) = ConversationStateMachine::spawn(
        &config.conversation,
        SpeechCapture::new(Arc::clone(&capture), speech.callback()),
        Arc::new(EventBusPlayback::new(events.clone())),
        Arc::new(InlineDispatcher),
        events.clone(),
    );

    // Interrupt sources
    let (interrupts, interrupt_task) = InterruptCoordinator::spawn(
        &config.interrupts,
        conversation.clone(),
        Arc::clone(&capture),
        events.clone(),
    );

    let vad = if config.vad.enabled {
        let (monitor, task) = VoiceActivityMonitor::spawn(
            &config.vad,
            Box::new(EnergyVad::new(config.vad.threshold)),
            interrupts.clone(),
        );
        let monitor = Arc::new(monitor);
        match monitor.attach(&capture).await {
            Ok(id) => info!(subscription = %id, "voice activity detection attached"),
            Err(e) => error!(error = %e, "failed to attach voice activity detection"),
        }
        Some((monitor, task))
    } else {
        info!("voice activity detection disabled");
        None
    };

    let hotkey_listener = HotkeyListener::new(interrupts.clone());
    let hotkey_registered = match hotkey_listener.start() {
        Ok(()) => {
            info!("hotkey listener started");
            true
        }
        Err(e) => {
            error!(error = %e, "failed to start hotkey listener");
            warn!("continuing without hotkey support - check Accessibility permissions");
            false
        }
    };

    // Watchdog
    let recovery_task = if config.recovery.enabled {
        let mut monitor = RecoveryMonitor::new(
            &config.recovery,
            Arc::clone(&capture),
            conversation.clone(),
            events.clone(),
        );
        if let Some((vad_monitor, _)) = &vad {
            let vad_monitor = Arc::clone(vad_monitor);
            let capture = Arc::clone(&capture);
            let hook: ReinitHook = Arc::new(move || {
                let vad_monitor = Arc::clone(&vad_monitor);
                let capture = Arc::clone(&capture);
                Box::pin(async move { vad_monitor.attach(&capture).await.map(|_| ()) })
                    as ReinitFuture
            });
            monitor = monitor.with_reinit(hook);
        }
        Some(monitor.spawn())
    } else {
        info!("recovery monitor disabled");
        None
    };

    // IPC
    let context = ServerContext::new(
        conversation.clone(),
        interrupts.clone(),
        Arc::clone(&capture),
        Arc::clone(&engine),
        events.clone(),
    )
    .with_speech_sink(speech.clone());
    context
        .hotkey_registered
        .store(hotkey_registered, Ordering::Relaxed);
    let server = Server::new(&config.socket_path, Arc::new(context))?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "IPC server error");
            }
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");

    hotkey_listener.stop();
    server.shutdown().await;
    if let Some(task) = recovery_task {
        task.abort();
    }

    interrupts.shutdown();
    if let Err(e) = interrupt_task.await {
        warn!(error = %e, "interrupt coordinator task failed");
    }

    // releases the speech subscription
    conversation.shutdown();
    if let Err(e) = machine_task.await {
        warn!(error = %e, "state machine task failed");
    }

    if let Some((_, task)) = vad {
        task.abort();
    }
    // remaining detector subscriptions, stream and engine
    capture.force_cleanup().await;

    info!(
        speech_frames = speech.frames(),
        dropped_frames = capture.dropped_frames(),
        "parley-daemon stopped"
    );

    Ok(())
}
