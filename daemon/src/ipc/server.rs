//! Unix domain socket server for IPC
//!
//! Provides request-response communication and pushes conversation events
//! to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::audio::{NativeAudioEngineGuard, SharedCaptureStream};
use crate::bridge::SpeechSink;
use crate::events::ConversationEvent;
use crate::interrupt::{InterruptHandle, SignalSource};
use crate::state::ConversationHandle;

use super::protocol::{
    read_frame, write_message, DaemonStatus, Frame, Notification, Request, Response,
};

/// Everything a client request can reach
pub struct ServerContext {
    pub conversation: ConversationHandle,
    pub interrupts: InterruptHandle,
    pub capture: Arc<SharedCaptureStream>,
    pub engine: Arc<NativeAudioEngineGuard>,
    pub events: broadcast::Sender<ConversationEvent>,
    pub speech: SpeechSink,
    pub hotkey_registered: AtomicBool,
    pub start_time: Instant,
}

impl ServerContext {
    pub fn new(
        conversation: ConversationHandle,
        interrupts: InterruptHandle,
        capture: Arc<SharedCaptureStream>,
        engine: Arc<NativeAudioEngineGuard>,
        events: broadcast::Sender<ConversationEvent>,
    ) -> Self {
        Self {
            conversation,
            interrupts,
            capture,
            engine,
            events,
            speech: SpeechSink::new(),
            hotkey_registered: AtomicBool::new(false),
            start_time: Instant::now(),
        }
    }

    /// Report frames forwarded to this sink in the status
    pub fn with_speech_sink(mut self, speech: SpeechSink) -> Self {
        self.speech = speech;
        self
    }

    pub async fn status(&self) -> DaemonStatus {
        DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            conversation: self.conversation.snapshot(),
            capture: self.capture.status().await,
            engine: self.engine.status().await,
            dropped_frames: self.capture.dropped_frames(),
            speech_frames: self.speech.frames(),
            hotkey_registered: self.hotkey_registered.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Process a request and return a response. For `Subscribe` the
    /// connection attaches the event receiver itself.
    async fn process_request(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => Response::Status(self.status().await),

            Request::Subscribe => Response::Subscribed,

            Request::Trigger { trigger } => {
                match self.conversation.request_and_wait(trigger).await {
                    Ok(outcome) => Response::Transition { outcome },
                    Err(e) => Response::error("unavailable", e.to_string()),
                }
            }

            Request::Interrupt => {
                if self.interrupts.report_now(SignalSource::Manual) {
                    Response::Accepted
                } else {
                    Response::error("unavailable", "interrupt coordinator is not running")
                }
            }

            Request::WakeWord => {
                if self.interrupts.report_now(SignalSource::WakeWord) {
                    Response::Accepted
                } else {
                    Response::error("unavailable", "interrupt coordinator is not running")
                }
            }

            Request::SetWakeWordPaused { paused } => {
                let sent = if paused {
                    self.interrupts.pause_wake_word()
                } else {
                    self.interrupts.resume_wake_word()
                };
                if sent {
                    info!(paused, "wake word pause set via IPC");
                    Response::Accepted
                } else {
                    Response::error("unavailable", "interrupt coordinator is not running")
                }
            }

            Request::SetKeepListening { enabled } => {
                if self.conversation.set_keep_listening(enabled) {
                    info!(enabled, "keep listening set via IPC");
                    Response::Accepted
                } else {
                    Response::error("unavailable", "state machine is not running")
                }
            }

            Request::SetListeningMode { mode } => {
                if self.conversation.set_listening_mode(mode) {
                    info!(?mode, "listening mode set via IPC");
                    Response::Accepted
                } else {
                    Response::error("unavailable", "state machine is not running")
                }
            }
        }
    }
}

enum Incoming {
    Request(Request),
    Malformed(String),
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    context: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    pub fn new(socket_path: &Path, context: Arc<ServerContext>) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // owner-only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            context,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = Arc::clone(&self.context);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(error = %e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(error = %e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Parse frames off the socket until it closes
async fn read_requests(mut reader: OwnedReadHalf, tx: mpsc::Sender<Incoming>) -> Result<()> {
    loop {
        let body = match read_frame(&mut reader).await? {
            Frame::Message(body) => body,
            Frame::Closed => {
                debug!("client disconnected");
                return Ok(());
            }
            Frame::TooLarge(len) => {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }
        };

        let incoming = match serde_json::from_slice::<Request>(&body) {
            Ok(request) => Incoming::Request(request),
            Err(e) => Incoming::Malformed(e.to_string()),
        };
        if tx.send(incoming).await.is_err() {
            return Ok(());
        }
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<ConversationEvent>>,
) -> Result<ConversationEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle a single client connection
async fn handle_client(stream: UnixStream, context: Arc<ServerContext>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (request_tx, request_rx) = mpsc::channel(16);
    let reader_task = tokio::spawn(read_requests(reader, request_tx));

    let served = serve(&mut writer, request_rx, &context).await;
    if served.is_err() {
        reader_task.abort();
        return served;
    }

    match reader_task.await {
        Ok(result) => result,
        Err(e) => Err(e.into()),
    }
}

async fn serve(
    writer: &mut OwnedWriteHalf,
    mut requests: mpsc::Receiver<Incoming>,
    context: &ServerContext,
) -> Result<()> {
    let mut events = None;

    loop {
        tokio::select! {
            incoming = requests.recv() => {
                let response = match incoming {
                    Some(Incoming::Request(request)) => {
                        debug!(?request, "received request");
                        if matches!(request, Request::Subscribe) && events.is_none() {
                            events = Some(context.events.subscribe());
                            debug!("client subscribed to notifications");
                        }
                        context.process_request(request).await
                    }
                    Some(Incoming::Malformed(message)) => {
                        warn!(%message, "failed to parse request");
                        Response::error("invalid_request", message)
                    }
                    None => return Ok(()),
                };
                write_message(writer, &response).await?;
            }
            event = next_event(&mut events) => match event {
                Ok(event) => write_message(writer, &Notification::Event(event)).await?,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => events = None,
            },
        }
    }
}
