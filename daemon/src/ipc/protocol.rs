//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::audio::{CaptureStatus, EngineStatus};
use crate::events::ConversationEvent;
use crate::state::{ListeningMode, MachineSnapshot, TransitionOutcome, Trigger};

/// Larger messages close the connection
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from the session layer or UI to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Subscribe to conversation events
    Subscribe,

    /// Session event (connect, playback started, ...) for the state machine
    Trigger { trigger: Trigger },

    /// Manual interruption from the UI
    Interrupt,

    /// Detection from a wake-word engine running outside the daemon
    WakeWord,

    /// Hold or release wake-word detection
    SetWakeWordPaused { paused: bool },

    SetKeepListening { enabled: bool },

    SetListeningMode { mode: ListeningMode },
}

/// Responses from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Subscription confirmed
    Subscribed,

    /// How a trigger request was handled
    Transition { outcome: TransitionOutcome },

    /// Request queued; its effect shows up as events
    Accepted,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification for subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "event", rename_all = "snake_case")]
pub enum Notification {
    Event(ConversationEvent),
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub conversation: MachineSnapshot,
    pub capture: CaptureStatus,
    pub engine: EngineStatus,
    /// Frame deliveries lost to a panicking capture subscriber
    pub dropped_frames: u64,
    /// Frames handed to the speech pipeline
    pub speech_frames: u64,
    pub hotkey_registered: bool,
    pub uptime_secs: u64,
}

/// Write a length-prefixed JSON message
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;
    writer.flush().await?;

    Ok(())
}

/// Outcome of reading one frame
#[derive(Debug)]
pub enum Frame {
    Message(Vec<u8>),
    /// Peer closed the connection
    Closed,
    TooLarge(usize),
}

/// Read one length-prefixed message body
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(Frame::Closed),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        return Ok(Frame::TooLarge(len));
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Frame::Message(msg_buf))
}
