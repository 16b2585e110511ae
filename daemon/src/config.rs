//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::state::ListeningMode;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Substring of the input device name; the system default when unset
    pub input_device: Option<String>,

    pub audio: AudioTiming,
    pub conversation: ConversationConfig,
    pub interrupts: InterruptConfig,
    pub recovery: RecoveryConfig,
    pub vad: VadConfig,
}

/// Timeouts and backoffs around native audio calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTiming {
    /// Hard timeout for any native init/open/stop/terminate call
    pub native_timeout_ms: u64,
    /// Wait between the two teardown attempts
    pub teardown_backoff_ms: u64,
    /// Minimum gap between stopping the device and opening it again
    pub restart_backoff_ms: u64,
    /// Wait before the single retry of a failed open
    pub restart_retry_backoff_ms: u64,
}

impl Default for AudioTiming {
    fn default() -> Self {
        Self {
            native_timeout_ms: 5_000,
            teardown_backoff_ms: 500,
            restart_backoff_ms: 150,
            restart_retry_backoff_ms: 300,
        }
    }
}

impl AudioTiming {
    pub fn native_timeout(&self) -> Duration {
        Duration::from_millis(self.native_timeout_ms)
    }

    pub fn teardown_backoff(&self) -> Duration {
        Duration::from_millis(self.teardown_backoff_ms)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    pub fn restart_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_retry_backoff_ms)
    }
}

/// Conversation state machine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub listening_mode: ListeningMode,
    pub keep_listening: bool,
    /// Grace delay before an automatic `StartListening` from Idle
    pub auto_restart_delay_ms: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            listening_mode: ListeningMode::AutoStop,
            keep_listening: false,
            auto_restart_delay_ms: 200,
        }
    }
}

impl ConversationConfig {
    pub fn auto_restart_delay(&self) -> Duration {
        Duration::from_millis(self.auto_restart_delay_ms)
    }
}

/// Interrupt arbitration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptConfig {
    /// Window in which competing signals are merged and ranked
    pub dispatch_tick_ms: u64,
    /// Minimum gap between two accepted signals from one source
    pub min_signal_interval_ms: u64,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            dispatch_tick_ms: 20,
            min_signal_interval_ms: 150,
        }
    }
}

impl InterruptConfig {
    pub fn dispatch_tick(&self) -> Duration {
        Duration::from_millis(self.dispatch_tick_ms)
    }

    pub fn min_signal_interval(&self) -> Duration {
        Duration::from_millis(self.min_signal_interval_ms)
    }
}

/// Recovery monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub check_interval_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: 5_000,
        }
    }
}

impl RecoveryConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Energy voice-activity adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    pub enabled: bool,
    /// RMS threshold on samples normalised to [-1, 1]
    pub threshold: f32,
    /// Consecutive speech frames needed before reporting
    pub min_speech_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.05,
            min_speech_frames: 5,
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("parley");

        let socket_path = match std::env::var("PARLEY_SOCKET") {
            Ok(path) => PathBuf::from(path),
            Err(_) => data_dir.join("daemon.sock"),
        };

        let mut config = Self {
            socket_path,
            data_dir,
            input_device: None,
            audio: AudioTiming::default(),
            conversation: ConversationConfig::default(),
            interrupts: InterruptConfig::default(),
            recovery: RecoveryConfig::default(),
            vad: VadConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `PARLEY_*` overrides from the given lookup
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(mode) = var("PARLEY_LISTENING_MODE") {
            self.conversation.listening_mode = parse_listening_mode(&mode)?;
        }
        if let Some(flag) = var("PARLEY_KEEP_LISTENING") {
            self.conversation.keep_listening = parse_bool("PARLEY_KEEP_LISTENING", &flag)?;
        }
        if let Some(threshold) = var("PARLEY_VAD_THRESHOLD") {
            self.vad.threshold = threshold
                .trim()
                .parse()
                .with_context(|| format!("invalid PARLEY_VAD_THRESHOLD: {threshold}"))?;
        }
        if let Some(device) = var("PARLEY_INPUT_DEVICE") {
            let device = device.trim();
            self.input_device = (!device.is_empty()).then(|| device.to_string());
        }
        if let Some(flag) = var("PARLEY_RECOVERY") {
            self.recovery.enabled = parse_bool("PARLEY_RECOVERY", &flag)?;
        }
        Ok(())
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn parse_listening_mode(value: &str) -> Result<ListeningMode> {
    match value.trim().to_ascii_lowercase().replace(&['-', '_'][..], "").as_str() {
        "alwayson" | "realtime" => Ok(ListeningMode::AlwaysOn),
        "autostop" => Ok(ListeningMode::AutoStop),
        "manual" => Ok(ListeningMode::Manual),
        other => bail!("invalid PARLEY_LISTENING_MODE: {other}"),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("invalid {key}: {other}"),
    }
}
