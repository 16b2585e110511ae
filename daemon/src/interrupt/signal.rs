//! Interrupt signals and how competing ones are resolved

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::state::AbortReason;

/// Where an interrupt came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    WakeWord,
    VoiceActivity,
    Hotkey,
    /// Explicit UI command
    Manual,
}

impl SignalSource {
    /// Higher wins when signals compete within one tick
    pub fn priority(self) -> u8 {
        match self {
            SignalSource::Hotkey | SignalSource::Manual => 3,
            SignalSource::WakeWord => 2,
            SignalSource::VoiceActivity => 1,
        }
    }

    pub fn abort_reason(self) -> AbortReason {
        match self {
            SignalSource::WakeWord => AbortReason::WakeWordDetected,
            SignalSource::VoiceActivity => AbortReason::VoiceInterruption,
            SignalSource::Hotkey => AbortReason::KeyboardInterruption,
            SignalSource::Manual => AbortReason::UserInterruption,
        }
    }
}

/// One interrupt as reported by a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptSignal {
    pub source: SignalSource,
    pub at: Instant,
}

impl InterruptSignal {
    pub fn now(source: SignalSource) -> Self {
        Self {
            source,
            at: Instant::now(),
        }
    }
}

/// Pick the signal that wins a tick: highest priority, earliest on a tie.
/// Returns the winner and how many signals were dropped.
pub(crate) fn resolve(batch: &[InterruptSignal]) -> Option<(InterruptSignal, usize)> {
    let winner = batch.iter().copied().reduce(|best, signal| {
        let (p, q) = (signal.source.priority(), best.source.priority());
        if p > q || (p == q && signal.at < best.at) {
            signal
        } else {
            best
        }
    })?;
    Some((winner, batch.len() - 1))
}

/// Minimum spacing between accepted signals of the same source
pub(crate) struct RateLimiter {
    min_interval: Duration,
    last_accepted: HashMap<SignalSource, Instant>,
}

impl RateLimiter {
    pub(crate) fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: HashMap::new(),
        }
    }

    pub(crate) fn accept(&mut self, signal: &InterruptSignal) -> bool {
        if let Some(last) = self.last_accepted.get(&signal.source) {
            if signal.at.saturating_duration_since(*last) < self.min_interval {
                return false;
            }
        }
        self.last_accepted.insert(signal.source, signal.at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, ms: u64, source: SignalSource) -> InterruptSignal {
        InterruptSignal {
            source,
            at: base + Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_user_action_beats_wake_word() {
        let base = Instant::now();
        let batch = [
            at(base, 0, SignalSource::WakeWord),
            at(base, 5, SignalSource::Hotkey),
        ];
        let (winner, dropped) = resolve(&batch).unwrap();
        assert_eq!(winner.source, SignalSource::Hotkey);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_wake_word_beats_voice_activity() {
        let base = Instant::now();
        let batch = [
            at(base, 0, SignalSource::VoiceActivity),
            at(base, 3, SignalSource::WakeWord),
            at(base, 6, SignalSource::VoiceActivity),
        ];
        let (winner, dropped) = resolve(&batch).unwrap();
        assert_eq!(winner.source, SignalSource::WakeWord);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_tie_goes_to_earliest() {
        let base = Instant::now();
        let batch = [
            at(base, 4, SignalSource::Manual),
            at(base, 1, SignalSource::Hotkey),
        ];
        assert_eq!(resolve(&batch).unwrap().0.source, SignalSource::Hotkey);
    }

    #[test]
    fn test_empty_batch() {
        assert!(resolve(&[]).is_none());
    }

    #[test]
    fn test_rate_limit_per_source() {
        let base = Instant::now();
        let mut limiter = RateLimiter::new(Duration::from_millis(150));

        assert!(limiter.accept(&at(base, 0, SignalSource::VoiceActivity)));
        assert!(!limiter.accept(&at(base, 100, SignalSource::VoiceActivity)));
        // other sources are unaffected
        assert!(limiter.accept(&at(base, 100, SignalSource::Hotkey)));
        assert!(limiter.accept(&at(base, 150, SignalSource::VoiceActivity)));
        assert!(!limiter.accept(&at(base, 200, SignalSource::VoiceActivity)));
    }

    #[test]
    fn test_abort_reasons() {
        assert_eq!(
            SignalSource::Hotkey.abort_reason(),
            AbortReason::KeyboardInterruption
        );
        assert_eq!(
            SignalSource::Manual.abort_reason(),
            AbortReason::UserInterruption
        );
    }
}
