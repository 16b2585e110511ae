//! Energy-based voice activity detection, a plain RMS threshold

use super::VoiceDetector;

/// Speech when the RMS of a frame, normalised to [-1, 1], is strictly
/// above the threshold
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

/// RMS of an i16 frame scaled to [-1, 1]
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 / 32768.0;
            x * x
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

impl VoiceDetector for EnergyVad {
    fn is_speech(&mut self, samples: &[i16]) -> bool {
        !samples.is_empty() && rms(samples) > self.threshold
    }

    fn name(&self) -> &str {
        "energy"
    }
}
