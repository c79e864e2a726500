//! Energy-based wake detection
//!
//! The headless front-end has no hotword model; sustained voice energy is
//! the wake signal. A chunk whose peak amplitude clears the threshold
//! counts as active; enough consecutive active chunks trigger a wake.

use crate::asr::peak_amplitude;
use crate::config::WakeConfig;

/// Detects sustained voice energy in the idle capture stream
#[derive(Debug)]
pub struct WakeDetector {
    threshold: i32,
    min_frames: usize,
    active_run: usize,
}

impl WakeDetector {
    /// Create a detector from wake parameters.
    #[must_use]
    pub const fn new(config: &WakeConfig) -> Self {
        Self {
            threshold: config.energy_threshold,
            min_frames: config.min_active_frames,
            active_run: 0,
        }
    }

    /// Process one PCM chunk; returns true when the wake triggers. The
    /// detector resets itself after triggering.
    pub fn feed(&mut self, pcm: &[u8]) -> bool {
        if peak_amplitude(pcm) > self.threshold {
            self.active_run += 1;
            tracing::trace!(run = self.active_run, "active frame");
            if self.active_run >= self.min_frames {
                tracing::debug!(frames = self.active_run, "wake triggered");
                self.reset();
                return true;
            }
        } else {
            self.active_run = 0;
        }
        false
    }

    /// Forget any partial run of active frames.
    pub fn reset(&mut self) {
        self.active_run = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> WakeDetector {
        WakeDetector::new(&WakeConfig {
            energy_threshold: 1000,
            min_active_frames: 3,
        })
    }

    fn chunk(amplitude: i16) -> Vec<u8> {
        amplitude.to_le_bytes().repeat(160)
    }

    #[test]
    fn sustained_energy_triggers() {
        let mut wake = detector();
        assert!(!wake.feed(&chunk(5000)));
        assert!(!wake.feed(&chunk(5000)));
        assert!(wake.feed(&chunk(5000)));
    }

    #[test]
    fn interrupted_run_does_not_trigger() {
        let mut wake = detector();
        assert!(!wake.feed(&chunk(5000)));
        assert!(!wake.feed(&chunk(0)));
        assert!(!wake.feed(&chunk(5000)));
        assert!(!wake.feed(&chunk(5000)));
        assert!(wake.feed(&chunk(5000)));
    }

    #[test]
    fn quiet_audio_never_triggers() {
        let mut wake = detector();
        for _ in 0..100 {
            assert!(!wake.feed(&chunk(500)));
        }
    }

    #[test]
    fn detector_resets_after_triggering() {
        let mut wake = detector();
        wake.feed(&chunk(5000));
        wake.feed(&chunk(5000));
        assert!(wake.feed(&chunk(5000)));
        assert!(!wake.feed(&chunk(5000)));
    }
}
