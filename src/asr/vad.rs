//! Voice activity gating for the upload side of a recognition session
//!
//! Termination policy: silence before the first voiced chunk never ends the
//! upload; once voice has been heard, a configurable stretch of silence
//! does.

use std::time::{Duration, Instant};

/// Peak absolute amplitude of a little-endian 16-bit PCM chunk.
#[must_use]
pub fn peak_amplitude(pcm: &[u8]) -> i32 {
    pcm.chunks_exact(2)
        .map(|pair| i32::from(i16::from_le_bytes([pair[0], pair[1]])).abs())
        .max()
        .unwrap_or(0)
}

/// Tracks voice activity across capture chunks and decides when the
/// speaker has finished.
#[derive(Debug)]
pub struct SilenceGate {
    threshold: i32,
    timeout: Duration,
    voice_seen: bool,
    last_voice: Option<Instant>,
}

impl SilenceGate {
    /// Create a gate with the given amplitude threshold and silence window.
    #[must_use]
    pub const fn new(threshold: i32, timeout: Duration) -> Self {
        Self {
            threshold,
            timeout,
            voice_seen: false,
            last_voice: None,
        }
    }

    /// Feed one chunk; returns true when the utterance should end.
    pub fn observe(&mut self, pcm: &[u8]) -> bool {
        self.observe_at(peak_amplitude(pcm), Instant::now())
    }

    /// Whether any voiced chunk has been observed yet.
    #[must_use]
    pub const fn voice_seen(&self) -> bool {
        self.voice_seen
    }

    fn observe_at(&mut self, peak: i32, now: Instant) -> bool {
        if peak > self.threshold {
            self.voice_seen = true;
            self.last_voice = Some(now);
            return false;
        }
        match self.last_voice {
            Some(last) if self.voice_seen => now.duration_since(last) >= self.timeout,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud() -> i32 {
        5000
    }

    #[test]
    fn peak_of_silence_is_zero() {
        assert_eq!(peak_amplitude(&[0, 0, 0, 0]), 0);
    }

    #[test]
    fn peak_handles_negative_samples() {
        let sample = (-12_345i16).to_le_bytes();
        assert_eq!(peak_amplitude(&sample), 12_345);
    }

    #[test]
    fn silence_before_speech_never_terminates() {
        let mut gate = SilenceGate::new(1000, Duration::from_millis(100));
        let start = Instant::now();
        for i in 0..100 {
            assert!(!gate.observe_at(0, start + Duration::from_secs(i)));
        }
        assert!(!gate.voice_seen());
    }

    #[test]
    fn silence_after_speech_terminates_after_timeout() {
        let mut gate = SilenceGate::new(1000, Duration::from_millis(1500));
        let start = Instant::now();
        assert!(!gate.observe_at(loud(), start));
        assert!(gate.voice_seen());
        assert!(!gate.observe_at(0, start + Duration::from_millis(1000)));
        assert!(gate.observe_at(0, start + Duration::from_millis(1500)));
    }

    #[test]
    fn renewed_speech_resets_the_window() {
        let mut gate = SilenceGate::new(1000, Duration::from_millis(1500));
        let start = Instant::now();
        assert!(!gate.observe_at(loud(), start));
        assert!(!gate.observe_at(0, start + Duration::from_millis(1400)));
        assert!(!gate.observe_at(loud(), start + Duration::from_millis(1450)));
        assert!(!gate.observe_at(0, start + Duration::from_millis(2000)));
        assert!(gate.observe_at(0, start + Duration::from_millis(2950)));
    }

    #[test]
    fn amplitude_at_threshold_counts_as_silence() {
        let mut gate = SilenceGate::new(1000, Duration::from_millis(10));
        let start = Instant::now();
        assert!(!gate.observe_at(1000, start));
        assert!(!gate.voice_seen());
    }
}
