//! Streaming speech recognition

pub mod session;
pub mod vad;

pub use session::{AudioSource, RecognitionSession, RecognitionUpdate};
pub use vad::{SilenceGate, peak_amplitude};
