//! Audio capture and playback

pub mod capture;
pub mod playback;
pub mod wav;

pub use capture::AudioCapture;
pub use playback::{AudioPlayer, OutputFormat};
pub use wav::pcm16_to_wav;
