//! Streaming speech synthesis: per-unit sessions, sentence segmentation,
//! and the incremental scheduler that keeps playback gapless.

pub mod scheduler;
pub mod segment;
pub mod session;

pub use scheduler::{IncrementalSynthesizer, PlaybackSink, ReorderBuffer};
pub use segment::{SentenceSegmenter, SynthesisUnit, is_speakable};
pub use session::{Phase, SynthesisSession};
