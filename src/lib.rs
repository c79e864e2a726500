//! voxlink - streaming voice interaction client
//!
//! This library provides the pieces of a full-duplex voice loop:
//! - Binary frame codec for the voice service wire protocol
//! - Streaming speech recognition with voice-activity termination
//! - Incremental speech synthesis with out-of-order reassembly
//! - A strict conversation state machine and the daemon that drives it
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Daemon                          │
//! │   Wake  │  State machine  │  Conversation history   │
//! └───────┬──────────────┬───────────────────┬──────────┘
//!         │              │                   │
//! ┌───────▼──────┐ ┌─────▼───────┐ ┌─────────▼─────────┐
//! │  Recognition │ │    Chat     │ │     Synthesis     │
//! │  (WS + VAD)  │ │ (streaming) │ │ (scheduler + WS)  │
//! └───────┬──────┘ └─────────────┘ └─────────┬─────────┘
//!         │                                  │
//! ┌───────▼──────────────────────────────────▼─────────┐
//! │          Audio (cpal capture / playback)           │
//! └────────────────────────────────────────────────────┘
//! ```

pub mod asr;
pub mod audio;
pub mod chat;
pub mod config;
pub mod daemon;
pub mod error;
pub mod protocol;
pub mod state;
pub mod transport;
pub mod tts;
pub mod wake;

pub use asr::{AudioSource, RecognitionSession, RecognitionUpdate};
pub use audio::{AudioCapture, AudioPlayer};
pub use chat::{ChatClient, ChatMessage, ReplySource};
pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use protocol::{Event, Frame, MessageType};
pub use state::{AssistantEvent, AssistantState, StateMachine};
pub use tts::{IncrementalSynthesizer, PlaybackSink, SentenceSegmenter, SynthesisSession};
pub use wake::WakeDetector;
