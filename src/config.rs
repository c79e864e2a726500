//! Configuration management for voxlink
//!
//! Loads `~/.config/voxlink/config.toml` when present; every field has a
//! default so the file is a partial overlay. Credentials prefer environment
//! variables over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Capture-side audio parameters
    #[serde(default)]
    pub audio: AudioConfig,

    /// Energy wake detection
    #[serde(default)]
    pub wake: WakeConfig,

    /// Streaming speech recognition service
    #[serde(default)]
    pub recognition: RecognitionConfig,

    /// Chat completion service
    #[serde(default)]
    pub chat: ChatConfig,

    /// Streaming speech synthesis service
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

/// Capture-side audio parameters
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Capture sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Capture channel count (the upload is mono)
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Samples per capture chunk (3200 at 16 kHz is 200 ms)
    #[serde(default = "default_chunk_samples")]
    pub chunk_samples: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            chunk_samples: default_chunk_samples(),
        }
    }
}

/// Energy wake detection parameters
#[derive(Debug, Clone, Deserialize)]
pub struct WakeConfig {
    /// Peak i16 amplitude a frame must exceed to count as active
    #[serde(default = "default_wake_threshold")]
    pub energy_threshold: i32,

    /// Consecutive active frames required to trigger a wake
    #[serde(default = "default_wake_frames")]
    pub min_active_frames: usize,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            energy_threshold: default_wake_threshold(),
            min_active_frames: default_wake_frames(),
        }
    }
}

/// Streaming speech recognition service parameters
#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    /// WebSocket endpoint
    #[serde(default = "default_asr_url")]
    pub url: String,

    /// Application id credential (`VOXLINK_ASR_APP_ID`)
    #[serde(default)]
    pub app_id: String,

    /// Access token credential (`VOXLINK_ASR_ACCESS_TOKEN`)
    #[serde(default)]
    pub access_token: String,

    /// Service resource identifier
    #[serde(default = "default_asr_resource")]
    pub resource_id: String,

    /// Recognition model name
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Inverse text normalization in results
    #[serde(default = "default_true")]
    pub enable_itn: bool,

    /// Punctuation in results
    #[serde(default = "default_true")]
    pub enable_punc: bool,

    /// Per-utterance segmentation in results
    #[serde(default = "default_true")]
    pub show_utterances: bool,

    /// Server-side endpointing window in ms
    #[serde(default = "default_end_window")]
    pub end_window_size: u32,

    /// Server-side forced speech start in ms
    #[serde(default = "default_force_speech")]
    pub force_to_speech_time: u32,

    /// Peak i16 amplitude below which a chunk counts as silence
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: i32,

    /// Seconds of post-speech silence that end the upload
    #[serde(default = "default_silence_timeout")]
    pub silence_timeout_secs: f64,

    /// Seconds to wait for the final result after the upload ends
    #[serde(default = "default_final_wait")]
    pub final_wait_secs: f64,

    /// Gzip request payloads
    #[serde(default = "default_true")]
    pub compress: bool,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            url: default_asr_url(),
            app_id: String::new(),
            access_token: String::new(),
            resource_id: default_asr_resource(),
            model_name: default_model_name(),
            enable_itn: true,
            enable_punc: true,
            show_utterances: true,
            end_window_size: default_end_window(),
            force_to_speech_time: default_force_speech(),
            silence_threshold: default_silence_threshold(),
            silence_timeout_secs: default_silence_timeout(),
            final_wait_secs: default_final_wait(),
            compress: true,
        }
    }
}

impl RecognitionConfig {
    /// Post-speech silence window as a [`Duration`].
    #[must_use]
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.silence_timeout_secs)
    }

    /// Final-result wait window as a [`Duration`].
    #[must_use]
    pub fn final_wait(&self) -> Duration {
        Duration::from_secs_f64(self.final_wait_secs)
    }
}

/// Chat completion service parameters
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// OpenAI-compatible chat completions endpoint
    #[serde(default = "default_chat_url")]
    pub url: String,

    /// API key (`VOXLINK_CHAT_API_KEY`)
    #[serde(default)]
    pub api_key: String,

    /// Model identifier
    #[serde(default = "default_chat_model")]
    pub model: String,

    /// System prompt for the assistant persona
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Conversation turns kept as context
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            url: default_chat_url(),
            api_key: String::new(),
            model: default_chat_model(),
            system_prompt: default_system_prompt(),
            history_turns: default_history_turns(),
        }
    }
}

/// Streaming speech synthesis service parameters
#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisConfig {
    /// WebSocket endpoint
    #[serde(default = "default_tts_url")]
    pub url: String,

    /// Application id credential (`VOXLINK_TTS_APP_ID`)
    #[serde(default)]
    pub app_id: String,

    /// Access token credential (`VOXLINK_TTS_ACCESS_TOKEN`)
    #[serde(default)]
    pub access_token: String,

    /// Service resource identifier
    #[serde(default = "default_tts_resource")]
    pub resource_id: String,

    /// Voice identifier
    #[serde(default = "default_speaker")]
    pub speaker: String,

    /// Output encoding ("mp3" or "pcm")
    #[serde(default = "default_format")]
    pub format: String,

    /// Output sample rate in Hz
    #[serde(default = "default_tts_sample_rate")]
    pub sample_rate: u32,

    /// Speech rate adjustment (-50..=100, 0 is normal)
    #[serde(default)]
    pub speech_rate: i32,

    /// Loudness adjustment (-50..=100, 0 is normal)
    #[serde(default)]
    pub loudness_rate: i32,

    /// Seconds without any frame before a session fails
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_secs: f64,

    /// Seconds to wait for each lifecycle acknowledgment
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: f64,

    /// Minimum alphanumeric/ideographic characters for a speakable unit
    #[serde(default = "default_min_speakable")]
    pub min_speakable_chars: usize,

    /// Seconds the player waits for the next unit before dropping it
    #[serde(default = "default_unit_wait")]
    pub unit_wait_secs: f64,

    /// Abort the whole reply when any unit fails
    #[serde(default)]
    pub fail_closed: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            url: default_tts_url(),
            app_id: String::new(),
            access_token: String::new(),
            resource_id: default_tts_resource(),
            speaker: default_speaker(),
            format: default_format(),
            sample_rate: default_tts_sample_rate(),
            speech_rate: 0,
            loudness_rate: 0,
            receive_timeout_secs: default_receive_timeout(),
            ack_timeout_secs: default_ack_timeout(),
            min_speakable_chars: default_min_speakable(),
            unit_wait_secs: default_unit_wait(),
            fail_closed: false,
        }
    }
}

impl SynthesisConfig {
    /// Frame receive window as a [`Duration`].
    #[must_use]
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.receive_timeout_secs)
    }

    /// Acknowledgment wait window as a [`Duration`].
    #[must_use]
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ack_timeout_secs)
    }

    /// Next-unit wait window as a [`Duration`].
    #[must_use]
    pub fn unit_wait(&self) -> Duration {
        Duration::from_secs_f64(self.unit_wait_secs)
    }
}

impl Config {
    /// Load configuration from the given path, or the default location when
    /// none is given, then apply environment overrides for credentials.
    ///
    /// # Errors
    ///
    /// Returns an error when an explicitly given file cannot be read or any
    /// file fails to parse.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(explicit) => {
                let text = std::fs::read_to_string(explicit).map_err(|e| {
                    Error::Config(format!("cannot read {}: {e}", explicit.display()))
                })?;
                toml::from_str(&text)?
            }
            None => match Self::default_path() {
                Some(default) if default.exists() => {
                    let text = std::fs::read_to_string(&default)?;
                    toml::from_str(&text)?
                }
                _ => Self::default(),
            },
        };
        config.apply_env();
        Ok(config)
    }

    /// Default config file location (`~/.config/voxlink/config.toml`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "voxlink", "voxlink")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("VOXLINK_ASR_APP_ID") {
            self.recognition.app_id = v;
        }
        if let Ok(v) = std::env::var("VOXLINK_ASR_ACCESS_TOKEN") {
            self.recognition.access_token = v;
        }
        if let Ok(v) = std::env::var("VOXLINK_TTS_APP_ID") {
            self.synthesis.app_id = v;
        }
        if let Ok(v) = std::env::var("VOXLINK_TTS_ACCESS_TOKEN") {
            self.synthesis.access_token = v;
        }
        if let Ok(v) = std::env::var("VOXLINK_CHAT_API_KEY") {
            self.chat.api_key = v;
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_channels() -> u16 {
    1
}

fn default_chunk_samples() -> usize {
    3200
}

fn default_wake_threshold() -> i32 {
    2000
}

fn default_wake_frames() -> usize {
    3
}

fn default_asr_url() -> String {
    "wss://openspeech.bytedance.com/api/v3/sauc/bigmodel".into()
}

fn default_asr_resource() -> String {
    "volc.bigasr.sauc.duration".into()
}

fn default_model_name() -> String {
    "bigmodel".into()
}

fn default_end_window() -> u32 {
    800
}

fn default_force_speech() -> u32 {
    1000
}

fn default_silence_threshold() -> i32 {
    1000
}

fn default_silence_timeout() -> f64 {
    1.5
}

fn default_final_wait() -> f64 {
    1.5
}

fn default_chat_url() -> String {
    "https://ark.cn-beijing.volces.com/api/v3/chat/completions".into()
}

fn default_chat_model() -> String {
    "doubao-lite-32k".into()
}

fn default_system_prompt() -> String {
    "You are a helpful voice assistant. Keep answers short and speakable.".into()
}

fn default_history_turns() -> usize {
    10
}

fn default_tts_url() -> String {
    "wss://openspeech.bytedance.com/api/v3/tts/bidirection".into()
}

fn default_tts_resource() -> String {
    "volc.service_type.10029".into()
}

fn default_speaker() -> String {
    "zh_female_wanwanxiaohe_moon_bigtts".into()
}

fn default_format() -> String {
    "mp3".into()
}

fn default_tts_sample_rate() -> u32 {
    24_000
}

fn default_receive_timeout() -> f64 {
    30.0
}

fn default_ack_timeout() -> f64 {
    10.0
}

fn default_min_speakable() -> usize {
    2
}

fn default_unit_wait() -> f64 {
    30.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.audio.chunk_samples, 3200);
        assert_eq!(config.recognition.silence_threshold, 1000);
        assert!(config.recognition.compress);
        assert_eq!(config.synthesis.min_speakable_chars, 2);
        assert!(!config.synthesis.fail_closed);
    }

    #[test]
    fn partial_file_overlays_defaults() {
        let text = r#"
            [recognition]
            silence_timeout_secs = 2.0

            [synthesis]
            speaker = "en_male_test"
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.recognition.silence_timeout_secs, 2.0);
        assert_eq!(config.synthesis.speaker, "en_male_test");
        assert_eq!(config.recognition.silence_threshold, 1000);
        assert_eq!(config.synthesis.format, "mp3");
    }
}
