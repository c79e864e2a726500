//! Error types for voxlink

use thiserror::Error;

/// Result type alias for voxlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in voxlink
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A frame that cannot be decoded (truncated, bad lengths, unknown fields)
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// An error frame or unexpected event reported by the remote service
    #[error("protocol error {code}: {message}")]
    Protocol {
        /// Service-assigned error code
        code: u32,
        /// Human-readable detail from the error payload
        message: String,
    },

    /// Transport-level connection failure
    #[error("connection error: {0}")]
    Connection(String),

    /// A bounded wait expired
    #[error("timed out: {0}")]
    Timeout(String),

    /// The operation was cancelled before completing
    #[error("cancelled")]
    Cancelled,

    /// Audio capture/playback error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech recognition error
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Speech synthesis error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Chat collaborator error
    #[error("chat error: {0}")]
    Chat(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
