//! Chat collaborator
//!
//! The speech pipeline treats the language model as an opaque source of
//! reply text: transcript in, streamed chunks out. [`ReplySource`] is the
//! seam; [`ChatClient`] implements it against an OpenAI-compatible
//! streaming endpoint.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ChatConfig;
use crate::error::{Error, Result};

/// One turn of conversation context
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// "user" or "assistant"
    pub role: String,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// A user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    /// An assistant turn.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// A streaming source of reply text
#[async_trait]
pub trait ReplySource: Send + Sync {
    /// Stream the reply to `transcript` as text chunks on `chunks`,
    /// returning the complete reply once the stream ends.
    async fn stream_reply(
        &self,
        transcript: &str,
        history: &[ChatMessage],
        chunks: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// OpenAI-compatible streaming chat client
pub struct ChatClient {
    client: reqwest::Client,
    config: ChatConfig,
}

impl ChatClient {
    /// Create a client for the configured endpoint.
    #[must_use]
    pub fn new(config: ChatConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ReplySource for ChatClient {
    async fn stream_reply(
        &self,
        transcript: &str,
        history: &[ChatMessage],
        chunks: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut messages = vec![json!({
            "role": "system",
            "content": self.config.system_prompt,
        })];
        for turn in history {
            messages.push(serde_json::to_value(turn)?);
        }
        messages.push(json!({ "role": "user", "content": transcript }));

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "messages": messages,
                "stream": true,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Chat(format!("chat request failed ({status}): {body}")));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut reply = String::new();
        'outer: loop {
            let bytes = tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                next = stream.next() => match next {
                    Some(bytes) => bytes?,
                    None => break,
                },
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                match parse_sse_line(line.trim()) {
                    Some(SseData::Done) => break 'outer,
                    Some(SseData::Delta(delta)) => {
                        reply.push_str(&delta);
                        if chunks.send(delta).await.is_err() {
                            // Downstream hung up; the reply is still worth
                            // finishing for the history.
                            debug!("reply consumer dropped, draining chat stream");
                        }
                    }
                    None => {}
                }
            }
        }
        debug!(chars = reply.len(), "chat reply complete");
        Ok(reply)
    }
}

enum SseData {
    Delta(String),
    Done,
}

/// Parse one server-sent-events line from a streaming completion.
fn parse_sse_line(line: &str) -> Option<SseData> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseData::Done);
    }
    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(error = %e, "skipping undecodable stream line");
            return None;
        }
    };
    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)?;
    if delta.is_empty() {
        return None;
    }
    Some(SseData::Delta(delta))
}

#[derive(Debug, Default, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"hello"}}]}"#;
        match parse_sse_line(line) {
            Some(SseData::Delta(delta)) => assert_eq!(delta, "hello"),
            _ => panic!("expected a delta"),
        }
    }

    #[test]
    fn parses_done_marker() {
        assert!(matches!(parse_sse_line("data: [DONE]"), Some(SseData::Done)));
    }

    #[test]
    fn ignores_non_data_lines() {
        assert!(parse_sse_line("").is_none());
        assert!(parse_sse_line(": keep-alive").is_none());
        assert!(parse_sse_line("event: ping").is_none());
    }

    #[test]
    fn ignores_empty_and_missing_deltas() {
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_sse_line(role_only).is_none());
        let empty = r#"data: {"choices":[{"delta":{"content":""}}]}"#;
        assert!(parse_sse_line(empty).is_none());
    }
}
