//! Bidirectional synthesis session
//!
//! One session per text unit, over its own connection. The lifecycle is
//! strictly gated: start the connection and wait for its acknowledgment,
//! start the session and wait for its acknowledgment, submit the text,
//! mark input complete, then collect audio until the service confirms the
//! session finished. An unexpected event at any gate aborts the session
//! with that event's payload as the error detail.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SynthesisConfig;
use crate::error::{Error, Result};
use crate::protocol::{self, Event, Frame, MessageType};
use crate::transport::{self, WsStream};

/// Lifecycle phase of a synthesis session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not yet connected
    Created,
    /// Connection acknowledged
    Connected,
    /// Session acknowledged
    SessionStarted,
    /// Text submitted, input marked complete
    TaskSent,
    /// All audio delivered
    Finished,
    /// Aborted
    Failed,
}

/// A one-shot synthesis exchange for a single unit of text
pub struct SynthesisSession {
    config: SynthesisConfig,
    session_id: String,
}

impl SynthesisSession {
    /// Create a session with a fresh session id.
    #[must_use]
    pub fn new(config: SynthesisConfig) -> Self {
        Self {
            config,
            session_id: Uuid::new_v4().to_string(),
        }
    }

    /// Synthesize one unit of text, returning the audio bytes in delivery
    /// order.
    ///
    /// # Errors
    ///
    /// Returns an error on connection failure, on any unexpected event at a
    /// lifecycle gate, when the service reports a failure, when no frame
    /// arrives within the receive timeout (a timed-out session is never a
    /// truncated success), or on cancellation.
    pub async fn synthesize(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let mut phase = Phase::Created;
        let result = self.run(text, cancel, &mut phase).await;
        if let Err(e) = &result {
            warn!(session_id = %self.session_id, ?phase, error = %e, "synthesis session failed");
        }
        result
    }

    async fn run(
        &self,
        text: &str,
        cancel: &CancellationToken,
        phase: &mut Phase,
    ) -> Result<Vec<u8>> {
        let (mut stream, connect_id) = self.connect(cancel).await.inspect_err(|_| {
            *phase = Phase::Failed;
        })?;
        debug!(session_id = %self.session_id, %connect_id, "synthesis session connected");

        let outcome = self.exchange(&mut stream, text, cancel, phase).await;

        // Best-effort teardown; the service does not acknowledge it.
        let finish = protocol::encode_event_request(Event::FinishConnection, None, b"{}");
        if let Ok(data) = finish {
            let _ = stream.send(Message::Binary(data)).await;
        }
        let _ = stream.close(None).await;
        outcome
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<(WsStream, String)> {
        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            connected = transport::connect(
                &self.config.url,
                &self.config.app_id,
                &self.config.access_token,
                &self.config.resource_id,
            ) => connected,
        }
    }

    async fn exchange(
        &self,
        stream: &mut WsStream,
        text: &str,
        cancel: &CancellationToken,
        phase: &mut Phase,
    ) -> Result<Vec<u8>> {
        let result = self.exchange_inner(stream, text, cancel, phase).await;
        if result.is_err() {
            *phase = Phase::Failed;
            // Give the service a chance to drop the session cleanly.
            let cancel_event = protocol::encode_event_request(
                Event::CancelSession,
                Some(&self.session_id),
                b"{}",
            );
            if let Ok(data) = cancel_event {
                let _ = stream.send(Message::Binary(data)).await;
            }
        }
        result
    }

    async fn exchange_inner(
        &self,
        stream: &mut WsStream,
        text: &str,
        cancel: &CancellationToken,
        phase: &mut Phase,
    ) -> Result<Vec<u8>> {
        self.send_event(stream, Event::StartConnection, None, json!({})).await?;
        self.expect_event(stream, Event::ConnectionStarted, cancel).await?;
        *phase = Phase::Connected;

        let start_session = json!({
            "user": { "uid": Uuid::new_v4().to_string() },
            "event": Event::StartSession as u32,
            "namespace": "BidirectionalTTS",
            "req_params": {
                "text": "",
                "speaker": self.config.speaker,
                "audio_params": {
                    "format": self.config.format,
                    "sample_rate": self.config.sample_rate,
                    "speech_rate": self.config.speech_rate,
                    "loudness_rate": self.config.loudness_rate,
                },
            },
        });
        self.send_event(stream, Event::StartSession, Some(&self.session_id), start_session)
            .await?;
        self.expect_event(stream, Event::SessionStarted, cancel).await?;
        *phase = Phase::SessionStarted;

        let task = json!({
            "event": Event::TaskRequest as u32,
            "req_params": { "text": text },
        });
        self.send_event(stream, Event::TaskRequest, Some(&self.session_id), task)
            .await?;
        self.send_event(stream, Event::FinishSession, Some(&self.session_id), json!({}))
            .await?;
        *phase = Phase::TaskSent;

        let audio = self.collect_audio(stream, cancel).await?;
        *phase = Phase::Finished;
        Ok(audio)
    }

    async fn send_event(
        &self,
        stream: &mut WsStream,
        event: Event,
        session_id: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<()> {
        let body = serde_json::to_vec(&payload)?;
        let data = protocol::encode_event_request(event, session_id, &body)?;
        stream.send(Message::Binary(data)).await?;
        Ok(())
    }

    /// Wait for one specific acknowledgment event. Anything else ends the
    /// session.
    async fn expect_event(
        &self,
        stream: &mut WsStream,
        want: Event,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        let frame = self.next_frame(stream, cancel, self.config.ack_timeout()).await?;
        match frame.event {
            Some(event) if event == want => Ok(frame),
            Some(event) => Err(Error::Synthesis(format!(
                "expected {want:?}, got {event:?}: {}",
                String::from_utf8_lossy(&frame.payload)
            ))),
            None => Err(Error::Synthesis(format!(
                "expected {want:?}, got a frame without an event"
            ))),
        }
    }

    async fn collect_audio(
        &self,
        stream: &mut WsStream,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut audio = Vec::new();
        loop {
            let frame = self
                .next_frame(stream, cancel, self.config.receive_timeout())
                .await?;
            if frame.message_type == MessageType::AudioOnlyResponse {
                audio.extend_from_slice(&frame.payload);
                continue;
            }
            match frame.event {
                Some(Event::TtsResponse) => {
                    if let Some(bytes) = decode_embedded_audio(&frame.payload)? {
                        audio.extend_from_slice(&bytes);
                    }
                }
                Some(Event::SentenceStart | Event::SentenceEnd) => {
                    debug!(session_id = %self.session_id, event = ?frame.event, "sentence marker");
                }
                Some(Event::SessionFinished) => return Ok(audio),
                Some(Event::SessionFailed | Event::SessionCanceled) => {
                    return Err(Error::Synthesis(format!(
                        "session ended by service ({:?}): {}",
                        frame.event,
                        String::from_utf8_lossy(&frame.payload)
                    )));
                }
                other => {
                    return Err(Error::Synthesis(format!(
                        "unexpected event {other:?} while collecting audio"
                    )));
                }
            }
        }
    }

    async fn next_frame(
        &self,
        stream: &mut WsStream,
        cancel: &CancellationToken,
        timeout: std::time::Duration,
    ) -> Result<Frame> {
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                next = tokio::time::timeout(timeout, stream.next()) => next,
            };
            match message {
                Err(_) => {
                    return Err(Error::Timeout(format!(
                        "no frame from synthesis service within {timeout:?}"
                    )));
                }
                Ok(None) => {
                    return Err(Error::Connection(
                        "synthesis stream closed unexpectedly".into(),
                    ));
                }
                Ok(Some(Ok(Message::Binary(data)))) => return protocol::decode(&data),
                Ok(Some(Ok(Message::Close(_)))) => {
                    return Err(Error::Connection(
                        "synthesis service closed the connection".into(),
                    ));
                }
                Ok(Some(Ok(other))) => {
                    debug!(?other, "ignoring non-binary synthesis message");
                }
                Ok(Some(Err(e))) => return Err(e.into()),
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddedAudio {
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

/// Some responses carry base64 audio inside a JSON payload instead of an
/// audio-only frame.
fn decode_embedded_audio(payload: &[u8]) -> Result<Option<Vec<u8>>> {
    let parsed: EmbeddedAudio = match serde_json::from_slice(payload) {
        Ok(parsed) => parsed,
        Err(_) => return Ok(None),
    };
    let Some(encoded) = parsed.audio.or(parsed.data) else {
        return Ok(None);
    };
    let bytes = BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| Error::Synthesis(format!("undecodable embedded audio: {e}")))?;
    Ok(Some(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_audio_decodes_base64() {
        let payload = br#"{"audio":"AAEC"}"#;
        let bytes = decode_embedded_audio(payload).unwrap().unwrap();
        assert_eq!(bytes, vec![0, 1, 2]);
    }

    #[test]
    fn embedded_audio_accepts_data_field() {
        let payload = br#"{"data":"AAEC"}"#;
        assert!(decode_embedded_audio(payload).unwrap().is_some());
    }

    #[test]
    fn non_audio_payload_is_none() {
        assert!(decode_embedded_audio(br#"{"status":"ok"}"#).unwrap().is_none());
        assert!(decode_embedded_audio(b"not json").unwrap().is_none());
    }

    #[test]
    fn bad_base64_is_an_error() {
        assert!(decode_embedded_audio(br#"{"audio":"!!!"}"#).is_err());
    }
}
