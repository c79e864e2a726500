//! Streaming recognition session
//!
//! One session per utterance: open a connection, send the session
//! parameters, then upload audio chunks while reading results. The upload
//! ends when the voice-activity gate trips or the source runs dry; the
//! read side then waits a bounded window for the final transcript.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::vad::SilenceGate;
use crate::config::{AudioConfig, RecognitionConfig};
use crate::error::{Error, Result};
use crate::protocol::{self, Frame, MessageType};
use crate::transport;

/// How often the read loop wakes to check timers
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Transcript notifications emitted while a session runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionUpdate {
    /// The transcript so far changed
    Partial(String),
    /// The upload ended (silence window elapsed or the source ran dry);
    /// the final transcript is still pending
    UtteranceEnded,
    /// The transcript is complete; emitted exactly once
    Final(String),
}

/// A pull-style source of fixed-size mono 16-bit PCM chunks
#[async_trait]
pub trait AudioSource: Send {
    /// Next chunk, or `None` when the source is exhausted.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

#[async_trait]
impl AudioSource for mpsc::Receiver<Vec<u8>> {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.recv().await)
    }
}

/// A single streaming recognition exchange
pub struct RecognitionSession {
    config: RecognitionConfig,
    audio: AudioConfig,
}

impl RecognitionSession {
    /// Create a session from service and capture parameters.
    #[must_use]
    pub fn new(config: RecognitionConfig, audio: AudioConfig) -> Self {
        Self { config, audio }
    }

    /// Run the session to completion and return the final transcript.
    ///
    /// Partial transcripts are delivered on `updates` as they change, then
    /// exactly one [`RecognitionUpdate::Final`]. Cancellation stops both
    /// directions; nothing is delivered afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error on connection or protocol failure, when the service
    /// reports an error frame, or when the session is cancelled.
    pub async fn run<S: AudioSource + 'static>(
        &self,
        source: S,
        updates: mpsc::Sender<RecognitionUpdate>,
        cancel: CancellationToken,
    ) -> Result<String> {
        let (stream, connect_id) = transport::connect(
            &self.config.url,
            &self.config.app_id,
            &self.config.access_token,
            &self.config.resource_id,
        )
        .await?;
        debug!(%connect_id, "recognition session connected");
        let (mut sink, mut stream) = stream.split();

        let init = serde_json::to_vec(&self.init_payload())?;
        let request = protocol::encode_full_request(&init, None, false, self.config.compress)?;
        sink.send(Message::Binary(request)).await?;

        let (upload_done_tx, mut upload_done) = watch::channel(false);
        let upload_cancel = cancel.child_token();
        let upload = {
            let gate = SilenceGate::new(
                self.config.silence_threshold,
                self.config.silence_timeout(),
            );
            let compress = self.config.compress;
            let token = upload_cancel.clone();
            let updates = updates.clone();
            tokio::spawn(async move {
                let result = upload_audio(source, &mut sink, gate, compress, &updates, &token).await;
                let _ = upload_done_tx.send(true);
                result
            })
        };

        let mut transcript = String::new();
        let mut final_wait = FinalWait::new(self.config.final_wait());
        let outcome = loop {
            tokio::select! {
                () = cancel.cancelled() => break Err(Error::Cancelled),
                next = tokio::time::timeout(POLL_INTERVAL, stream.next()) => match next {
                    Err(_) => {
                        if *upload_done.borrow_and_update()
                            && final_wait.expired(Instant::now())
                        {
                            debug!("final result wait expired, keeping current transcript");
                            break Ok(true);
                        }
                    }
                    Ok(None) => break Err(Error::Connection(
                        "recognition stream closed before the final result".into(),
                    )),
                    Ok(Some(message)) => {
                        // A live stream restarts the final-wait window.
                        final_wait.frame_received();
                        match message {
                            Ok(Message::Binary(data)) => {
                                match self.handle_frame(&data, &mut transcript, &updates).await {
                                    Ok(FrameOutcome::Finished) => break Ok(false),
                                    Ok(FrameOutcome::Continue) => {}
                                    Err(e) => break Err(e),
                                }
                            }
                            Ok(Message::Close(_)) => break Err(Error::Connection(
                                "recognition service closed the connection".into(),
                            )),
                            Ok(other) => debug!(?other, "ignoring non-binary recognition message"),
                            Err(e) => break Err(e.into()),
                        }
                    }
                },
            }
        };

        upload_cancel.cancel();
        match upload.await {
            Ok(Ok(())) | Err(_) => {}
            Ok(Err(e)) => warn!(error = %e, "audio upload ended with an error"),
        }

        match outcome {
            Ok(expired) => {
                if expired {
                    let _ = updates.send(RecognitionUpdate::Final(transcript.clone())).await;
                }
                Ok(transcript)
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_frame(
        &self,
        data: &[u8],
        transcript: &mut String,
        updates: &mpsc::Sender<RecognitionUpdate>,
    ) -> Result<FrameOutcome> {
        let frame: Frame = protocol::decode(data)?;
        if frame.message_type != MessageType::FullResponse {
            debug!(message_type = ?frame.message_type, "ignoring unexpected recognition frame");
            return Ok(FrameOutcome::Continue);
        }
        let response: RecognitionResponse = serde_json::from_slice(&frame.payload)?;
        let (text, definite) = response.flatten();
        if !text.is_empty() && text != *transcript {
            *transcript = text;
            let _ = updates
                .send(RecognitionUpdate::Partial(transcript.clone()))
                .await;
        }
        if definite || frame.is_last() {
            let _ = updates
                .send(RecognitionUpdate::Final(transcript.clone()))
                .await;
            return Ok(FrameOutcome::Finished);
        }
        Ok(FrameOutcome::Continue)
    }

    fn init_payload(&self) -> serde_json::Value {
        json!({
            "user": { "uid": Uuid::new_v4().to_string() },
            "audio": {
                "format": "pcm",
                "rate": self.audio.sample_rate,
                "bits": 16,
                "channel": self.audio.channels,
            },
            "request": {
                "model_name": self.config.model_name,
                "enable_itn": self.config.enable_itn,
                "enable_punc": self.config.enable_punc,
                "show_utterances": self.config.show_utterances,
                "result_type": "full",
                "end_window_size": self.config.end_window_size,
                "force_to_speech_time": self.config.force_to_speech_time,
            },
        })
    }
}

enum FrameOutcome {
    Continue,
    Finished,
}

/// Bounded wait for the final transcript once the upload has ended. The
/// window only runs while the stream is quiet; any received frame restarts
/// it.
struct FinalWait {
    window: Duration,
    deadline: Option<Instant>,
}

impl FinalWait {
    const fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    fn frame_received(&mut self) {
        self.deadline = None;
    }

    fn expired(&mut self, now: Instant) -> bool {
        now >= *self.deadline.get_or_insert(now + self.window)
    }
}

type UploadSink = futures::stream::SplitSink<transport::WsStream, Message>;

async fn upload_audio<S: AudioSource>(
    mut source: S,
    sink: &mut UploadSink,
    mut gate: SilenceGate,
    compress: bool,
    updates: &mpsc::Sender<RecognitionUpdate>,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            chunk = source.next_chunk() => chunk?,
        };
        match chunk {
            Some(pcm) => {
                let frame = protocol::encode_audio_request(&pcm, None, false, compress)?;
                sink.send(Message::Binary(frame)).await?;
                if gate.observe(&pcm) {
                    debug!("post-speech silence window elapsed, finishing upload");
                    break;
                }
            }
            None => {
                debug!("audio source exhausted, finishing upload");
                break;
            }
        }
    }
    let _ = updates.send(RecognitionUpdate::UtteranceEnded).await;
    // The end-of-stream marker is always sent uncompressed.
    let last = protocol::encode_audio_request(&[], None, true, false)?;
    sink.send(Message::Binary(last)).await?;
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct RecognitionResponse {
    #[serde(default)]
    result: Option<RecognitionResult>,
}

#[derive(Debug, Default, Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    text: String,
    #[serde(default)]
    utterances: Vec<Utterance>,
}

#[derive(Debug, Default, Deserialize)]
struct Utterance {
    #[serde(default)]
    text: String,
    #[serde(default)]
    definite: bool,
}

impl RecognitionResponse {
    /// Collapse the response into (transcript so far, any definite utterance).
    fn flatten(&self) -> (String, bool) {
        let Some(result) = &self.result else {
            return (String::new(), false);
        };
        if result.utterances.is_empty() {
            return (result.text.clone(), false);
        }
        let text = result
            .utterances
            .iter()
            .map(|u| u.text.as_str())
            .collect::<String>();
        let definite = result.utterances.iter().any(|u| u.definite);
        (text, definite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_prefers_utterances() {
        let response: RecognitionResponse = serde_json::from_str(
            r#"{"result":{"text":"ignored","utterances":[
                {"text":"hello ","definite":true},
                {"text":"world","definite":false}
            ]}}"#,
        )
        .unwrap();
        let (text, definite) = response.flatten();
        assert_eq!(text, "hello world");
        assert!(definite);
    }

    #[test]
    fn flatten_falls_back_to_text() {
        let response: RecognitionResponse =
            serde_json::from_str(r#"{"result":{"text":"partial"}}"#).unwrap();
        let (text, definite) = response.flatten();
        assert_eq!(text, "partial");
        assert!(!definite);
    }

    #[test]
    fn flatten_handles_empty_response() {
        let response: RecognitionResponse = serde_json::from_str("{}").unwrap();
        let (text, definite) = response.flatten();
        assert!(text.is_empty());
        assert!(!definite);
    }

    #[test]
    fn final_wait_expires_only_after_a_quiet_window() {
        let mut wait = FinalWait::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(!wait.expired(t0));
        assert!(!wait.expired(t0 + Duration::from_millis(50)));
        assert!(wait.expired(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn final_wait_restarts_when_a_frame_arrives() {
        let mut wait = FinalWait::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(!wait.expired(t0));
        // Sparse partials keep arriving; each one restarts the window.
        wait.frame_received();
        let t1 = t0 + Duration::from_millis(90);
        assert!(!wait.expired(t1));
        assert!(!wait.expired(t1 + Duration::from_millis(90)));
        assert!(wait.expired(t1 + Duration::from_millis(100)));
    }
}
