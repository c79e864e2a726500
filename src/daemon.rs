//! Headless conversational loop
//!
//! Wires the components together: idle wake detection, one recognition
//! session per utterance, the chat collaborator, and incremental synthesis
//! to the speaker. The state machine gates every phase change; the daemon
//! performs the entry actions and cancels whichever component owns the
//! state being left.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::asr::{RecognitionSession, RecognitionUpdate};
use crate::audio::{AudioCapture, AudioPlayer};
use crate::chat::{ChatClient, ChatMessage, ReplySource};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::state::{AssistantEvent, AssistantState, StateMachine};
use crate::tts::IncrementalSynthesizer;
use crate::wake::WakeDetector;

/// The assistant's main loop
pub struct Daemon {
    config: Config,
    machine: StateMachine,
    chat: Arc<dyn ReplySource>,
    history: Vec<ChatMessage>,
}

impl Daemon {
    /// Create a daemon using the configured chat endpoint.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let chat = Arc::new(ChatClient::new(config.chat.clone()));
        Self::with_reply_source(config, chat)
    }

    /// Create a daemon with a custom reply source.
    #[must_use]
    pub fn with_reply_source(config: Config, chat: Arc<dyn ReplySource>) -> Self {
        Self {
            config,
            machine: StateMachine::new(),
            chat,
            history: Vec::new(),
        }
    }

    /// Run until `shutdown` fires or a fatal audio error occurs.
    ///
    /// # Errors
    ///
    /// Returns an error when the capture device fails; service and chat
    /// errors are absorbed into the Error state and recovered from.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        info!("voxlink daemon started");
        let mut capture = AudioCapture::new(self.config.audio.clone());
        loop {
            match self.machine.state() {
                AssistantState::Shutdown => {
                    info!("voxlink daemon stopped");
                    return Ok(());
                }
                AssistantState::Idle | AssistantState::Error => {
                    self.wait_for_wake(&mut capture, &shutdown).await?;
                }
                AssistantState::Listening => {
                    self.converse(&mut capture, &shutdown).await?;
                }
                state => {
                    // The conversation path owns these states end to end.
                    warn!(?state, "main loop re-entered mid-conversation state");
                    self.machine.handle(AssistantEvent::Interrupt);
                }
            }
        }
    }

    /// Idle: watch the capture stream for sustained voice energy.
    async fn wait_for_wake(
        &mut self,
        capture: &mut AudioCapture,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let mut chunks = capture.start()?;
        let mut wake = WakeDetector::new(&self.config.wake);
        let event = loop {
            tokio::select! {
                () = shutdown.cancelled() => break AssistantEvent::ShutdownRequested,
                chunk = chunks.recv() => match chunk {
                    Some(pcm) => {
                        if wake.feed(&pcm) {
                            break AssistantEvent::WakeDetected;
                        }
                    }
                    None => return Err(Error::Audio("capture stream ended".into())),
                },
            }
        };
        capture.stop();
        drop(chunks);
        self.machine.handle(event);
        Ok(())
    }

    /// One full exchange: listen, recognize, think, speak.
    async fn converse(
        &mut self,
        capture: &mut AudioCapture,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let transcript = match self.listen(capture, shutdown).await? {
            Some(text) => text,
            None => return Ok(()),
        };
        info!(%transcript, "utterance recognized");
        self.reply(capture, shutdown, &transcript).await
    }

    /// Listening/Recognizing: run a recognition session over live capture.
    /// Returns `None` when the exchange ended without a usable transcript
    /// (the machine has already moved on).
    async fn listen(
        &mut self,
        capture: &mut AudioCapture,
        shutdown: &CancellationToken,
    ) -> Result<Option<String>> {
        let chunks = capture.start()?;
        let (updates_tx, mut updates_rx) = mpsc::channel(16);
        let cancel = shutdown.child_token();
        let session = RecognitionSession::new(
            self.config.recognition.clone(),
            self.config.audio.clone(),
        );
        let token = cancel.clone();
        let recognizer =
            tokio::spawn(async move { session.run(chunks, updates_tx, token).await });

        while let Some(update) = updates_rx.recv().await {
            match update {
                RecognitionUpdate::Partial(text) => debug!(%text, "partial transcript"),
                RecognitionUpdate::UtteranceEnded => {
                    self.machine.handle(AssistantEvent::SilenceDetected);
                }
                RecognitionUpdate::Final(_) => {
                    self.machine.handle(AssistantEvent::TranscriptReady);
                }
            }
        }

        let outcome = recognizer
            .await
            .map_err(|e| Error::Recognition(format!("recognition task panicked: {e}")))?;
        capture.stop();

        match outcome {
            Ok(transcript) if transcript.trim().is_empty() => {
                debug!("nothing recognized, returning to idle");
                self.machine.handle(AssistantEvent::Interrupt);
                Ok(None)
            }
            Ok(transcript) => Ok(Some(transcript)),
            Err(Error::Cancelled) => {
                self.machine.handle(AssistantEvent::ShutdownRequested);
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "recognition failed");
                self.machine.handle(AssistantEvent::RecognitionFailed);
                Ok(None)
            }
        }
    }

    /// Thinking/Speaking: stream the chat reply through incremental
    /// synthesis, watching the microphone for barge-in while speaking.
    async fn reply(
        &mut self,
        capture: &mut AudioCapture,
        shutdown: &CancellationToken,
        transcript: &str,
    ) -> Result<()> {
        let (text_tx, text_rx) = mpsc::channel(64);
        let chat_cancel = shutdown.child_token();
        let chat_task = {
            let chat = Arc::clone(&self.chat);
            let transcript = transcript.to_owned();
            let history = self.history.clone();
            let token = chat_cancel.clone();
            tokio::spawn(async move {
                chat.stream_reply(&transcript, &history, text_tx, &token).await
            })
        };

        let mut player = match AudioPlayer::new(&self.config.synthesis) {
            Ok(player) => player,
            Err(e) => {
                chat_cancel.cancel();
                chat_task.abort();
                return Err(e);
            }
        };
        let synthesizer = IncrementalSynthesizer::new(self.config.synthesis.clone());
        let speak_cancel = shutdown.child_token();
        let (started_tx, mut started_rx) = oneshot::channel();

        // Barge-in monitor: live while the reply streams, consulted only
        // once audio is actually playing.
        let mut barge_chunks = capture.start()?;
        let mut wake = WakeDetector::new(&self.config.wake);
        let mut started_pending = true;
        let mut reply_started = false;
        let mut monitoring = true;
        let mut barged = false;

        // Scoped so the pinned future releases the player before drain.
        let speak_result = {
            let speak = synthesizer.speak(text_rx, &mut player, started_tx, &speak_cancel);
            tokio::pin!(speak);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        speak_cancel.cancel();
                        chat_cancel.cancel();
                        let result = speak.as_mut().await;
                        self.machine.handle(AssistantEvent::ShutdownRequested);
                        break result;
                    }
                    started = &mut started_rx, if started_pending => {
                        started_pending = false;
                        if started.is_ok() {
                            reply_started = true;
                            self.machine.handle(AssistantEvent::ReplyStarted);
                        }
                    }
                    chunk = barge_chunks.recv(), if monitoring => {
                        match chunk {
                            Some(pcm) => {
                                if self.machine.state() == AssistantState::Speaking
                                    && wake.feed(&pcm)
                                {
                                    info!("barge-in detected, interrupting playback");
                                    barged = true;
                                    speak_cancel.cancel();
                                    chat_cancel.cancel();
                                }
                            }
                            None => monitoring = false,
                        }
                    }
                    result = speak.as_mut() => break result,
                }
            }
        };
        capture.stop();
        if speak_result.is_err() {
            // The reply is not going to be spoken; stop streaming it.
            chat_cancel.cancel();
        }

        let reply_text = match chat_task.await {
            Ok(Ok(text)) => Some(text),
            Ok(Err(Error::Cancelled)) => None,
            Ok(Err(e)) => {
                warn!(error = %e, "chat collaborator failed");
                self.machine.handle(AssistantEvent::ChatFailed);
                None
            }
            Err(e) => {
                warn!(error = %e, "chat task panicked");
                self.machine.handle(AssistantEvent::ChatFailed);
                None
            }
        };
        if let Some(text) = reply_text {
            self.remember(transcript, &text);
        }

        match speak_result {
            Ok(()) if reply_started => {
                // Let queued samples finish before declaring the turn over.
                player.drain().await;
                self.machine.handle(AssistantEvent::SpeechFinished);
            }
            Ok(()) => {
                debug!("reply produced no speakable audio");
                self.machine.handle(AssistantEvent::Interrupt);
            }
            Err(Error::Cancelled) if barged => {
                self.machine.handle(AssistantEvent::WakeDetected);
            }
            Err(Error::Cancelled) => {
                self.machine.handle(AssistantEvent::ShutdownRequested);
            }
            Err(e) => {
                warn!(error = %e, "synthesis pipeline failed");
                self.machine.handle(AssistantEvent::SynthesisFailed);
            }
        }
        Ok(())
    }

    fn remember(&mut self, transcript: &str, reply: &str) {
        self.history.push(ChatMessage::user(transcript));
        self.history.push(ChatMessage::assistant(reply));
        let max = self.config.chat.history_turns * 2;
        if self.history.len() > max {
            self.history.drain(..self.history.len() - max);
        }
    }

    /// Current conversation state, for status displays.
    #[must_use]
    pub const fn state(&self) -> AssistantState {
        self.machine.state()
    }
}
