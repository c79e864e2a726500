//! Incremental synthesis scheduling and gapless reassembly
//!
//! Accepted units dispatch immediately, each synthesizing on its own task
//! and connection, so completion order is unrelated to sentence order. A
//! single consumer owns the playback sink and a reorder buffer; audio is
//! written strictly in unit order, each unit exactly once. The reply is
//! complete only when the text stream has ended, nothing is buffered, and
//! no unit is still in flight.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::segment::{SentenceSegmenter, SynthesisUnit};
use super::session::SynthesisSession;
use crate::config::SynthesisConfig;
use crate::error::{Error, Result};

/// Consumer of ordered reply audio
#[async_trait]
pub trait PlaybackSink: Send {
    /// Append ordered audio bytes.
    async fn write(&mut self, audio: &[u8]) -> Result<()>;

    /// Discard queued audio and go silent immediately.
    async fn halt(&mut self) -> Result<()>;
}

/// Holds out-of-order unit audio until its turn
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    next: u32,
    pending: BTreeMap<u32, Vec<u8>>,
}

impl ReorderBuffer {
    /// Empty buffer expecting unit 0 first.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the next unit to play.
    #[must_use]
    pub const fn next_seq(&self) -> u32 {
        self.next
    }

    /// Whether any out-of-order audio is waiting.
    #[must_use]
    pub fn has_buffered(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Accept one completed unit and return the run of audio now ready to
    /// play, in order. Audio for an already-played sequence is discarded.
    pub fn insert(&mut self, seq: u32, audio: Vec<u8>) -> Vec<Vec<u8>> {
        if seq < self.next {
            warn!(seq, next = self.next, "discarding audio for an already-played unit");
            return Vec::new();
        }
        self.pending.insert(seq, audio);
        self.pop_ready()
    }

    /// Abandon the unit currently waited on, resuming at the smallest
    /// buffered sequence. Returns the run ready to play after the skip.
    pub fn skip_gap(&mut self) -> Vec<Vec<u8>> {
        if let Some(&smallest) = self.pending.keys().next() {
            warn!(
                skipped_from = self.next,
                resumed_at = smallest,
                "abandoning stalled synthesis unit"
            );
            self.next = smallest;
        }
        self.pop_ready()
    }

    fn pop_ready(&mut self) -> Vec<Vec<u8>> {
        let mut ready = Vec::new();
        while let Some(audio) = self.pending.remove(&self.next) {
            ready.push(audio);
            self.next += 1;
        }
        ready
    }
}

/// Orchestrates segmentation, concurrent synthesis, and ordered playback
/// for one streamed reply.
pub struct IncrementalSynthesizer {
    config: SynthesisConfig,
}

impl IncrementalSynthesizer {
    /// Create a scheduler for the given synthesis parameters.
    #[must_use]
    pub const fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }

    /// Speak a streamed reply: segment `text_rx` into units, synthesize
    /// them concurrently, and play the audio gaplessly in order on `sink`.
    ///
    /// `started` fires when the first audio reaches the sink. Returns once
    /// every accepted unit has been played (or abandoned per policy).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when interrupted; after that, no byte
    /// reaches the sink. With `fail_closed`, the first failed unit aborts
    /// the reply. A stall longer than the unit wait with nothing buffered
    /// is a timeout.
    pub async fn speak<P: PlaybackSink>(
        &self,
        mut text_rx: mpsc::Receiver<String>,
        sink: &mut P,
        started: oneshot::Sender<()>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let units_cancel = cancel.child_token();

        let dispatcher = {
            let config = self.config.clone();
            let token = units_cancel.clone();
            let min_chars = self.config.min_speakable_chars;
            tokio::spawn(async move {
                let mut segmenter = SentenceSegmenter::new(min_chars);
                loop {
                    let chunk = tokio::select! {
                        () = token.cancelled() => break,
                        chunk = text_rx.recv() => match chunk {
                            Some(chunk) => chunk,
                            None => break,
                        },
                    };
                    for unit in segmenter.push(&chunk) {
                        spawn_unit(unit, config.clone(), done_tx.clone(), token.clone());
                    }
                }
                if !token.is_cancelled() {
                    if let Some(unit) = segmenter.finish() {
                        spawn_unit(unit, config.clone(), done_tx.clone(), token.clone());
                    }
                }
                segmenter.accepted()
            })
        };

        let outcome = replay_in_order(
            done_rx,
            sink,
            started,
            cancel,
            self.config.unit_wait(),
            self.config.fail_closed,
        )
        .await;

        units_cancel.cancel();
        let accepted = dispatcher.await.unwrap_or_default();
        if outcome.is_ok() {
            debug!(units = accepted, "reply playback complete");
        }
        outcome
    }
}

fn spawn_unit(
    unit: SynthesisUnit,
    config: SynthesisConfig,
    done: mpsc::UnboundedSender<(u32, Result<Vec<u8>>)>,
    cancel: CancellationToken,
) {
    debug!(seq = unit.seq, text = %unit.text, "dispatching synthesis unit");
    tokio::spawn(async move {
        let session = SynthesisSession::new(config);
        let result = session.synthesize(&unit.text, &cancel).await;
        let _ = done.send((unit.seq, result));
    });
}

/// The reassembly consumer. Owns the sink for the duration of the reply;
/// `done_rx` closes once the dispatcher and every unit task have finished.
async fn replay_in_order<P: PlaybackSink>(
    mut done_rx: mpsc::UnboundedReceiver<(u32, Result<Vec<u8>>)>,
    sink: &mut P,
    started: oneshot::Sender<()>,
    cancel: &CancellationToken,
    unit_wait: std::time::Duration,
    fail_closed: bool,
) -> Result<()> {
    let mut buffer = ReorderBuffer::new();
    let mut started = Some(started);
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => {
                sink.halt().await?;
                return Err(Error::Cancelled);
            }
            next = tokio::time::timeout(unit_wait, done_rx.recv()) => next,
        };
        match next {
            Err(_) if buffer.has_buffered() => {
                let ready = buffer.skip_gap();
                play(sink, ready, &mut started, cancel).await?;
            }
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "no synthesis unit completed within {unit_wait:?}"
                )));
            }
            Ok(None) => break,
            Ok(Some((seq, result))) => {
                let audio = match result {
                    Ok(audio) => audio,
                    Err(Error::Cancelled) => continue,
                    Err(e) if fail_closed => {
                        sink.halt().await?;
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(seq, error = %e, "synthesis unit failed, playing nothing for it");
                        Vec::new()
                    }
                };
                let ready = buffer.insert(seq, audio);
                play(sink, ready, &mut started, cancel).await?;
            }
        }
    }
    // The channel closed with a gap still open: every remaining unit is
    // buffered past a failure that never reported, so drain in order.
    while buffer.has_buffered() {
        let ready = buffer.skip_gap();
        play(sink, ready, &mut started, cancel).await?;
    }
    Ok(())
}

async fn play<P: PlaybackSink>(
    sink: &mut P,
    ready: Vec<Vec<u8>>,
    started: &mut Option<oneshot::Sender<()>>,
    cancel: &CancellationToken,
) -> Result<()> {
    for audio in ready {
        if cancel.is_cancelled() {
            sink.halt().await?;
            return Err(Error::Cancelled);
        }
        if audio.is_empty() {
            continue;
        }
        if let Some(signal) = started.take() {
            let _ = signal.send(());
        }
        sink.write(&audio).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        writes: Vec<Vec<u8>>,
        halted: bool,
    }

    #[async_trait]
    impl PlaybackSink for RecordingSink {
        async fn write(&mut self, audio: &[u8]) -> Result<()> {
            self.writes.push(audio.to_vec());
            Ok(())
        }

        async fn halt(&mut self) -> Result<()> {
            self.halted = true;
            Ok(())
        }
    }

    fn unit_audio(seq: u32) -> Vec<u8> {
        vec![u8::try_from(seq).unwrap(); 4]
    }

    #[test]
    fn reorder_buffer_releases_in_order() {
        let mut buffer = ReorderBuffer::new();
        assert!(buffer.insert(2, unit_audio(2)).is_empty());
        assert!(buffer.insert(1, unit_audio(1)).is_empty());
        let ready = buffer.insert(0, unit_audio(0));
        assert_eq!(ready, vec![unit_audio(0), unit_audio(1), unit_audio(2)]);
        assert_eq!(buffer.next_seq(), 3);
        assert!(!buffer.has_buffered());
    }

    #[test]
    fn reorder_buffer_discards_replayed_sequences() {
        let mut buffer = ReorderBuffer::new();
        assert_eq!(buffer.insert(0, unit_audio(0)).len(), 1);
        assert!(buffer.insert(0, unit_audio(0)).is_empty());
        assert_eq!(buffer.next_seq(), 1);
    }

    #[test]
    fn skip_gap_resumes_at_smallest_buffered() {
        let mut buffer = ReorderBuffer::new();
        assert!(buffer.insert(3, unit_audio(3)).is_empty());
        assert!(buffer.insert(2, unit_audio(2)).is_empty());
        let ready = buffer.skip_gap();
        assert_eq!(ready, vec![unit_audio(2), unit_audio(3)]);
    }

    #[tokio::test]
    async fn adversarial_completion_order_plays_in_sequence() {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        for seq in (0..5u32).rev() {
            done_tx.send((seq, Ok(unit_audio(seq)))).unwrap();
        }
        drop(done_tx);

        let mut sink = RecordingSink::default();
        let (started_tx, started_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        replay_in_order(
            done_rx,
            &mut sink,
            started_tx,
            &cancel,
            Duration::from_secs(5),
            false,
        )
        .await
        .unwrap();

        let expected: Vec<Vec<u8>> = (0..5).map(unit_audio).collect();
        assert_eq!(sink.writes, expected);
        assert!(started_rx.await.is_ok());
    }

    #[tokio::test]
    async fn failed_unit_contributes_silence_and_playback_continues() {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        done_tx.send((1, Ok(unit_audio(1)))).unwrap();
        done_tx
            .send((0, Err(Error::Timeout("unit stalled".into()))))
            .unwrap();
        drop(done_tx);

        let mut sink = RecordingSink::default();
        let (started_tx, _started_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        replay_in_order(
            done_rx,
            &mut sink,
            started_tx,
            &cancel,
            Duration::from_secs(5),
            false,
        )
        .await
        .unwrap();

        assert_eq!(sink.writes, vec![unit_audio(1)]);
    }

    #[tokio::test]
    async fn fail_closed_aborts_on_first_failure() {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        done_tx
            .send((0, Err(Error::Synthesis("rejected".into()))))
            .unwrap();

        let mut sink = RecordingSink::default();
        let (started_tx, _started_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let result = replay_in_order(
            done_rx,
            &mut sink,
            started_tx,
            &cancel,
            Duration::from_secs(5),
            true,
        )
        .await;

        assert!(matches!(result, Err(Error::Synthesis(_))));
        assert!(sink.halted);
        assert!(sink.writes.is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_delivery_immediately() {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        done_tx.send((0, Ok(unit_audio(0)))).unwrap();

        let mut sink = RecordingSink::default();
        let (started_tx, _started_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Audio for unit 1 arriving after cancellation must never play.
        done_tx.send((1, Ok(unit_audio(1)))).unwrap();

        let result = replay_in_order(
            done_rx,
            &mut sink,
            started_tx,
            &cancel,
            Duration::from_secs(5),
            false,
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(sink.halted);
        assert!(sink.writes.is_empty());
    }

    #[tokio::test]
    async fn cancellation_releases_a_still_open_text_stream() {
        let (text_tx, text_rx) = mpsc::channel::<String>(8);
        let synthesizer = IncrementalSynthesizer::new(SynthesisConfig::default());
        let mut sink = RecordingSink::default();
        let (started_tx, _started_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        // The sender stays open the whole time; cancellation alone must
        // unblock the reply.
        let result = tokio::time::timeout(
            Duration::from_secs(3),
            synthesizer.speak(text_rx, &mut sink, started_tx, &cancel),
        )
        .await
        .expect("speak must return once cancelled");

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(sink.halted);
        assert!(sink.writes.is_empty());
        drop(text_tx);
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn stalled_gap_is_skipped_after_the_wait() {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        done_tx.send((1, Ok(unit_audio(1)))).unwrap();
        done_tx.send((2, Ok(unit_audio(2)))).unwrap();

        let (started_tx, _started_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let consumer = tokio::spawn(async move {
            let mut sink = RecordingSink::default();
            let result = replay_in_order(
                done_rx,
                &mut sink,
                started_tx,
                &cancel,
                Duration::from_millis(200),
                false,
            )
            .await;
            (result, sink)
        });
        // Unit 0 never completes; close the channel once the skip happened.
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(done_tx);
        let (result, sink) = tokio::time::timeout(Duration::from_secs(2), consumer)
            .await
            .unwrap()
            .unwrap();

        result.unwrap();
        assert_eq!(sink.writes, vec![unit_audio(1), unit_audio(2)]);
    }
}
