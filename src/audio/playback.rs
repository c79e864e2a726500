//! Audio playback to speakers
//!
//! A dedicated thread owns the cpal output stream and feeds it from a
//! shared sample queue, so writes are gapless: appending while earlier
//! audio is still playing extends the queue without a seam. Halting clears
//! the queue directly, which silences the output on the next callback.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::config::SynthesisConfig;
use crate::error::{Error, Result};
use crate::tts::PlaybackSink;

/// Reply audio encoding accepted by the player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// MPEG audio, decoded with minimp3
    Mp3,
    /// Raw mono 16-bit little-endian PCM
    Pcm16,
}

impl OutputFormat {
    fn from_name(name: &str) -> Result<Self> {
        match name {
            "mp3" => Ok(Self::Mp3),
            "pcm" => Ok(Self::Pcm16),
            other => Err(Error::Config(format!("unsupported audio format: {other}"))),
        }
    }
}

enum PlayerCommand {
    Append(Vec<f32>),
}

/// Streams reply audio to the default output device
pub struct AudioPlayer {
    format: OutputFormat,
    queue: Arc<Mutex<VecDeque<f32>>>,
    commands: std::sync::mpsc::Sender<PlayerCommand>,
}

impl AudioPlayer {
    /// Open the output device at the synthesis sample rate.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured format is unknown, no output
    /// device is available, or the stream cannot be built.
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        let format = OutputFormat::from_name(&config.format)?;
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
        let sample_rate = config.sample_rate;
        let thread_queue = Arc::clone(&queue);
        std::thread::spawn(move || player_thread(sample_rate, &thread_queue, &cmd_rx, &ready_tx));
        ready_rx
            .recv()
            .map_err(|_| Error::Audio("playback thread exited during startup".into()))??;
        Ok(Self {
            format,
            queue,
            commands: cmd_tx,
        })
    }

    /// Samples still queued for the speaker.
    #[must_use]
    pub fn queued_samples(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Wait until every queued sample has been played.
    pub async fn drain(&self) {
        while self.queued_samples() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn decode(&self, audio: &[u8]) -> Result<Vec<f32>> {
        match self.format {
            OutputFormat::Mp3 => decode_mp3(audio),
            OutputFormat::Pcm16 => Ok(decode_pcm16(audio)),
        }
    }
}

#[async_trait]
impl PlaybackSink for AudioPlayer {
    async fn write(&mut self, audio: &[u8]) -> Result<()> {
        let samples = self.decode(audio)?;
        self.commands
            .send(PlayerCommand::Append(samples))
            .map_err(|_| Error::Audio("playback thread is gone".into()))
    }

    async fn halt(&mut self) -> Result<()> {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
        Ok(())
    }
}

fn player_thread(
    sample_rate: u32,
    queue: &Arc<Mutex<VecDeque<f32>>>,
    commands: &std::sync::mpsc::Receiver<PlayerCommand>,
    ready: &std::sync::mpsc::Sender<Result<()>>,
) {
    let stream = match build_output_stream(sample_rate, Arc::clone(queue)) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(Error::Audio(e.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));
    // Runs until the AudioPlayer drops its command sender.
    while let Ok(command) = commands.recv() {
        match command {
            PlayerCommand::Append(samples) => {
                if let Ok(mut q) = queue.lock() {
                    q.extend(samples);
                }
            }
        }
    }
    drop(stream);
}

fn build_output_stream(
    sample_rate: u32,
    queue: Arc<Mutex<VecDeque<f32>>>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported_config.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = config.channels as usize;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels = config.channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut q = match queue.lock() {
                    Ok(q) => q,
                    Err(_) => return,
                };
                for frame in data.chunks_mut(channels) {
                    let sample = q.pop_front().unwrap_or(0.0);
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                // Convert i16 samples to f32 and handle stereo to mono
                let frame_samples: Vec<f32> = if frame.channels == 2 {
                    // Stereo: average channels
                    frame
                        .data
                        .chunks(2)
                        .map(|chunk| {
                            let left = f32::from(chunk[0]) / 32768.0;
                            let right =
                                f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                            f32::midpoint(left, right)
                        })
                        .collect()
                } else {
                    // Mono
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect()
                };

                samples.extend(frame_samples);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

fn decode_pcm16(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_decodes_full_scale() {
        let bytes = [
            0x00, 0x00, // 0
            0xff, 0x7f, // i16::MAX
            0x00, 0x80, // i16::MIN
        ];
        let samples = decode_pcm16(&bytes);
        assert_eq!(samples.len(), 3);
        assert!((samples[0]).abs() < f32::EPSILON);
        assert!(samples[1] > 0.999);
        assert!((samples[2] + 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn unknown_format_is_a_config_error() {
        assert!(OutputFormat::from_name("ogg").is_err());
        assert_eq!(OutputFormat::from_name("mp3").unwrap(), OutputFormat::Mp3);
        assert_eq!(OutputFormat::from_name("pcm").unwrap(), OutputFormat::Pcm16);
    }
}
