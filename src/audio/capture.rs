//! Audio capture from microphone
//!
//! The cpal stream lives on a dedicated thread; captured samples are
//! converted to 16-bit PCM, cut into fixed-size chunks, and handed to the
//! async side over a channel. Dropping the capture (or calling `stop`)
//! tears the stream down and closes the channel, which downstream readers
//! observe as end of audio.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use crate::config::AudioConfig;
use crate::error::{Error, Result};

/// Chunks queued towards the async side before the capture thread drops
/// frames
const CHUNK_QUEUE: usize = 32;

/// Captures fixed-size PCM chunks from the default input device
pub struct AudioCapture {
    config: AudioConfig,
    control: Option<std::sync::mpsc::Sender<()>>,
}

impl AudioCapture {
    /// Create a capture handle; the device is opened on `start`.
    #[must_use]
    pub const fn new(config: AudioConfig) -> Self {
        Self {
            config,
            control: None,
        }
    }

    /// Start capturing. Returns the stream of PCM chunks; each chunk is
    /// `chunk_samples` mono 16-bit little-endian samples.
    ///
    /// # Errors
    ///
    /// Returns an error if no input device is available or the stream
    /// cannot be built at the configured rate.
    pub fn start(&mut self) -> Result<mpsc::Receiver<Vec<u8>>> {
        if self.control.is_some() {
            return Err(Error::Audio("capture already running".into()));
        }
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
        let config = self.config.clone();
        std::thread::spawn(move || capture_thread(&config, &chunk_tx, &stop_rx, &ready_tx));
        ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited during startup".into()))??;
        self.control = Some(stop_tx);
        Ok(chunk_rx)
    }

    /// Stop capturing and close the chunk stream.
    pub fn stop(&mut self) {
        if self.control.take().is_some() {
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.control.is_some()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    config: &AudioConfig,
    chunks: &mpsc::Sender<Vec<u8>>,
    stop: &std::sync::mpsc::Receiver<()>,
    ready: &std::sync::mpsc::Sender<Result<()>>,
) {
    let stream = match build_input_stream(config, chunks.clone()) {
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
    // Blocks until stop() drops the sender.
    let _ = stop.recv();
    drop(stream);
}

fn build_input_stream(
    config: &AudioConfig,
    chunks: mpsc::Sender<Vec<u8>>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let rate = config.sample_rate;
    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == config.channels
                && c.min_sample_rate() <= SampleRate(rate)
                && c.max_sample_rate() >= SampleRate(rate)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let stream_config: StreamConfig = supported_config.with_sample_rate(SampleRate(rate)).config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = rate,
        channels = stream_config.channels,
        "audio capture initialized"
    );

    let chunk_bytes = config.chunk_samples * 2;
    let mut pending: Vec<u8> = Vec::with_capacity(chunk_bytes * 2);
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    #[allow(clippy::cast_possible_truncation)]
                    let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                    pending.extend_from_slice(&sample_i16.to_le_bytes());
                }
                while pending.len() >= chunk_bytes {
                    let chunk: Vec<u8> = pending.drain(..chunk_bytes).collect();
                    if chunks.try_send(chunk).is_err() {
                        tracing::warn!("capture queue full, dropping a chunk");
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}
