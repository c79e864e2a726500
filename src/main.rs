use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use voxlink::audio::{AudioCapture, AudioPlayer, pcm16_to_wav};
use voxlink::tts::{PlaybackSink, SynthesisSession};
use voxlink::{Config, Daemon};

/// Voxlink - hands-free voice assistant client
#[derive(Parser)]
#[command(name = "voxlink", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "VOXLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the recording to a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
    /// Synthesize a phrase and play it
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the speech synthesis pipeline.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voxlink=info",
        1 => "info,voxlink=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, output } => {
                test_mic(&config, duration, output.as_deref()).await
            }
            Command::TestSpeaker => test_speaker(&config).await,
            Command::Say { text } => say(&config, &text).await,
        };
    }

    tracing::info!("starting voxlink");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    let mut daemon = Daemon::new(config);
    daemon.run(shutdown).await?;

    Ok(())
}

/// Test microphone input
async fn test_mic(
    config: &Config,
    duration: u64,
    output: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let sample_rate = config.audio.sample_rate;
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let mut capture = AudioCapture::new(config.audio.clone());
    let mut chunks = capture.start()?;

    let mut recording = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    let mut second = 0u64;
    let mut second_peak = 0i32;
    let mut next_tick = tokio::time::Instant::now() + Duration::from_secs(1);

    loop {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => break,
            () = tokio::time::sleep_until(next_tick) => {
                second += 1;
                #[allow(clippy::cast_sign_loss)]
                let meter_len = ((second_peak * 50 / 32768) as usize).min(50);
                let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);
                println!("[{second:2}s] Peak: {second_peak:5} | [{meter}]");
                second_peak = 0;
                next_tick += Duration::from_secs(1);
            }
            chunk = chunks.recv() => {
                let Some(chunk) = chunk else { break };
                second_peak = second_peak.max(voxlink::asr::peak_amplitude(&chunk));
                recording.extend_from_slice(&chunk);
            }
        }
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If the peak stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    if let Some(path) = output {
        let wav = pcm16_to_wav(&recording, sample_rate)?;
        std::fs::write(path, wav)?;
        println!("\nRecording saved to {}", path.display());
    }

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    // Feed raw PCM no matter what the synthesis format is configured as.
    let mut pcm_config = config.synthesis.clone();
    pcm_config.format = "pcm".to_string();

    let sample_rate = pcm_config.sample_rate;
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let pcm: Vec<u8> = (0..num_samples)
        .flat_map(|i| {
            let t = i as f32 / sample_rate as f32;
            let sample = (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3;
            ((sample * 32767.0) as i16).to_le_bytes()
        })
        .collect();

    println!("Playing {num_samples} samples at {sample_rate} Hz...");

    let mut player = AudioPlayer::new(&pcm_config)?;
    player.write(&pcm).await?;
    player.drain().await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Synthesize a phrase and play it through the default output device
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Synthesizing: \"{text}\"\n");

    let session = SynthesisSession::new(config.synthesis.clone());
    let cancel = CancellationToken::new();
    let audio = session.synthesize(text, &cancel).await?;
    println!("Got {} bytes of audio data", audio.len());

    println!("Playing audio...");
    let mut player = AudioPlayer::new(&config.synthesis)?;
    player.write(&audio).await?;
    player.drain().await;

    println!("\n---");
    println!("If you heard the speech, synthesis is working!");

    Ok(())
}
