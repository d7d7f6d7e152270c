use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voice_frontend::Config;
use voice_frontend::error::CaptureError;
use voice_frontend::voice::{
    AudioClip, AudioInput, AudioSink, CpalInput, SAMPLE_RATE, SegmentationEngine, SpeakerSink,
    SpeechQueue, Utterance, WakeWordBackends, silence,
};

/// Voice front-end - wake word capture and speech output
#[derive(Parser)]
#[command(name = "voice-frontend", version, about)]
struct Cli {
    /// Config file (default: ~/.config/voice-frontend/config.toml)
    #[arg(short, long, env = "VOICE_FRONTEND_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for the wake word and capture commands (default)
    Run {
        /// Directory to write captured utterances to as WAV files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Don't acknowledge wake words out loud
        #[arg(long)]
        quiet: bool,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Speak text through the configured TTS command
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voice_frontend=info",
        1 => "info,voice_frontend=debug",
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
    tracing::debug!(?config, "configuration loaded");

    match cli.command.unwrap_or(Command::Run {
        output_dir: None,
        quiet: false,
    }) {
        Command::Run { output_dir, quiet } => {
            let output_dir = output_dir.or_else(|| config.utterance_dir.clone());
            listen(config, output_dir, quiet).await
        }
        Command::TestMic { duration } => {
            let input = CpalInput::new().with_device(config.input_device.clone());
            let frame_samples = config.segmenter.frame_samples;
            tokio::task::spawn_blocking(move || test_mic(&input, frame_samples, duration))
                .await?
        }
        Command::TestSpeaker => tokio::task::spawn_blocking(test_speaker).await?,
        Command::Say { text } => {
            tokio::task::spawn_blocking(move || {
                let mut queue = SpeechQueue::from_config(&config.speech)?;
                queue.enqueue(text);
                queue.drain_and_stop();
                Ok::<_, anyhow::Error>(())
            })
            .await?
        }
    }
}

async fn listen(config: Config, output_dir: Option<PathBuf>, quiet: bool) -> anyhow::Result<()> {
    if let Some(dir) = &output_dir {
        std::fs::create_dir_all(dir)?;
    }

    let mut speech = SpeechQueue::from_config(&config.speech)?;
    let speaker = speech.handle();

    let utterances = AtomicU64::new(0);
    let mut engine = SegmentationEngine::new(
        config.segmenter.clone(),
        CpalInput::new().with_device(config.input_device.clone()),
        WakeWordBackends::from_config(&config.wake_word),
    )
    .with_callback_workers(config.callback_workers)
    .on_wake(move || {
        if !quiet {
            speaker.enqueue("Yes?");
        }
    })
    .on_command(move |utterance| {
        let n = utterances.fetch_add(1, Ordering::Relaxed);
        match &output_dir {
            Some(dir) => save_utterance(dir, n, &utterance),
            None => tracing::info!(
                n,
                frames = utterance.frames,
                duration_ms = utterance.duration().as_millis(),
                "utterance ready"
            ),
        }
    })
    .on_stopped(|status| tracing::info!(%status, "capture ended"));

    engine.start()?;
    println!("Listening for the wake word. Press Ctrl-C to stop.");

    let mut poll = tokio::time::interval(Duration::from_millis(500));
    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break Ok(());
            }
            _ = poll.tick() => {
                if !engine.is_running() {
                    break Err(anyhow::anyhow!("engine stopped: {}", engine.status()));
                }
            }
        }
    };

    tokio::task::block_in_place(|| {
        engine.stop();
        speech.drain_and_stop();
    });

    outcome
}

fn save_utterance(dir: &Path, n: u64, utterance: &Utterance) {
    let path = dir.join(format!("utterance-{n:04}.wav"));
    let written = utterance
        .to_wav()
        .map_err(anyhow::Error::from)
        .and_then(|wav| std::fs::write(&path, wav).map_err(anyhow::Error::from));

    match written {
        Ok(()) => tracing::info!(
            path = %path.display(),
            frames = utterance.frames,
            duration_ms = utterance.duration().as_millis(),
            "utterance saved"
        ),
        Err(e) => tracing::error!(path = %path.display(), error = %e, "failed to save utterance"),
    }
}

fn test_mic(input: &CpalInput, frame_samples: usize, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut source = input.open(frame_samples)?;
    println!("Frame: {frame_samples} samples");
    println!("---");

    for i in 0..duration {
        let second = Instant::now();
        let mut samples = Vec::new();

        while second.elapsed() < Duration::from_secs(1) {
            match source.read_frame() {
                Ok(frame) => samples.extend_from_slice(frame.samples()),
                Err(CaptureError::Timeout) => {}
                Err(CaptureError::Overrun(dropped)) => println!("  overrun: {dropped} samples lost"),
                Err(e @ CaptureError::Closed(_)) => return Err(e.into()),
            }
        }

        let energy = silence::rms(&samples);
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy / 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:7.1} | Peak: {:5} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("Frames with RMS below the silence threshold end a command.");

    Ok(())
}

fn test_speaker() -> anyhow::Result<()> {
    // Two-note chime at the capture rate, through the same sink speech uses
    const NOTES: [f32; 2] = [660.0, 880.0];
    const NOTE_SAMPLES: usize = SAMPLE_RATE as usize / 4;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = NOTES
        .iter()
        .flat_map(|&freq| {
            (0..NOTE_SAMPLES).map(move |i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                let fade = 1.0 - i as f32 / NOTE_SAMPLES as f32;
                (std::f32::consts::TAU * freq * t).sin() * 0.3 * fade
            })
        })
        .collect();

    println!("Playing a two-note chime at {SAMPLE_RATE} Hz...");
    let mut sink = SpeakerSink::new();
    sink.play(&AudioClip {
        samples,
        sample_rate: SAMPLE_RATE,
    })?;
    println!("Done. If nothing was audible, check the default output device.");

    Ok(())
}
