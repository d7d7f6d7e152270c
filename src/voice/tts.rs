//! Text-to-speech (TTS) processing
//!
//! Synthesis and playback are capabilities the speech queue calls on its
//! worker thread. The built-in synthesizer runs a local TTS program; the
//! built-in sink plays on the default output device.

use std::io::{Cursor, Write};
use std::process::{Command, Stdio};

use super::AudioPlayback;
use crate::{Error, Result};

/// Placeholder in a TTS command line that is replaced by the text
pub const TEXT_PLACEHOLDER: &str = "{text}";

/// Synthesized mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

impl AudioClip {
    /// Whether the clip holds no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Turns text into audio
pub trait SpeechSynthesizer: Send {
    /// Synthesize `text`
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    fn synthesize(&mut self, text: &str) -> Result<AudioClip>;
}

/// Renders audio to the user
pub trait AudioSink: Send {
    /// Play `clip`, returning once it has been rendered
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    fn play(&mut self, clip: &AudioClip) -> Result<()>;
}

/// Runs a local TTS program that writes WAV or MP3 audio to stdout
///
/// If an argument contains `{text}` the text is substituted there,
/// otherwise it is written to the program's stdin. Works with e.g.
/// `espeak-ng --stdout` or `piper --output_file -`.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
}

impl CommandSynthesizer {
    /// Create from a command line: program followed by its arguments
    ///
    /// # Errors
    ///
    /// Returns error if the command line is empty
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("TTS command is empty".to_string()))?;

        if program.trim().is_empty() {
            return Err(Error::Config("TTS command is empty".to_string()));
        }

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn uses_placeholder(&self) -> bool {
        self.args.iter().any(|a| a.contains(TEXT_PLACEHOLDER))
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn synthesize(&mut self, text: &str) -> Result<AudioClip> {
        let inline = self.uses_placeholder();
        let args = self.args.iter().map(|a| a.replace(TEXT_PLACEHOLDER, text));

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(if inline { Stdio::null() } else { Stdio::piped() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Tts(format!("failed to run {}: {e}", self.program)))?;

        if !inline {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(text.as_bytes())?;
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Tts(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        tracing::trace!(bytes = output.stdout.len(), "tts output received");
        decode_audio(&output.stdout)
    }
}

/// Plays clips on the default output device
#[derive(Debug, Default)]
pub struct SpeakerSink {
    playback: Option<AudioPlayback>,
}

impl SpeakerSink {
    /// Create a sink; the device is opened on first use
    #[must_use]
    pub const fn new() -> Self {
        Self { playback: None }
    }
}

impl AudioSink for SpeakerSink {
    fn play(&mut self, clip: &AudioClip) -> Result<()> {
        let playback = match self.playback.take() {
            Some(p) if p.sample_rate() == clip.sample_rate => p,
            _ => AudioPlayback::new(clip.sample_rate)?,
        };

        let result = playback.play_blocking(&clip.samples);
        self.playback = Some(playback);
        result
    }
}

/// Decode WAV or MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the data is empty or neither format decodes
pub fn decode_audio(data: &[u8]) -> Result<AudioClip> {
    if data.is_empty() {
        return Err(Error::Tts("synthesizer produced no audio".to_string()));
    }

    if data.starts_with(b"RIFF") {
        return decode_wav(data);
    }

    decode_mp3(data)
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav(data: &[u8]) -> Result<AudioClip> {
    let reader =
        hound::WavReader::new(Cursor::new(data)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    Ok(AudioClip {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<AudioClip> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                let data: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&data, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Tts("unrecognized audio format".to_string()));
    }

    Ok(AudioClip {
        samples,
        sample_rate,
    })
}

/// Average interleaved channels into mono
#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
