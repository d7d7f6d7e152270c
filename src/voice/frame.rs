//! PCM frame and utterance types

use std::sync::Arc;
use std::time::Duration;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz mono for wake word and STT models)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per frame (80ms at 16kHz)
pub const FRAME_SAMPLES: usize = 1280;

/// One immutable chunk of signed 16-bit mono PCM
///
/// Cloning shares the underlying samples, so copying a run of frames
/// never copies audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Arc<[i16]>,
}

impl AudioFrame {
    /// Wrap captured samples in a frame
    #[must_use]
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    /// A frame of `len` zero samples
    #[must_use]
    pub fn silent(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    /// Samples of this frame
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of samples in this frame
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples scaled to `[-1.0, 1.0]`
    #[must_use]
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
    }
}

/// A completed utterance: every frame of one capture session joined in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Contiguous PCM samples
    pub samples: Vec<i16>,
    /// Number of frames that were joined
    pub frames: usize,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

impl Utterance {
    /// Join frames into one contiguous buffer
    #[must_use]
    pub fn join(frames: &[AudioFrame], sample_rate: u32) -> Self {
        let total = frames.iter().map(AudioFrame::len).sum();
        let mut samples = Vec::with_capacity(total);
        for frame in frames {
            samples.extend_from_slice(frame.samples());
        }

        Self {
            samples,
            frames: frames.len(),
            sample_rate,
        }
    }

    /// Raw little-endian PCM bytes, as handed to transcription backends
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Playback length of the utterance
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Encode as a 16-bit mono WAV file for STT APIs
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| Error::Audio(e.to_string()))?;

            for &sample in &self.samples {
                writer
                    .write_sample(sample)
                    .map_err(|e| Error::Audio(e.to_string()))?;
            }

            writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
        }

        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_preserves_order() {
        let frames = vec![
            AudioFrame::new(vec![1, 2]),
            AudioFrame::new(vec![3]),
            AudioFrame::new(vec![4, 5, 6]),
        ];
        let utterance = Utterance::join(&frames, SAMPLE_RATE);

        assert_eq!(utterance.samples, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(utterance.frames, 3);
    }

    #[test]
    fn test_le_bytes() {
        let utterance = Utterance::join(&[AudioFrame::new(vec![1, -2])], SAMPLE_RATE);
        assert_eq!(utterance.to_le_bytes(), vec![0x01, 0x00, 0xfe, 0xff]);
    }

    #[test]
    fn test_duration() {
        let frames = vec![AudioFrame::silent(FRAME_SAMPLES); 25];
        let utterance = Utterance::join(&frames, SAMPLE_RATE);
        assert_eq!(utterance.duration(), Duration::from_secs(2));
    }

    #[test]
    fn test_wav_header() {
        let utterance = Utterance::join(&[AudioFrame::silent(160)], SAMPLE_RATE);
        let wav = utterance.to_wav().unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 160 * 2);
    }

    #[test]
    fn test_clone_shares_samples() {
        let frame = AudioFrame::new(vec![7; 4]);
        let copy = frame.clone();
        assert!(std::ptr::eq(frame.samples(), copy.samples()));
    }
}
