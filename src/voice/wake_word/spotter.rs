//! Rustpotter personal wake word backend
//!
//! Rustpotter works on its own native frame length (30ms at 16kHz), so
//! captured frames are re-chunked and the frame scores 1.0 if any native
//! frame inside it produced a detection.

use std::path::Path;

use rustpotter::{Rustpotter, RustpotterConfig, SampleFormat};

use super::{DetectorProvider, WakeWordDetector};
use crate::Result;
use crate::error::WakeWordInitError;
use crate::voice::{AudioFrame, SAMPLE_RATE};

const WAKEWORD_KEY: &str = "wakeword";

/// Loads rustpotter `.rpw` wake word files
#[derive(Debug, Clone, Copy, Default)]
pub struct RustpotterProvider;

impl DetectorProvider for RustpotterProvider {
    fn name(&self) -> &'static str {
        "rustpotter"
    }

    fn initialize(
        &self,
        model_path: &Path,
        _credential: Option<&str>,
    ) -> std::result::Result<Box<dyn WakeWordDetector>, WakeWordInitError> {
        let mut config = RustpotterConfig::default();
        config.fmt.sample_rate = SAMPLE_RATE as usize;
        config.fmt.channels = 1;
        config.fmt.sample_format = SampleFormat::F32;

        let mut detector =
            Rustpotter::new(&config).map_err(|e| WakeWordInitError::Model(e.to_string()))?;
        detector
            .add_wakeword_from_file(WAKEWORD_KEY, &model_path.to_string_lossy())
            .map_err(|e| WakeWordInitError::Model(format!("{}: {e}", model_path.display())))?;

        let native_frame = detector.get_samples_per_frame();
        if native_frame == 0 {
            return Err(WakeWordInitError::Model(
                "rustpotter reported a zero frame length".to_string(),
            ));
        }

        tracing::debug!(
            model = %model_path.display(),
            native_frame,
            "rustpotter wake word loaded"
        );

        Ok(Box::new(RustpotterDetector {
            detector,
            native_frame,
            pending: Vec::with_capacity(native_frame * 2),
        }))
    }
}

struct RustpotterDetector {
    detector: Rustpotter,
    native_frame: usize,
    pending: Vec<f32>,
}

impl WakeWordDetector for RustpotterDetector {
    fn score(&mut self, frame: &AudioFrame) -> Result<f32> {
        self.pending.extend(frame.to_f32());

        let mut score = 0.0;
        while self.pending.len() >= self.native_frame {
            let chunk: Vec<f32> = self.pending.drain(..self.native_frame).collect();
            if self.detector.process_samples(chunk).is_some() {
                tracing::trace!("rustpotter detection");
                score = 1.0;
            }
        }

        Ok(score)
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}
