//! openWakeWord ONNX pipeline
//!
//! Three models run in sequence: a melspectrogram front-end, a shared speech
//! embedding model and the per-phrase classifier. The configured model path
//! is the classifier; the two shared models must sit next to it.

use std::collections::VecDeque;
use std::fmt::Display;
use std::path::Path;

use ndarray::{Array2, Array3, Array4, ArrayViewD};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;

use super::{DetectorProvider, WakeWordDetector};
use crate::error::WakeWordInitError;
use crate::voice::{AudioFrame, FRAME_SAMPLES};
use crate::{Error, Result};

const MELSPEC_MODEL: &str = "melspectrogram.onnx";
const EMBEDDING_MODEL: &str = "embedding_model.onnx";

const MEL_BINS: usize = 32;
const EMBEDDING_WINDOW: usize = 76;
const EMBEDDING_DIM: usize = 96;
const CLASSIFICATION_FRAMES: usize = 16;
const MAX_MEL_FRAMES: usize = EMBEDDING_WINDOW * 2;
const MAX_EMBEDDINGS: usize = 120;

/// Scores are forced to zero until the model has seen this many chunks
const WARMUP_CHUNKS: usize = 5;

/// Loads openWakeWord classifiers
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenWakeWordProvider;

impl DetectorProvider for OpenWakeWordProvider {
    fn name(&self) -> &'static str {
        "openwakeword"
    }

    fn initialize(
        &self,
        model_path: &Path,
        _credential: Option<&str>,
    ) -> std::result::Result<Box<dyn WakeWordDetector>, WakeWordInitError> {
        let model_dir = model_path.parent().unwrap_or_else(|| Path::new("."));

        let detector = OpenWakeWordDetector {
            melspec: load_session(&model_dir.join(MELSPEC_MODEL))?,
            embedding: load_session(&model_dir.join(EMBEDDING_MODEL))?,
            classifier: load_session(model_path)?,
            raw_buffer: Vec::with_capacity(FRAME_SAMPLES * 2),
            mel_buffer: VecDeque::with_capacity(MAX_MEL_FRAMES),
            embedding_buffer: VecDeque::with_capacity(MAX_EMBEDDINGS),
            chunks_seen: 0,
            last_score: 0.0,
        };

        tracing::debug!(model = %model_path.display(), "openWakeWord models loaded");
        Ok(Box::new(detector))
    }
}

fn load_session(path: &Path) -> std::result::Result<Session, WakeWordInitError> {
    if !path.exists() {
        return Err(WakeWordInitError::MissingAsset(path.to_path_buf()));
    }

    let model_err =
        |e: &dyn Display| WakeWordInitError::Model(format!("{}: {e}", path.display()));

    Session::builder()
        .map_err(|e| model_err(&e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| model_err(&e))?
        .with_intra_threads(1)
        .map_err(|e| model_err(&e))?
        .with_inter_threads(1)
        .map_err(|e| model_err(&e))?
        .commit_from_file(path)
        .map_err(|e| model_err(&e))
}

fn inference_err(e: impl Display) -> Error {
    Error::WakeWord(e.to_string())
}

/// The newest `EMBEDDING_WINDOW` mel frames as a `[1, 76, 32, 1]` batch
fn latest_mel_window(mel: &VecDeque<[f32; MEL_BINS]>) -> Result<Option<Array4<f32>>> {
    if mel.len() < EMBEDDING_WINDOW {
        return Ok(None);
    }

    let mut window = Vec::with_capacity(EMBEDDING_WINDOW * MEL_BINS);
    for frame in mel.iter().skip(mel.len() - EMBEDDING_WINDOW) {
        window.extend_from_slice(frame);
    }

    Array4::from_shape_vec((1, EMBEDDING_WINDOW, MEL_BINS, 1), window)
        .map(Some)
        .map_err(inference_err)
}

struct OpenWakeWordDetector {
    melspec: Session,
    embedding: Session,
    classifier: Session,
    raw_buffer: Vec<i16>,
    mel_buffer: VecDeque<[f32; MEL_BINS]>,
    embedding_buffer: VecDeque<[f32; EMBEDDING_DIM]>,
    chunks_seen: usize,
    last_score: f32,
}

impl OpenWakeWordDetector {
    /// Turn one 1280-sample chunk into mel frames
    fn push_mel_frames(&mut self, chunk: &[i16]) -> Result<()> {
        let audio: Vec<f32> = chunk.iter().map(|&s| f32::from(s)).collect();
        let input = Array2::from_shape_vec((1, chunk.len()), audio).map_err(inference_err)?;
        let tensor = Tensor::from_array(input).map_err(inference_err)?;

        let outputs = self
            .melspec
            .run(ort::inputs![tensor])
            .map_err(inference_err)?;
        let output: ArrayViewD<f32> = outputs[0].try_extract_array().map_err(inference_err)?;

        let shape = output.shape();
        if shape.len() != 4 && shape.len() != 3 {
            return Err(Error::WakeWord(format!(
                "unexpected melspectrogram shape {shape:?}"
            )));
        }

        // [1, 1, frames, bins] or [1, frames, bins]
        let values: Vec<f32> = output.iter().copied().collect();
        for row in values.chunks_exact(MEL_BINS) {
            let mut mel_frame = [0.0f32; MEL_BINS];
            for (bin, value) in mel_frame.iter_mut().zip(row) {
                *bin = value / 10.0 + 2.0;
            }

            if self.mel_buffer.len() >= MAX_MEL_FRAMES {
                self.mel_buffer.pop_front();
            }
            self.mel_buffer.push_back(mel_frame);
        }

        Ok(())
    }

    /// Embed the most recent full window of mel frames
    ///
    /// Each chunk adds eight mel frames, so one embedding per chunk keeps
    /// the embedding stride at eight frames.
    fn push_embeddings(&mut self) -> Result<()> {
        let Some(input) = latest_mel_window(&self.mel_buffer)? else {
            return Ok(());
        };
        let tensor = Tensor::from_array(input).map_err(inference_err)?;

        let outputs = self
            .embedding
            .run(ort::inputs![tensor])
            .map_err(inference_err)?;
        let output: ArrayViewD<f32> = outputs[0].try_extract_array().map_err(inference_err)?;

        let values: Vec<f32> = output.iter().copied().collect();
        for row in values.chunks_exact(EMBEDDING_DIM) {
            let mut embedding = [0.0f32; EMBEDDING_DIM];
            embedding.copy_from_slice(row);

            if self.embedding_buffer.len() >= MAX_EMBEDDINGS {
                self.embedding_buffer.pop_front();
            }
            self.embedding_buffer.push_back(embedding);
        }

        Ok(())
    }

    fn classify(&mut self) -> Result<f32> {
        if self.embedding_buffer.len() < CLASSIFICATION_FRAMES {
            return Ok(0.0);
        }

        let mut data = Vec::with_capacity(CLASSIFICATION_FRAMES * EMBEDDING_DIM);
        for embedding in self
            .embedding_buffer
            .iter()
            .skip(self.embedding_buffer.len() - CLASSIFICATION_FRAMES)
        {
            data.extend_from_slice(embedding);
        }

        let input = Array3::from_shape_vec((1, CLASSIFICATION_FRAMES, EMBEDDING_DIM), data)
            .map_err(inference_err)?;
        let tensor = Tensor::from_array(input).map_err(inference_err)?;

        let outputs = self
            .classifier
            .run(ort::inputs![tensor])
            .map_err(inference_err)?;
        let output: ArrayViewD<f32> = outputs[0].try_extract_array().map_err(inference_err)?;

        Ok(output.iter().next().copied().unwrap_or(0.0))
    }
}

impl WakeWordDetector for OpenWakeWordDetector {
    fn score(&mut self, frame: &AudioFrame) -> Result<f32> {
        self.raw_buffer.extend_from_slice(frame.samples());
        if self.raw_buffer.len() < FRAME_SAMPLES {
            return Ok(self.last_score);
        }

        while self.raw_buffer.len() >= FRAME_SAMPLES {
            let chunk: Vec<i16> = self.raw_buffer.drain(..FRAME_SAMPLES).collect();
            self.push_mel_frames(&chunk)?;
            self.chunks_seen += 1;
        }

        self.push_embeddings()?;
        let mut score = self.classify()?;

        if self.chunks_seen <= WARMUP_CHUNKS {
            score = 0.0;
        }

        self.last_score = score;
        Ok(score)
    }

    fn reset(&mut self) {
        self.raw_buffer.clear();
        self.mel_buffer.clear();
        self.embedding_buffer.clear();
        self.chunks_seen = 0;
        self.last_score = 0.0;
    }
}
