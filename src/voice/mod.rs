//! Voice processing module
//!
//! Handles audio capture, wake word detection, utterance segmentation and
//! serialized speech output. Transcription and intent handling live with
//! whoever receives the captured utterances.

mod capture;
mod dispatch;
mod engine;
mod frame;
mod playback;
mod segmenter;
pub mod silence;
mod speech_queue;
mod tts;
pub mod wake_word;

pub use capture::{AudioInput, CpalInput, FrameSource, POLL_INTERVAL};
pub use dispatch::DEFAULT_CALLBACK_WORKERS;
pub use engine::{EngineStatus, SegmentationEngine, StopHandle};
pub use frame::{AudioFrame, FRAME_SAMPLES, SAMPLE_RATE, Utterance};
pub use playback::AudioPlayback;
pub use segmenter::{
    CaptureSession, DEFAULT_ACTIVATION_THRESHOLD, DEFAULT_MAX_CAPTURE_FRAMES,
    DEFAULT_PRE_ROLL_FRAMES, EngineState, PreRollBuffer, SegmentEvent, Segmenter,
    SegmenterConfig,
};
pub use silence::{DEFAULT_SILENCE_THRESHOLD, is_silent};
pub use speech_queue::{SpeechConfig, SpeechHandle, SpeechQueue, SpeechRequest};
pub use tts::{
    AudioClip, AudioSink, CommandSynthesizer, SpeakerSink, SpeechSynthesizer, decode_audio,
};
pub use wake_word::{
    BackendKind, BackendSlot, DetectorProvider, WakeWordBackend, WakeWordBackends,
    WakeWordConfig, WakeWordDetector,
};
