//! Voice front-end - always-on wake word capture for voice assistants
//!
//! This library provides the real-time half of a voice assistant:
//! - Microphone capture in fixed 80 ms frames
//! - Wake word detection with a primary/fallback backend pair
//! - Utterance segmentation (pre-roll, capture until silence)
//! - Serialized speech output on a dedicated worker
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   frames   ┌────────────────────┐  on_wake / on_command
//! │ FrameSource  ├───────────►│ SegmentationEngine ├──────────────────────►  transcription,
//! └──────────────┘            │  pre-roll, session │   (callback workers)     intent, LLM
//!                             └─────────┬──────────┘                              │
//!                                       │ score / is_silent                       │ text
//!                             ┌─────────▼──────────┐   ┌──────────────┐          │
//!                             │ WakeWordBackend    │   │ SpeechQueue  │◄─────────┘
//!                             │ primary | fallback │   │ synth → play │
//!                             └────────────────────┘   └──────────────┘
//! ```

pub mod config;
pub mod error;
pub mod voice;

pub use config::Config;
pub use error::{CaptureError, Error, Result, WakeWordInitError};
pub use voice::{
    EngineStatus, SegmentationEngine, SpeechHandle, SpeechQueue, Utterance, WakeWordBackends,
};
