//! Error types for the voice front-end

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for voice front-end operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice front-end
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The audio input device could not be opened
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Audio error outside of device acquisition (playback, encoding)
    #[error("audio error: {0}")]
    Audio(String),

    /// The capture stream failed while running
    #[error("frame read failure: {0}")]
    FrameReadFailure(String),

    /// Wake word scoring failed mid-stream
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Neither the primary nor the fallback wake word backend could be initialized
    #[error("no wake word backend available: {0}")]
    NoWakeWordBackendAvailable(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// A worker thread could not be spawned or joined
    #[error("worker error: {0}")]
    Worker(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Why a wake word backend failed to initialize
///
/// Only ever fatal during backend selection, where it triggers the fallback.
#[derive(Debug, Error)]
pub enum WakeWordInitError {
    /// The backend needs an access credential and none was configured
    #[error("access credential missing")]
    MissingCredential,

    /// No model asset path was configured for the backend
    #[error("model asset not configured")]
    AssetNotConfigured,

    /// The configured model asset does not exist
    #[error("model asset not found: {}", .0.display())]
    MissingAsset(PathBuf),

    /// The model exists but the backend rejected it
    #[error("model initialization failed: {0}")]
    Model(String),

    /// The backend was compiled out of this build
    #[error("backend not compiled in (enable the `{0}` feature)")]
    Disabled(&'static str),
}

/// Conditions reported by a frame source on a single read
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device overflowed and audio was lost; the read can be retried
    #[error("input overflowed, dropped {0} samples")]
    Overrun(usize),

    /// No complete frame arrived within the poll interval
    #[error("no frame within poll interval")]
    Timeout,

    /// The device closed or failed; no further frames will arrive
    #[error("capture stream closed: {0}")]
    Closed(String),
}
