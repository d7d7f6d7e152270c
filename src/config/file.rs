//! TOML configuration file loading
//!
//! Supports `~/.config/voice-frontend/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Segmentation and callback settings
    #[serde(default)]
    pub engine: EngineFileConfig,

    /// Wake word model assets
    #[serde(default)]
    pub wake_word: WakeWordFileConfig,

    /// Speech output settings
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Audio devices and output locations
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Segmentation configuration
#[derive(Debug, Default, Deserialize)]
pub struct EngineFileConfig {
    /// Frames kept from before the wake phrase
    pub pre_roll_frames: Option<usize>,

    /// Wake score a frame must exceed (0.0 - 1.0)
    pub activation_threshold: Option<f32>,

    /// RMS amplitude below which a frame is silent
    pub silence_threshold: Option<f64>,

    /// Utterance length cap in frames; 0 disables the cap
    pub max_capture_frames: Option<usize>,

    /// Threads running callbacks
    pub callback_workers: Option<usize>,
}

/// Wake word backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeWordFileConfig {
    /// Primary (openWakeWord classifier) model path
    pub primary_model: Option<PathBuf>,

    /// Access credential for the primary backend
    pub access_key: Option<String>,

    /// Fallback (rustpotter) model path
    pub fallback_model: Option<PathBuf>,
}

/// Speech output configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// TTS program and arguments (e.g. `["espeak-ng", "--stdout"]`)
    pub tts_command: Option<Vec<String>>,

    /// Attempts per request
    pub max_attempts: Option<u32>,
}

/// Audio device configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Input device name (default device if unset)
    pub input_device: Option<String>,

    /// Directory completed utterances are written to
    pub utterance_dir: Option<PathBuf>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the contents are not valid TOML for this schema
pub fn parse(content: &str) -> Result<ConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file at `path`
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: &Path) -> ConfigFile {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file");
        return ConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voice-frontend/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-frontend").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_file() {
        let file = parse(
            r#"
            [engine]
            activation_threshold = 0.7

            [speech]
            tts_command = ["piper", "--output_file", "-"]
            "#,
        )
        .unwrap();

        assert_eq!(file.engine.activation_threshold, Some(0.7));
        assert!(file.engine.pre_roll_frames.is_none());
        assert_eq!(
            file.speech.tts_command.as_deref(),
            Some(&["piper".to_string(), "--output_file".to_string(), "-".to_string()][..])
        );
        assert!(file.wake_word.primary_model.is_none());
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        assert!(parse("[engine]\npre_roll_frames = \"many\"").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let file = load_config_file(&dir.path().join("absent.toml"));
        assert!(file.audio.input_device.is_none());
    }

    #[test]
    fn test_unparsable_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();

        let file = load_config_file(&path);
        assert!(file.engine.silence_threshold.is_none());
    }
}
