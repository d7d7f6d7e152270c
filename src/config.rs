//! Configuration management for the voice front-end
//!
//! Values are resolved env > toml > default.

pub mod file;

use std::path::{Path, PathBuf};

use crate::voice::{DEFAULT_CALLBACK_WORKERS, SegmenterConfig, SpeechConfig, WakeWordConfig};
use crate::{Error, Result};

use file::ConfigFile;

/// Voice front-end configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Segmentation parameters
    pub segmenter: SegmenterConfig,

    /// Wake word model assets and credential
    pub wake_word: WakeWordConfig,

    /// Threads running engine callbacks
    pub callback_workers: usize,

    /// Speech output settings
    pub speech: SpeechConfig,

    /// Input device name (default device if unset)
    pub input_device: Option<String>,

    /// Directory completed utterances are written to
    pub utterance_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segmenter: SegmenterConfig::default(),
            wake_word: WakeWordConfig::default(),
            callback_workers: DEFAULT_CALLBACK_WORKERS,
            speech: SpeechConfig::default(),
            input_device: None,
            utterance_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// `path` overrides the standard config file location.
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = path
            .map(Path::to_path_buf)
            .or_else(file::config_file_path)
            .map(|p| file::load_config_file(&p))
            .unwrap_or_default();

        let config = Self::resolve(fc, &|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay a parsed config file and environment lookup onto defaults
    #[must_use]
    pub fn resolve(fc: ConfigFile, env: &dyn Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let max_capture_frames = env_parse(env, "VOICE_MAX_CAPTURE_FRAMES")
            .or(fc.engine.max_capture_frames)
            .map_or(defaults.segmenter.max_capture_frames, |frames: usize| {
                (frames > 0).then_some(frames)
            });

        let segmenter = SegmenterConfig {
            pre_roll_frames: env_parse(env, "VOICE_PRE_ROLL_FRAMES")
                .or(fc.engine.pre_roll_frames)
                .unwrap_or(defaults.segmenter.pre_roll_frames),
            activation_threshold: env_parse(env, "VOICE_WAKE_THRESHOLD")
                .or(fc.engine.activation_threshold)
                .unwrap_or(defaults.segmenter.activation_threshold),
            silence_threshold: env_parse(env, "VOICE_SILENCE_THRESHOLD")
                .or(fc.engine.silence_threshold)
                .unwrap_or(defaults.segmenter.silence_threshold),
            max_capture_frames,
            ..defaults.segmenter
        };

        let wake_word = WakeWordConfig {
            primary_model: env("VOICE_WAKE_MODEL")
                .map(PathBuf::from)
                .or(fc.wake_word.primary_model),
            access_key: env("VOICE_WAKE_ACCESS_KEY").or(fc.wake_word.access_key),
            fallback_model: env("VOICE_WAKE_FALLBACK_MODEL")
                .map(PathBuf::from)
                .or(fc.wake_word.fallback_model),
        };

        let speech = SpeechConfig {
            tts_command: env("VOICE_TTS_COMMAND")
                .map(|cmd| cmd.split_whitespace().map(str::to_string).collect())
                .or(fc.speech.tts_command)
                .unwrap_or(defaults.speech.tts_command),
            max_attempts: env_parse(env, "VOICE_TTS_MAX_ATTEMPTS")
                .or(fc.speech.max_attempts)
                .unwrap_or(defaults.speech.max_attempts),
        };

        Self {
            segmenter,
            wake_word,
            callback_workers: env_parse(env, "VOICE_CALLBACK_WORKERS")
                .or(fc.engine.callback_workers)
                .unwrap_or(defaults.callback_workers),
            speech,
            input_device: env("VOICE_INPUT_DEVICE").or(fc.audio.input_device),
            utterance_dir: env("VOICE_UTTERANCE_DIR")
                .map(PathBuf::from)
                .or(fc.audio.utterance_dir),
        }
    }

    /// Reject values the engine cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid value
    pub fn validate(&self) -> Result<()> {
        let s = &self.segmenter;

        if s.frame_samples == 0 {
            return Err(Error::Config("frame size must be non-zero".to_string()));
        }
        if s.sample_rate == 0 {
            return Err(Error::Config("sample rate must be non-zero".to_string()));
        }
        if s.pre_roll_frames == 0 {
            return Err(Error::Config("pre-roll depth must be non-zero".to_string()));
        }
        if !(0.0..=1.0).contains(&s.activation_threshold) {
            return Err(Error::Config(format!(
                "activation threshold must be within [0, 1], got {}",
                s.activation_threshold
            )));
        }
        if !s.silence_threshold.is_finite() || s.silence_threshold < 0.0 {
            return Err(Error::Config(format!(
                "silence threshold must be a non-negative number, got {}",
                s.silence_threshold
            )));
        }
        if s.max_capture_frames == Some(0) {
            return Err(Error::Config("max capture frames must be non-zero".to_string()));
        }
        if self.callback_workers == 0 {
            return Err(Error::Config("callback workers must be non-zero".to_string()));
        }
        if self.speech.tts_command.is_empty() {
            return Err(Error::Config("TTS command is empty".to_string()));
        }
        if self.speech.max_attempts == 0 {
            return Err(Error::Config("max attempts must be non-zero".to_string()));
        }

        Ok(())
    }
}

/// Parse an environment value, ignoring (and logging) malformed ones
fn env_parse<T: std::str::FromStr>(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring malformed environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(ConfigFile::default(), &env_of(&[]));

        assert_eq!(config, Config::default());
        assert_eq!(config.segmenter.frame_samples, 1280);
        assert_eq!(config.segmenter.sample_rate, 16000);
        assert_eq!(config.segmenter.pre_roll_frames, 15);
        assert_eq!(config.segmenter.max_capture_frames, Some(375));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let fc = file::parse(
            r#"
            [engine]
            activation_threshold = 0.7
            silence_threshold = 300.0

            [wake_word]
            primary_model = "/models/file.onnx"
            "#,
        )
        .unwrap();

        let config = Config::resolve(
            fc,
            &env_of(&[
                ("VOICE_WAKE_THRESHOLD", "0.8"),
                ("VOICE_WAKE_MODEL", "/models/env.onnx"),
                ("VOICE_TTS_COMMAND", "piper --output_file -"),
            ]),
        );

        assert!((config.segmenter.activation_threshold - 0.8).abs() < f32::EPSILON);
        assert!((config.segmenter.silence_threshold - 300.0).abs() < f64::EPSILON);
        assert_eq!(
            config.wake_word.primary_model,
            Some(PathBuf::from("/models/env.onnx"))
        );
        assert_eq!(config.speech.tts_command, vec!["piper", "--output_file", "-"]);
    }

    #[test]
    fn test_malformed_env_falls_back() {
        let config = Config::resolve(
            ConfigFile::default(),
            &env_of(&[("VOICE_PRE_ROLL_FRAMES", "lots")]),
        );
        assert_eq!(config.segmenter.pre_roll_frames, 15);
    }

    #[test]
    fn test_zero_max_capture_disables_cap() {
        let config = Config::resolve(
            ConfigFile::default(),
            &env_of(&[("VOICE_MAX_CAPTURE_FRAMES", "0")]),
        );
        assert_eq!(config.segmenter.max_capture_frames, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.segmenter.pre_roll_frames = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.segmenter.activation_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.segmenter.activation_threshold = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.segmenter.frame_samples = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.speech.tts_command.clear();
        assert!(config.validate().is_err());
    }
}
