//! Wake word detection
//!
//! Detectors score captured frames for wake phrase presence. Each engine run
//! selects exactly one backend: the primary when its credential and model
//! load, otherwise the fallback. The selection never changes mid-run.

#[cfg(feature = "openwakeword")]
mod openwakeword;
#[cfg(feature = "rustpotter")]
mod spotter;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::AudioFrame;
use crate::error::WakeWordInitError;
use crate::{Error, Result};

#[cfg(feature = "openwakeword")]
pub use openwakeword::OpenWakeWordProvider;
#[cfg(feature = "rustpotter")]
pub use spotter::RustpotterProvider;

/// Scores frames for wake phrase presence
///
/// Implementations may keep internal model state across frames. They are
/// created and used on the capture thread only, so they need not be `Send`.
pub trait WakeWordDetector {
    /// Score one frame; `0.0` means no wake phrase, `1.0` certain detection
    ///
    /// Binary detectors report only `0.0` or `1.0`.
    ///
    /// # Errors
    ///
    /// Returns error if the model fails to run; this ends the capture loop
    fn score(&mut self, frame: &AudioFrame) -> Result<f32>;

    /// Drop sliding-window state after an utterance has been captured
    fn reset(&mut self) {}
}

/// Loads a detector from a model asset
pub trait DetectorProvider: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Whether [`initialize`](Self::initialize) needs an access credential
    fn requires_credential(&self) -> bool {
        false
    }

    /// Load the model at `model_path`
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot be loaded
    fn initialize(
        &self,
        model_path: &Path,
        credential: Option<&str>,
    ) -> std::result::Result<Box<dyn WakeWordDetector>, WakeWordInitError>;
}

/// Which configured backend a run ended up using
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The preferred backend
    Primary,
    /// The backend used when the primary cannot be initialized
    Fallback,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Model paths and credential for the wake word backends
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WakeWordConfig {
    /// Model asset for the primary backend
    pub primary_model: Option<PathBuf>,

    /// Access credential for the primary backend, if it needs one
    pub access_key: Option<String>,

    /// Model asset for the fallback backend
    pub fallback_model: Option<PathBuf>,
}

impl fmt::Debug for WakeWordConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeWordConfig")
            .field("primary_model", &self.primary_model)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .field("fallback_model", &self.fallback_model)
            .finish()
    }
}

/// A provider together with the asset and credential it should load
#[derive(Clone)]
pub struct BackendSlot {
    provider: Arc<dyn DetectorProvider>,
    model_path: Option<PathBuf>,
    credential: Option<String>,
}

impl BackendSlot {
    /// Create a slot with no asset or credential configured
    pub fn new(provider: impl DetectorProvider + 'static) -> Self {
        Self {
            provider: Arc::new(provider),
            model_path: None,
            credential: None,
        }
    }

    /// Set the model asset path
    #[must_use]
    pub fn with_model(mut self, path: Option<PathBuf>) -> Self {
        self.model_path = path;
        self
    }

    /// Set the access credential
    #[must_use]
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential.filter(|c| !c.trim().is_empty());
        self
    }

    /// Backend name of the provider in this slot
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.provider.name()
    }

    /// Check credential and asset presence, then initialize the provider
    ///
    /// # Errors
    ///
    /// Returns error if a prerequisite is missing or the provider fails
    pub fn try_initialize(
        &self,
    ) -> std::result::Result<Box<dyn WakeWordDetector>, WakeWordInitError> {
        if self.provider.requires_credential() && self.credential.is_none() {
            return Err(WakeWordInitError::MissingCredential);
        }

        let path = self
            .model_path
            .as_deref()
            .ok_or(WakeWordInitError::AssetNotConfigured)?;

        if !path.exists() {
            return Err(WakeWordInitError::MissingAsset(path.to_path_buf()));
        }

        self.provider.initialize(path, self.credential.as_deref())
    }
}

impl fmt::Debug for BackendSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSlot")
            .field("provider", &self.provider.name())
            .field("model_path", &self.model_path)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// The primary/fallback pair a backend is selected from
#[derive(Debug, Clone, Default)]
pub struct WakeWordBackends {
    primary: Option<BackendSlot>,
    fallback: Option<BackendSlot>,
}

impl WakeWordBackends {
    /// No backends configured; selection always fails
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in backends for the configured assets
    ///
    /// The primary is the openWakeWord ONNX pipeline and the fallback a
    /// rustpotter personal wake word. Backends compiled out of this build
    /// stay configured but fail initialization with a clear cause.
    #[must_use]
    pub fn from_config(config: &WakeWordConfig) -> Self {
        #[cfg(feature = "openwakeword")]
        let primary = BackendSlot::new(OpenWakeWordProvider);
        #[cfg(not(feature = "openwakeword"))]
        let primary = BackendSlot::new(DisabledProvider("openwakeword"));

        #[cfg(feature = "rustpotter")]
        let fallback = BackendSlot::new(RustpotterProvider);
        #[cfg(not(feature = "rustpotter"))]
        let fallback = BackendSlot::new(DisabledProvider("rustpotter"));

        Self::new()
            .with_primary(
                primary
                    .with_model(config.primary_model.clone())
                    .with_credential(config.access_key.clone()),
            )
            .with_fallback(fallback.with_model(config.fallback_model.clone()))
    }

    /// Set the primary backend
    #[must_use]
    pub fn with_primary(mut self, slot: BackendSlot) -> Self {
        self.primary = Some(slot);
        self
    }

    /// Set the fallback backend
    #[must_use]
    pub fn with_fallback(mut self, slot: BackendSlot) -> Self {
        self.fallback = Some(slot);
        self
    }

    /// Pick the backend for one engine run
    ///
    /// Tries the primary first and the fallback on any primary failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoWakeWordBackendAvailable`] if neither initializes
    pub fn select(&self) -> Result<WakeWordBackend> {
        let mut causes = Vec::with_capacity(2);

        for (kind, slot) in [
            (BackendKind::Primary, &self.primary),
            (BackendKind::Fallback, &self.fallback),
        ] {
            let Some(slot) = slot else {
                tracing::info!(%kind, "no wake word backend configured");
                causes.push(format!("{kind}: not configured"));
                continue;
            };

            match slot.try_initialize() {
                Ok(detector) => {
                    tracing::info!(%kind, backend = slot.name(), "wake word backend selected");
                    return Ok(match kind {
                        BackendKind::Primary => WakeWordBackend::Primary(detector),
                        BackendKind::Fallback => WakeWordBackend::Fallback(detector),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        %kind,
                        backend = slot.name(),
                        error = %e,
                        "wake word backend unavailable"
                    );
                    causes.push(format!("{kind} ({}): {e}", slot.name()));
                }
            }
        }

        Err(Error::NoWakeWordBackendAvailable(causes.join("; ")))
    }
}

/// The detector selected for one engine run
pub enum WakeWordBackend {
    /// Running on the primary backend
    Primary(Box<dyn WakeWordDetector>),
    /// Running on the fallback backend
    Fallback(Box<dyn WakeWordDetector>),
}

impl WakeWordBackend {
    /// Which slot this backend came from
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Primary(_) => BackendKind::Primary,
            Self::Fallback(_) => BackendKind::Fallback,
        }
    }

    fn detector(&mut self) -> &mut dyn WakeWordDetector {
        match self {
            Self::Primary(detector) | Self::Fallback(detector) => detector.as_mut(),
        }
    }
}

impl WakeWordDetector for WakeWordBackend {
    fn score(&mut self, frame: &AudioFrame) -> Result<f32> {
        let score = self.detector().score(frame)?;
        if score.is_nan() {
            return Ok(0.0);
        }
        Ok(score.clamp(0.0, 1.0))
    }

    fn reset(&mut self) {
        self.detector().reset();
    }
}

/// Stands in for a backend whose cargo feature is disabled
#[cfg_attr(all(feature = "openwakeword", feature = "rustpotter"), allow(dead_code))]
struct DisabledProvider(&'static str);

impl DetectorProvider for DisabledProvider {
    fn name(&self) -> &'static str {
        self.0
    }

    fn initialize(
        &self,
        _model_path: &Path,
        _credential: Option<&str>,
    ) -> std::result::Result<Box<dyn WakeWordDetector>, WakeWordInitError> {
        Err(WakeWordInitError::Disabled(self.0))
    }
}
