//! Wake-then-capture segmentation state machine
//!
//! The segmenter is driven one frame at a time by the capture loop and owns
//! the pre-roll ring and the in-progress capture session. It never blocks and
//! never calls user code; it only reports what happened.

use std::collections::VecDeque;

use super::silence::{self, DEFAULT_SILENCE_THRESHOLD};
use super::wake_word::WakeWordDetector;
use super::{AudioFrame, FRAME_SAMPLES, SAMPLE_RATE, Utterance};
use crate::Result;

/// Frames of audio kept from before a wake detection (~1.2s)
pub const DEFAULT_PRE_ROLL_FRAMES: usize = 15;

/// Score a frame must exceed to count as a wake detection
pub const DEFAULT_ACTIVATION_THRESHOLD: f32 = 0.5;

/// Longest utterance before it is finalized without silence (30s)
pub const DEFAULT_MAX_CAPTURE_FRAMES: usize = 375;

/// Segmentation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterConfig {
    /// Samples per captured frame
    pub frame_samples: usize,

    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Depth of the pre-roll ring in frames
    pub pre_roll_frames: usize,

    /// Wake score a frame must exceed
    pub activation_threshold: f32,

    /// RMS amplitude below which a frame is silent
    pub silence_threshold: f64,

    /// Finalize an utterance once it holds this many frames (`None` = unbounded)
    pub max_capture_frames: Option<usize>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            frame_samples: FRAME_SAMPLES,
            sample_rate: SAMPLE_RATE,
            pre_roll_frames: DEFAULT_PRE_ROLL_FRAMES,
            activation_threshold: DEFAULT_ACTIVATION_THRESHOLD,
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            max_capture_frames: Some(DEFAULT_MAX_CAPTURE_FRAMES),
        }
    }
}

/// State of the segmentation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Scoring frames for the wake phrase
    ListeningForWake,
    /// Wake phrase heard, accumulating the command until silence
    CapturingCommand,
}

/// Bounded FIFO of the most recent frames
#[derive(Debug, Clone)]
pub struct PreRollBuffer {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
}

impl PreRollBuffer {
    /// Create an empty buffer holding at most `capacity` frames
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest when full
    pub fn push(&mut self, frame: AudioFrame) {
        if self.capacity == 0 {
            return;
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Frames currently held, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &AudioFrame> {
        self.frames.iter()
    }

    /// Number of frames currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the buffer holds no frames
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Maximum number of frames held
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all frames
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Frames of one in-progress utterance
#[derive(Debug, Clone, Default)]
pub struct CaptureSession {
    frames: Vec<AudioFrame>,
}

impl CaptureSession {
    /// Start a session from a copy of the pre-roll
    #[must_use]
    pub fn seeded(pre_roll: &PreRollBuffer) -> Self {
        Self {
            frames: pre_roll.iter().cloned().collect(),
        }
    }

    /// Append a captured frame
    pub fn push(&mut self, frame: AudioFrame) {
        self.frames.push(frame);
    }

    /// Frames captured so far, seed frames first
    #[must_use]
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    /// Number of frames captured so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the session holds no frames
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Join every frame into one utterance
    #[must_use]
    pub fn finish(self, sample_rate: u32) -> Utterance {
        Utterance::join(&self.frames, sample_rate)
    }
}

/// Something the capture loop must hand to the callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    /// The wake phrase was detected
    Wake {
        /// Score of the triggering frame
        score: f32,
    },
    /// An utterance was completed
    Command(Utterance),
}

#[derive(Debug)]
enum Phase {
    Listening,
    Capturing(CaptureSession),
}

/// Frame-driven wake/capture state machine
#[derive(Debug)]
pub struct Segmenter {
    config: SegmenterConfig,
    pre_roll: PreRollBuffer,
    phase: Phase,
}

impl Segmenter {
    /// Create a segmenter in the listening state
    #[must_use]
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            pre_roll: PreRollBuffer::new(config.pre_roll_frames),
            config,
            phase: Phase::Listening,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> EngineState {
        match self.phase {
            Phase::Listening => EngineState::ListeningForWake,
            Phase::Capturing(_) => EngineState::CapturingCommand,
        }
    }

    /// The pre-roll ring
    #[must_use]
    pub const fn pre_roll(&self) -> &PreRollBuffer {
        &self.pre_roll
    }

    /// The in-progress session, only present while capturing
    #[must_use]
    pub const fn session(&self) -> Option<&CaptureSession> {
        match &self.phase {
            Phase::Listening => None,
            Phase::Capturing(session) => Some(session),
        }
    }

    /// Feed one frame
    ///
    /// While listening the frame enters the pre-roll and is scored by
    /// `detector`; while capturing it is appended to the session and checked
    /// for silence. The detector is never consulted while capturing.
    ///
    /// # Errors
    ///
    /// Returns error if the detector fails to score the frame
    pub fn process(
        &mut self,
        frame: AudioFrame,
        detector: &mut dyn WakeWordDetector,
    ) -> Result<Option<SegmentEvent>> {
        match &mut self.phase {
            Phase::Listening => self.listen(frame, detector),
            Phase::Capturing(session) => {
                let silent = silence::is_silent(&frame, self.config.silence_threshold);
                session.push(frame);

                let capped = self
                    .config
                    .max_capture_frames
                    .is_some_and(|max| session.len() >= max);

                if capped && !silent {
                    tracing::warn!(
                        frames = session.len(),
                        "utterance reached maximum length, finalizing"
                    );
                }

                if silent || capped {
                    Ok(self.finalize(detector).map(SegmentEvent::Command))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn listen(
        &mut self,
        frame: AudioFrame,
        detector: &mut dyn WakeWordDetector,
    ) -> Result<Option<SegmentEvent>> {
        let score = detector.score(&frame)?;
        self.pre_roll.push(frame);

        if score <= self.config.activation_threshold {
            return Ok(None);
        }

        let session = CaptureSession::seeded(&self.pre_roll);
        tracing::debug!(score, seed_frames = session.len(), "wake word detected");
        self.phase = Phase::Capturing(session);

        Ok(Some(SegmentEvent::Wake { score }))
    }

    fn finalize(&mut self, detector: &mut dyn WakeWordDetector) -> Option<Utterance> {
        let Phase::Capturing(session) = std::mem::replace(&mut self.phase, Phase::Listening)
        else {
            return None;
        };

        self.pre_roll.clear();
        detector.reset();

        let utterance = session.finish(self.config.sample_rate);
        tracing::debug!(
            frames = utterance.frames,
            duration_ms = utterance.duration().as_millis(),
            "utterance complete"
        );
        Some(utterance)
    }
}
