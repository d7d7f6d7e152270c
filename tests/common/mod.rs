//! Shared test utilities
//!
//! Scripted stand-ins for audio hardware, wake word models and TTS so the
//! engine and speech queue can be driven deterministically.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use voice_frontend::error::{CaptureError, WakeWordInitError};
use voice_frontend::voice::{
    AudioClip, AudioFrame, AudioInput, AudioSink, BackendSlot, DetectorProvider, FRAME_SAMPLES,
    FrameSource, SpeechSynthesizer, WakeWordBackends, WakeWordDetector,
};
use voice_frontend::{Error, Result};

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// A full-length frame of zeros
pub fn zero_frame() -> AudioFrame {
    AudioFrame::silent(FRAME_SAMPLES)
}

/// A full-length frame well above the default silence threshold
pub fn loud_frame() -> AudioFrame {
    AudioFrame::new(vec![4000; FRAME_SAMPLES])
}

/// One scripted read result
#[derive(Debug, Clone)]
pub enum Step {
    Frame(AudioFrame),
    Overrun(usize),
}

/// What a scripted source does once its script is used up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum End {
    /// Keep timing out, like a quiet but healthy device
    Idle,
    /// Report the device as gone
    Close,
}

/// Audio input replaying a fixed script
#[derive(Clone)]
pub struct ScriptedInput {
    steps: Vec<Step>,
    end: End,
    available: bool,
    pub opens: Arc<AtomicUsize>,
    pub exhausted: Arc<AtomicBool>,
}

impl ScriptedInput {
    pub fn new(steps: Vec<Step>, end: End) -> Self {
        Self {
            steps,
            end,
            available: true,
            opens: Arc::new(AtomicUsize::new(0)),
            exhausted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Frames only, then idle
    pub fn frames(frames: impl IntoIterator<Item = AudioFrame>) -> Self {
        Self::new(frames.into_iter().map(Step::Frame).collect(), End::Idle)
    }

    /// An input whose device can never be opened
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(Vec::new(), End::Idle)
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }
}

impl AudioInput for ScriptedInput {
    fn open(&self, _frame_samples: usize) -> Result<Box<dyn FrameSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(Error::DeviceUnavailable("no such device".to_string()));
        }

        self.exhausted.store(false, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            steps: self.steps.clone().into_iter(),
            end: self.end,
            exhausted: Arc::clone(&self.exhausted),
        }))
    }
}

struct ScriptedSource {
    steps: std::vec::IntoIter<Step>,
    end: End,
    exhausted: Arc<AtomicBool>,
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> std::result::Result<AudioFrame, CaptureError> {
        match self.steps.next() {
            Some(Step::Frame(frame)) => Ok(frame),
            Some(Step::Overrun(dropped)) => Err(CaptureError::Overrun(dropped)),
            None => {
                // Every earlier frame has been fully processed by now
                self.exhausted.store(true, Ordering::SeqCst);
                match self.end {
                    End::Idle => {
                        std::thread::sleep(Duration::from_millis(2));
                        Err(CaptureError::Timeout)
                    }
                    End::Close => Err(CaptureError::Closed("device unplugged".to_string())),
                }
            }
        }
    }
}

/// Provider whose detectors replay scores by call order
#[derive(Clone)]
pub struct ScriptedProvider {
    name: &'static str,
    scores: Vec<f32>,
    fail_at: Option<usize>,
    needs_credential: bool,
    pub inits: Arc<AtomicUsize>,
    pub calls: Arc<AtomicUsize>,
    pub resets: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(scores: Vec<f32>) -> Self {
        Self {
            name: "scripted",
            scores,
            fail_at: None,
            needs_credential: false,
            inits: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wake on the frame at `index` (zero-based call order), silence otherwise
    pub fn waking_at(index: usize) -> Self {
        let mut scores = vec![0.0; index];
        scores.push(0.9);
        Self::new(scores)
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Fail scoring on call `index`
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn requiring_credential(mut self) -> Self {
        self.needs_credential = true;
        self
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DetectorProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn requires_credential(&self) -> bool {
        self.needs_credential
    }

    fn initialize(
        &self,
        _model_path: &Path,
        _credential: Option<&str>,
    ) -> std::result::Result<Box<dyn WakeWordDetector>, WakeWordInitError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDetector {
            provider: self.clone(),
        }))
    }
}

struct ScriptedDetector {
    provider: ScriptedProvider,
}

impl WakeWordDetector for ScriptedDetector {
    fn score(&mut self, _frame: &AudioFrame) -> Result<f32> {
        let call = self.provider.calls.fetch_add(1, Ordering::SeqCst);
        if self.provider.fail_at == Some(call) {
            return Err(Error::WakeWord("model crashed".to_string()));
        }
        Ok(self.provider.scores.get(call).copied().unwrap_or(0.0))
    }

    fn reset(&mut self) {
        self.provider.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Provider whose initialization always fails
#[derive(Clone, Default)]
pub struct BrokenProvider {
    pub inits: Arc<AtomicUsize>,
}

impl DetectorProvider for BrokenProvider {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn initialize(
        &self,
        model_path: &Path,
        _credential: Option<&str>,
    ) -> std::result::Result<Box<dyn WakeWordDetector>, WakeWordInitError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Err(WakeWordInitError::Model(format!(
            "{}: unsupported model version",
            model_path.display()
        )))
    }
}

/// A file that always exists, usable as a stand-in model asset
pub fn existing_asset() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml")
}

/// Backends with `provider` as primary and nothing behind it
pub fn primary_only(provider: impl DetectorProvider + 'static) -> WakeWordBackends {
    WakeWordBackends::new()
        .with_primary(BackendSlot::new(provider).with_model(Some(existing_asset())))
}

/// Synthesizer recording every text it is asked for
#[derive(Clone, Default)]
pub struct RecordingSynth {
    pub calls: Arc<Mutex<Vec<String>>>,
    fail: HashSet<String>,
    panic: HashSet<String>,
    flaky: Arc<AtomicUsize>,
    delay: Duration,
}

impl RecordingSynth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always fail on `text`
    pub fn failing_on(mut self, text: &str) -> Self {
        self.fail.insert(text.to_string());
        self
    }

    /// Panic on `text`
    pub fn panicking_on(mut self, text: &str) -> Self {
        self.panic.insert(text.to_string());
        self
    }

    /// Fail the first `n` calls whatever the text
    pub fn flaky(self, n: usize) -> Self {
        self.flaky.store(n, Ordering::SeqCst);
        self
    }

    /// Take this long per call
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl SpeechSynthesizer for RecordingSynth {
    fn synthesize(&mut self, text: &str) -> Result<AudioClip> {
        self.calls.lock().unwrap().push(text.to_string());
        std::thread::sleep(self.delay);

        if self.panic.contains(text) {
            panic!("synthesizer blew up on {text:?}");
        }
        if self.fail.contains(text) {
            return Err(Error::Tts(format!("cannot say {text:?}")));
        }
        if self
            .flaky
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Tts("temporarily unavailable".to_string()));
        }

        Ok(AudioClip {
            samples: vec![0.1; text.len()],
            sample_rate: 16000,
        })
    }
}

/// Sink recording the length of every clip it plays
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub played: Arc<Mutex<Vec<usize>>>,
}

impl RecordingSink {
    pub fn played(&self) -> Vec<usize> {
        self.played.lock().unwrap().clone()
    }
}

impl AudioSink for RecordingSink {
    fn play(&mut self, clip: &AudioClip) -> Result<()> {
        self.played.lock().unwrap().push(clip.samples.len());
        Ok(())
    }
}
