//! Segmentation engine
//!
//! Owns the capture thread. Each run selects a wake word backend, opens the
//! input device on the capture thread, and feeds frames through a
//! [`Segmenter`] until stopped or until the device fails. Callbacks are handed
//! to a [`CallbackDispatcher`] and never run on the capture thread.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

use super::capture::{AudioInput, FrameSource};
use super::dispatch::{
    CallbackDispatcher, Callbacks, DEFAULT_CALLBACK_WORKERS, Event, EventSender, panic_message,
};
use super::segmenter::{SegmentEvent, Segmenter, SegmenterConfig};
use super::wake_word::{BackendKind, WakeWordBackend, WakeWordBackends};
use super::Utterance;
use crate::error::CaptureError;
use crate::{Error, Result};

/// Lifecycle of the engine as seen by its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    /// Never started
    Idle,
    /// Capture loop running on the selected backend
    Running {
        /// Backend chosen for this run
        backend: BackendKind,
    },
    /// Stopped on request
    Stopped,
    /// Ended by a fatal error
    Failed(String),
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running { backend } => write!(f, "running ({backend} backend)"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Asks a running engine to stop without waiting for it
///
/// Safe to use from inside a callback, unlike [`SegmentationEngine::stop`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Signal the capture loop; it exits within one poll interval
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

struct Run {
    thread: JoinHandle<()>,
    dispatcher: CallbackDispatcher,
}

/// Wake-then-capture engine driving one input device
pub struct SegmentationEngine {
    config: SegmenterConfig,
    input: Arc<dyn AudioInput>,
    backends: WakeWordBackends,
    callbacks: Callbacks,
    callback_workers: usize,
    status: Arc<Mutex<EngineStatus>>,
    stop_flag: Arc<AtomicBool>,
    run: Option<Run>,
}

impl SegmentationEngine {
    /// Create an idle engine
    pub fn new(
        config: SegmenterConfig,
        input: impl AudioInput + 'static,
        backends: WakeWordBackends,
    ) -> Self {
        Self {
            config,
            input: Arc::new(input),
            backends,
            callbacks: Callbacks::default(),
            callback_workers: DEFAULT_CALLBACK_WORKERS,
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            run: None,
        }
    }

    /// Called once per wake detection
    #[must_use]
    pub fn on_wake(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.callbacks.on_wake = Some(Arc::new(f));
        self
    }

    /// Called once per completed utterance
    #[must_use]
    pub fn on_command(mut self, f: impl Fn(Utterance) + Send + Sync + 'static) -> Self {
        self.callbacks.on_command = Some(Arc::new(f));
        self
    }

    /// Called once when a run ends, with the final status
    #[must_use]
    pub fn on_stopped(mut self, f: impl Fn(&EngineStatus) + Send + Sync + 'static) -> Self {
        self.callbacks.on_stopped = Some(Arc::new(f));
        self
    }

    /// Number of threads running callbacks (at least one)
    #[must_use]
    pub fn with_callback_workers(mut self, workers: usize) -> Self {
        self.callback_workers = workers.max(1);
        self
    }

    /// Select a wake word backend, open the device and start capturing
    ///
    /// Returns once the capture thread is listening. Calling this while a
    /// run is active does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoWakeWordBackendAvailable`] if no backend
    /// initializes, or [`Error::DeviceUnavailable`] if the device cannot be
    /// opened. No run is left behind in either case.
    pub fn start(&mut self) -> Result<()> {
        if let Some(run) = &self.run {
            let active = !run.thread.is_finished()
                && self.is_running()
                && !self.stop_flag.load(Ordering::Acquire);
            if active {
                tracing::debug!("engine already running");
                return Ok(());
            }
            // Previous run ended or is ending; reap it first
            self.stop();
        }

        self.stop_flag.store(false, Ordering::Release);

        let mut dispatcher = CallbackDispatcher::spawn(&self.callbacks, self.callback_workers)?;
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let ctx = CaptureContext {
            config: self.config.clone(),
            input: Arc::clone(&self.input),
            backends: self.backends.clone(),
            stop_flag: Arc::clone(&self.stop_flag),
            status: Arc::clone(&self.status),
            events: dispatcher.sender(),
        };

        let thread = match thread::Builder::new()
            .name("voice-capture".to_string())
            .spawn(move || ctx.run(&ready_tx))
        {
            Ok(thread) => thread,
            Err(e) => {
                dispatcher.shutdown();
                return Err(Error::Worker(format!("failed to spawn capture thread: {e}")));
            }
        };

        let startup = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(Error::Worker("capture thread exited during startup".into())));

        match startup {
            Ok(backend) => {
                tracing::info!(%backend, "voice engine started");
                self.run = Some(Run { thread, dispatcher });
                Ok(())
            }
            Err(e) => {
                if thread.join().is_err() {
                    tracing::warn!("capture thread panicked during startup");
                }
                dispatcher.shutdown();
                Err(e)
            }
        }
    }

    /// Stop capturing and release the device
    ///
    /// Blocks until the capture thread has exited and every queued callback
    /// has run. Must not be called from inside a callback; use a
    /// [`StopHandle`] there.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);

        let Some(mut run) = self.run.take() else {
            return;
        };

        if let Err(payload) = run.thread.join() {
            let reason = format!("capture thread panicked: {}", panic_message(payload.as_ref()));
            tracing::error!(%reason, "voice engine crashed");
            set_status(&self.status, EngineStatus::Failed(reason));
        }

        run.dispatcher.shutdown();
        tracing::info!(status = %self.status(), "voice engine stopped");
    }

    /// Current lifecycle status
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the capture loop is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.status(), EngineStatus::Running { .. })
    }

    /// Handle that can request a stop from any thread
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop_flag),
        }
    }
}

impl Drop for SegmentationEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn set_status(status: &Mutex<EngineStatus>, value: EngineStatus) {
    *status.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

/// Everything the capture thread owns for one run
struct CaptureContext {
    config: SegmenterConfig,
    input: Arc<dyn AudioInput>,
    backends: WakeWordBackends,
    stop_flag: Arc<AtomicBool>,
    status: Arc<Mutex<EngineStatus>>,
    events: Option<EventSender>,
}

impl CaptureContext {
    fn run(self, ready: &Sender<Result<BackendKind>>) {
        let (mut backend, mut source) = match self.acquire() {
            Ok(acquired) => acquired,
            Err(e) => {
                set_status(&self.status, EngineStatus::Failed(e.to_string()));
                let _ = ready.send(Err(e));
                return;
            }
        };

        let kind = backend.kind();
        set_status(&self.status, EngineStatus::Running { backend: kind });
        let _ = ready.send(Ok(kind));

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.capture_loop(source.as_mut(), &mut backend)
        }));

        // Release the device before reporting
        drop(source);

        let status = match outcome {
            Ok(Ok(())) => EngineStatus::Stopped,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "capture loop failed");
                EngineStatus::Failed(e.to_string())
            }
            Err(payload) => {
                let reason = format!("capture loop panicked: {}", panic_message(payload.as_ref()));
                tracing::error!(%reason, "capture loop failed");
                EngineStatus::Failed(reason)
            }
        };

        set_status(&self.status, status.clone());
        self.emit(Event::Stopped(status));
    }

    fn acquire(&self) -> Result<(WakeWordBackend, Box<dyn FrameSource>)> {
        let backend = self.backends.select()?;
        let source = self.input.open(self.config.frame_samples)?;
        Ok((backend, source))
    }

    fn capture_loop(
        &self,
        source: &mut dyn FrameSource,
        backend: &mut WakeWordBackend,
    ) -> Result<()> {
        let mut segmenter = Segmenter::new(self.config.clone());
        let mut overruns = 0u64;

        while !self.stop_flag.load(Ordering::Acquire) {
            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(CaptureError::Timeout) => continue,
                Err(CaptureError::Overrun(dropped)) => {
                    overruns += 1;
                    tracing::warn!(dropped, overruns, "input overrun, audio dropped");
                    continue;
                }
                Err(CaptureError::Closed(reason)) => {
                    return Err(Error::FrameReadFailure(reason));
                }
            };

            match segmenter.process(frame, backend)? {
                Some(SegmentEvent::Wake { score }) => {
                    tracing::info!(score, "wake word detected");
                    self.emit(Event::Wake);
                }
                Some(SegmentEvent::Command(utterance)) => {
                    tracing::info!(
                        frames = utterance.frames,
                        duration_ms = utterance.duration().as_millis(),
                        "command captured"
                    );
                    self.emit(Event::Command(utterance));
                }
                None => {}
            }
        }

        Ok(())
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            if !events.send(event) {
                tracing::warn!("callback dispatcher gone, event dropped");
            }
        }
    }
}
