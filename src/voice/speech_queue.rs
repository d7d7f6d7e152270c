//! Serialized speech output
//!
//! One worker thread owns the synthesizer and the output sink and handles
//! requests strictly in enqueue order, one at a time. Enqueueing never
//! blocks, so the capture path can speak without waiting on audio output.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use super::dispatch::panic_message;
use super::tts::{AudioSink, CommandSynthesizer, SpeakerSink, SpeechSynthesizer};
use crate::{Error, Result};

/// Pause between attempts at a failed request
const RETRY_PAUSE: Duration = Duration::from_millis(250);

/// Speech output settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechConfig {
    /// TTS program and arguments, see [`CommandSynthesizer`]
    pub tts_command: Vec<String>,

    /// Attempts per request before it is dropped (at least one)
    pub max_attempts: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            tts_command: vec!["espeak-ng".to_string(), "--stdout".to_string()],
            max_attempts: 1,
        }
    }
}

/// One line of text waiting to be spoken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    /// Position in enqueue order, starting at zero
    pub ordinal: u64,
    /// Text to speak
    pub text: String,
}

#[derive(Debug)]
enum Message {
    Speak(SpeechRequest),
    Stop,
}

/// Ordinal counter and open flag, held across every send
#[derive(Debug, Default)]
struct Gate {
    next_ordinal: u64,
    closed: bool,
}

/// Cloneable enqueue side of a [`SpeechQueue`]
#[derive(Debug, Clone)]
pub struct SpeechHandle {
    tx: Sender<Message>,
    gate: Arc<Mutex<Gate>>,
}

impl SpeechHandle {
    /// Queue `text` for speaking and return its ordinal
    ///
    /// Returns `None` without queueing if the text is blank or the queue
    /// has been stopped.
    pub fn enqueue(&self, text: impl Into<String>) -> Option<u64> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }

        // Nothing may land behind the stop sentinel
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if gate.closed {
            return None;
        }

        let ordinal = gate.next_ordinal;
        self.tx
            .send(Message::Speak(SpeechRequest { ordinal, text }))
            .ok()?;
        gate.next_ordinal += 1;
        Some(ordinal)
    }
}

/// FIFO speech worker
pub struct SpeechQueue {
    handle: SpeechHandle,
    rx: Receiver<Message>,
    worker: Option<JoinHandle<()>>,
}

impl SpeechQueue {
    /// Start a worker thread around `synthesizer` and `sink`
    ///
    /// # Errors
    ///
    /// Returns error if the worker thread cannot be spawned
    pub fn new(
        synthesizer: impl SpeechSynthesizer + 'static,
        sink: impl AudioSink + 'static,
        max_attempts: u32,
    ) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();

        let mut worker = Worker {
            rx: rx.clone(),
            synthesizer: Box::new(synthesizer),
            sink: Box::new(sink),
            max_attempts: max_attempts.max(1),
        };

        let thread = thread::Builder::new()
            .name("speech-worker".to_string())
            .spawn(move || worker.run())
            .map_err(|e| Error::Worker(format!("failed to spawn speech worker: {e}")))?;

        Ok(Self {
            handle: SpeechHandle {
                tx,
                gate: Arc::new(Mutex::new(Gate::default())),
            },
            rx,
            worker: Some(thread),
        })
    }

    /// Queue backed by the configured TTS program and the default speakers
    ///
    /// # Errors
    ///
    /// Returns error if the TTS command is empty or the worker cannot start
    pub fn from_config(config: &SpeechConfig) -> Result<Self> {
        let synthesizer = CommandSynthesizer::new(&config.tts_command)?;
        Self::new(synthesizer, SpeakerSink::new(), config.max_attempts)
    }

    /// Queue `text` for speaking; see [`SpeechHandle::enqueue`]
    pub fn enqueue(&self, text: impl Into<String>) -> Option<u64> {
        self.handle.enqueue(text)
    }

    /// A handle other threads can enqueue through
    #[must_use]
    pub fn handle(&self) -> SpeechHandle {
        self.handle.clone()
    }

    /// Requests queued but not yet started
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Speak everything already queued, then stop the worker
    ///
    /// Blocks until the worker has exited. Later enqueues are refused.
    pub fn drain_and_stop(&mut self) {
        self.shutdown(false);
    }

    /// Discard queued requests and stop after the one in progress
    pub fn stop_now(&mut self) {
        self.shutdown(true);
    }

    fn shutdown(&mut self, discard: bool) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let mut gate = self
            .handle
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        gate.closed = true;

        if discard {
            let dropped = self
                .rx
                .try_iter()
                .filter(|m| matches!(m, Message::Speak(_)))
                .count();
            if dropped > 0 {
                tracing::info!(dropped, "discarded pending speech");
            }
        }

        if self.handle.tx.send(Message::Stop).is_err() {
            tracing::warn!("speech worker already gone");
        }
        drop(gate);

        if worker.join().is_err() {
            tracing::error!("speech worker panicked");
        }
        tracing::debug!("speech queue stopped");
    }
}

impl Drop for SpeechQueue {
    fn drop(&mut self) {
        self.stop_now();
    }
}

struct Worker {
    rx: Receiver<Message>,
    synthesizer: Box<dyn SpeechSynthesizer>,
    sink: Box<dyn AudioSink>,
    max_attempts: u32,
}

impl Worker {
    fn run(&mut self) {
        while let Ok(Message::Speak(request)) = self.rx.recv() {
            self.speak(&request);
        }
        tracing::debug!("speech worker exiting");
    }

    fn speak(&mut self, request: &SpeechRequest) {
        for attempt in 1..=self.max_attempts {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.speak_once(&request.text)));

            match outcome {
                Ok(Ok(())) => {
                    tracing::debug!(ordinal = request.ordinal, attempt, "speech request done");
                    return;
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        ordinal = request.ordinal,
                        attempt,
                        error = %e,
                        "speech request failed"
                    );
                }
                Err(payload) => {
                    tracing::error!(
                        ordinal = request.ordinal,
                        attempt,
                        panic = panic_message(payload.as_ref()),
                        "speech request panicked"
                    );
                }
            }

            if attempt < self.max_attempts {
                thread::sleep(RETRY_PAUSE);
            }
        }

        tracing::warn!(ordinal = request.ordinal, "speech request dropped");
    }

    fn speak_once(&mut self, text: &str) -> Result<()> {
        let clip = self.synthesizer.synthesize(text)?;
        if clip.is_empty() {
            tracing::debug!("synthesizer returned no audio");
            return Ok(());
        }
        self.sink.play(&clip)
    }
}
