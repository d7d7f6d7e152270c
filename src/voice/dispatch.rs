//! Callback delivery off the capture thread

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use super::Utterance;
use super::engine::EngineStatus;
use crate::{Error, Result};

type WakeFn = dyn Fn() + Send + Sync;
type CommandFn = dyn Fn(Utterance) + Send + Sync;
type StoppedFn = dyn Fn(&EngineStatus) + Send + Sync;

/// Default number of callback worker threads
pub const DEFAULT_CALLBACK_WORKERS: usize = 2;

/// User callbacks registered on the engine
#[derive(Clone, Default)]
pub struct Callbacks {
    pub(crate) on_wake: Option<Arc<WakeFn>>,
    pub(crate) on_command: Option<Arc<CommandFn>>,
    pub(crate) on_stopped: Option<Arc<StoppedFn>>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_wake", &self.on_wake.is_some())
            .field("on_command", &self.on_command.is_some())
            .field("on_stopped", &self.on_stopped.is_some())
            .finish()
    }
}

/// Something to hand to a callback
#[derive(Debug)]
pub(crate) enum Event {
    Wake,
    Command(Utterance),
    Stopped(EngineStatus),
}

impl Event {
    const fn name(&self) -> &'static str {
        match self {
            Self::Wake => "on_wake",
            Self::Command(_) => "on_command",
            Self::Stopped(_) => "on_stopped",
        }
    }
}

/// Events sent but not yet fully delivered
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    done: Condvar,
}

impl InFlight {
    fn add(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        self.done.notify_all();
    }

    /// Block until only the caller's own event is outstanding
    fn wait_for_others(&self) {
        let count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let _count = self
            .done
            .wait_while(count, |n| *n > 1)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Enqueue side of a [`CallbackDispatcher`]
#[derive(Clone)]
pub(crate) struct EventSender {
    tx: Sender<Event>,
    in_flight: Arc<InFlight>,
}

impl EventSender {
    /// Queue an event; returns `false` if the workers are gone
    pub(crate) fn send(&self, event: Event) -> bool {
        self.in_flight.add();
        if self.tx.send(event).is_err() {
            self.in_flight.finish();
            return false;
        }
        true
    }
}

/// Fixed pool of worker threads running callbacks
///
/// Events are queued without bound so the capture loop never waits on user
/// code. A panicking callback is logged and does not take its worker down.
///
/// With more than one worker, wake and command callbacks may overlap or
/// complete out of order. `on_stopped` is the exception: it runs only after
/// every event sent before it has been delivered.
pub(crate) struct CallbackDispatcher {
    tx: Option<EventSender>,
    workers: Vec<JoinHandle<()>>,
}

impl CallbackDispatcher {
    pub(crate) fn spawn(callbacks: &Callbacks, workers: usize) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<Event>();
        let in_flight = Arc::new(InFlight::default());

        let mut handles = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let rx = rx.clone();
            let callbacks = callbacks.clone();
            let in_flight = Arc::clone(&in_flight);
            let handle = thread::Builder::new()
                .name(format!("voice-callback-{i}"))
                .spawn(move || run_worker(&rx, &callbacks, &in_flight))
                .map_err(|e| Error::Worker(format!("failed to spawn callback worker: {e}")))?;
            handles.push(handle);
        }

        Ok(Self {
            tx: Some(EventSender { tx, in_flight }),
            workers: handles,
        })
    }

    pub(crate) fn sender(&self) -> Option<EventSender> {
        self.tx.clone()
    }

    /// Stop accepting events and wait until every queued one was delivered
    ///
    /// Workers exit once all senders (including clones held elsewhere) are gone.
    pub(crate) fn shutdown(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("callback worker exited abnormally");
            }
        }
    }
}

impl Drop for CallbackDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(rx: &Receiver<Event>, callbacks: &Callbacks, in_flight: &InFlight) {
    while let Ok(event) = rx.recv() {
        let name = event.name();
        if matches!(event, Event::Stopped(_)) {
            in_flight.wait_for_others();
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| deliver(callbacks, event)));
        if let Err(payload) = outcome {
            tracing::error!(
                callback = name,
                panic = panic_message(payload.as_ref()),
                "callback panicked"
            );
        }
        in_flight.finish();
    }
}

fn deliver(callbacks: &Callbacks, event: Event) {
    match event {
        Event::Wake => {
            if let Some(f) = &callbacks.on_wake {
                f();
            }
        }
        Event::Command(utterance) => {
            if let Some(f) = &callbacks.on_command {
                f(utterance);
            }
        }
        Event::Stopped(status) => {
            if let Some(f) = &callbacks.on_stopped {
                f(&status);
            }
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
