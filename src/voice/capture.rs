//! Audio capture from microphone

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig, StreamError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use super::{AudioFrame, SAMPLE_RATE};
use crate::error::CaptureError;
use crate::{Error, Result};

/// How long a frame read may block before the capture loop re-checks its stop flag
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Completed frames buffered between the device callback and the capture loop
const FRAME_QUEUE_DEPTH: usize = 32;

/// Produces fixed-size PCM frames on demand
///
/// Sources are opened and read on the capture thread only.
pub trait FrameSource {
    /// Block for at most [`POLL_INTERVAL`] waiting for the next frame
    ///
    /// # Errors
    ///
    /// [`CaptureError::Overrun`] and [`CaptureError::Timeout`] are
    /// recoverable; [`CaptureError::Closed`] ends the capture loop
    fn read_frame(&mut self) -> std::result::Result<AudioFrame, CaptureError>;
}

/// An audio input device that can be opened as a [`FrameSource`]
pub trait AudioInput: Send + Sync {
    /// Acquire the device and start producing frames of `frame_samples`
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if the device cannot be opened
    fn open(&self, frame_samples: usize) -> Result<Box<dyn FrameSource>>;
}

/// Captures 16 kHz mono audio from a cpal input device
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    device_name: Option<String>,
}

impl CpalInput {
    /// Capture from the host's default input device
    #[must_use]
    pub const fn new() -> Self {
        Self { device_name: None }
    }

    /// Capture from the input device with this name
    #[must_use]
    pub fn with_device(mut self, name: Option<String>) -> Self {
        self.device_name = name;
        self
    }

    fn device(&self) -> Result<Device> {
        let host = cpal::default_host();

        let Some(wanted) = &self.device_name else {
            return host
                .default_input_device()
                .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()));
        };

        host.input_devices()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().is_ok_and(|name| &name == wanted))
            .ok_or_else(|| Error::DeviceUnavailable(format!("input device not found: {wanted}")))
    }
}

impl AudioInput for CpalInput {
    fn open(&self, frame_samples: usize) -> Result<Box<dyn FrameSource>> {
        if frame_samples == 0 {
            return Err(Error::Config("frame size must be non-zero".to_string()));
        }

        let device = self.device()?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .filter(|c| {
                matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16)
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| {
                Error::DeviceUnavailable(format!("no {SAMPLE_RATE} Hz input config found"))
            })?
            .with_sample_rate(SampleRate(SAMPLE_RATE));

        let format = supported.sample_format();
        let config = supported.config();

        let (tx, rx) = crossbeam_channel::bounded(FRAME_QUEUE_DEPTH);
        let shared = Shared::default();

        let stream = match format {
            SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, frame_samples, tx, &shared, |s| s)?
            }
            _ => build_stream::<f32>(&device, &config, frame_samples, tx, &shared, f32_to_i16)?,
        };

        stream
            .play()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            ?format,
            "audio capture started"
        );

        Ok(Box::new(CpalFrameSource {
            _stream: stream,
            frames: rx,
            shared,
        }))
    }
}

/// State shared between the device callbacks and the reader
#[derive(Clone, Default)]
struct Shared {
    dropped_samples: Arc<AtomicUsize>,
    fault: Arc<Mutex<Option<String>>>,
}

#[allow(clippy::cast_possible_truncation)]
fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    frame_samples: usize,
    frames: Sender<AudioFrame>,
    shared: &Shared,
    convert: fn(T) -> i16,
) -> Result<Stream>
where
    T: SizedSample + Send + 'static,
{
    let channels = usize::from(config.channels.max(1));
    let mut pending: Vec<i16> = Vec::with_capacity(frame_samples * 2);

    let dropped = Arc::clone(&shared.dropped_samples);
    let fault = Arc::clone(&shared.fault);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // First channel only
                pending.extend(data.iter().step_by(channels).map(|&s| convert(s)));

                while pending.len() >= frame_samples {
                    let frame = AudioFrame::new(pending.drain(..frame_samples).collect());
                    match frames.try_send(frame) {
                        Ok(()) => {}
                        Err(TrySendError::Full(frame)) => {
                            dropped.fetch_add(frame.len(), Ordering::Relaxed);
                        }
                        Err(TrySendError::Disconnected(_)) => return,
                    }
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                if matches!(err, StreamError::DeviceNotAvailable) {
                    if let Ok(mut fault) = fault.lock() {
                        fault.get_or_insert_with(|| err.to_string());
                    }
                }
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))
}

/// Frames from a running cpal input stream; dropping it releases the device
struct CpalFrameSource {
    _stream: Stream,
    frames: Receiver<AudioFrame>,
    shared: Shared,
}

impl FrameSource for CpalFrameSource {
    fn read_frame(&mut self) -> std::result::Result<AudioFrame, CaptureError> {
        if let Some(reason) = self.shared.fault.lock().ok().and_then(|f| f.clone()) {
            return Err(CaptureError::Closed(reason));
        }

        let dropped = self.shared.dropped_samples.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            return Err(CaptureError::Overrun(dropped));
        }

        match self.frames.recv_timeout(POLL_INTERVAL) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                Err(CaptureError::Closed("input stream ended".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_conversion_saturates() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
    }
}
