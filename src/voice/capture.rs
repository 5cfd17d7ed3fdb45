//! Audio capture from microphone
//!
//! Opens the default input device, converts each hardware block to the wire
//! rate and emits fixed-size base64 PCM16 frames through a callback.

use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};

use super::codec::{self, Decimator};
use crate::config::VoiceSessionConfig;
use crate::{Error, Result};

/// Receives each encoded wire frame
///
/// Called on the capture thread. Must not block.
pub type FrameSink = Box<dyn FnMut(String) + Send + 'static>;

/// A source of wire frames
///
/// Implemented by [`CaptureEngine`] for real hardware.
pub trait AudioInput {
    /// Start emitting frames into `sink`
    ///
    /// # Errors
    ///
    /// Returns error if the device is denied or unavailable
    fn start(&mut self, sink: FrameSink) -> Result<()>;

    /// Stop emitting frames
    ///
    /// Synchronous: once this returns, `sink` is never called again.
    fn stop(&mut self);

    /// Whether frames are currently being emitted
    fn is_capturing(&self) -> bool;
}

/// Turns device blocks into fixed-size wire frames
///
/// Downmixes interleaved channels, decimates to the wire rate and
/// re-chunks into `frame_samples` blocks.
pub struct FrameAssembler {
    decimator: Decimator,
    channels: usize,
    frame_samples: usize,
    mono: Vec<f32>,
    pending: Vec<f32>,
}

impl FrameAssembler {
    /// Create an assembler for a device stream
    #[must_use]
    pub fn new(device_rate: u32, target_rate: u32, channels: u16, frame_samples: usize) -> Self {
        Self {
            decimator: Decimator::new(device_rate, target_rate),
            channels: usize::from(channels.max(1)),
            frame_samples: frame_samples.max(1),
            mono: Vec::new(),
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    /// Decimation ratio applied to the device stream
    #[must_use]
    pub fn ratio(&self) -> f64 {
        self.decimator.ratio()
    }

    /// Feed one interleaved device block, emitting every completed frame
    #[allow(clippy::cast_precision_loss)]
    pub fn push(&mut self, interleaved: &[f32], mut emit: impl FnMut(String)) {
        if self.channels == 1 {
            self.decimator.process(interleaved, &mut self.pending);
        } else {
            let channels = self.channels as f32;
            self.mono.clear();
            self.mono.extend(
                interleaved
                    .chunks(self.channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels),
            );
            self.decimator.process(&self.mono, &mut self.pending);
        }

        while self.pending.len() >= self.frame_samples {
            let frame = codec::encode_frame(&self.pending[..self.frame_samples]);
            self.pending.drain(..self.frame_samples);
            emit(frame);
        }
    }

    /// Samples waiting for a full frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Guards the frame sink against emission after stop
///
/// The capture callback only ever `try_lock`s, so it never blocks; a
/// contended lock means a close is in progress and the frame is dropped.
/// `close` takes the lock, so it waits out any emission already underway.
#[derive(Clone)]
pub struct CaptureGate {
    sink: Arc<Mutex<Option<FrameSink>>>,
}

impl CaptureGate {
    /// Open a gate around `sink`
    #[must_use]
    pub fn new(sink: FrameSink) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Some(sink))),
        }
    }

    /// Pass a frame through if the gate is still open
    ///
    /// Returns whether the frame reached the sink.
    pub fn emit(&self, frame: String) -> bool {
        let Ok(mut guard) = self.sink.try_lock() else {
            return false;
        };
        guard.as_mut().is_some_and(|sink| {
            sink(frame);
            true
        })
    }

    /// Close the gate for good
    pub fn close(&self) {
        let mut guard = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }

    /// Whether the gate still forwards frames
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sink
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

/// Captures audio from the default input device
pub struct CaptureEngine {
    target_rate: u32,
    frame_samples: usize,
    device_rate: Option<u32>,
    gate: Option<CaptureGate>,
    stream: Option<Stream>,
}

impl CaptureEngine {
    /// Create a capture engine producing `frame_samples` frames at `target_rate`
    #[must_use]
    pub const fn new(target_rate: u32, frame_samples: usize) -> Self {
        Self {
            target_rate,
            frame_samples,
            device_rate: None,
            gate: None,
            stream: None,
        }
    }

    /// Create a capture engine from session configuration
    #[must_use]
    pub const fn from_config(config: &VoiceSessionConfig) -> Self {
        Self::new(config.capture_sample_rate, config.frame_samples)
    }

    /// Rate the device was actually opened at, while capturing
    #[must_use]
    pub const fn device_rate(&self) -> Option<u32> {
        self.device_rate
    }

    /// Wire rate of emitted frames
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.target_rate
    }
}

impl AudioInput for CaptureEngine {
    fn start(&mut self, sink: FrameSink) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?;

        let gate = CaptureGate::new(sink);

        // Try the wire rate first, fall back to the native rate on refusal
        let stream = match exact_rate_config(&device, self.target_rate)? {
            Some((config, format)) => match build_stream(
                &device,
                &config,
                format,
                self.target_rate,
                self.frame_samples,
                &gate,
            ) {
                Ok(stream) => Some((stream, config.sample_rate.0)),
                Err(e) => {
                    tracing::debug!(error = %e, "device refused wire rate");
                    None
                }
            },
            None => None,
        };

        let (stream, device_rate) = match stream {
            Some(opened) => opened,
            None => {
                let native = device
                    .default_input_config()
                    .map_err(|e| Error::Device(e.to_string()))?;
                let config = native.config();
                let device_rate = config.sample_rate.0;
                tracing::info!(
                    device_rate,
                    target_rate = self.target_rate,
                    "wire rate unavailable, decimating from native rate"
                );
                let stream = build_stream(
                    &device,
                    &config,
                    native.sample_format(),
                    self.target_rate,
                    self.frame_samples,
                    &gate,
                )?;
                (stream, device_rate)
            }
        };

        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            device_rate,
            target_rate = self.target_rate,
            frame_samples = self.frame_samples,
            "audio capture started"
        );

        self.device_rate = Some(device_rate);
        self.gate = Some(gate);
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        // Close first so a callback racing the teardown cannot emit
        if let Some(gate) = self.gate.take() {
            gate.close();
        }
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "failed to pause capture stream");
            }
            drop(stream);
            self.device_rate = None;
            tracing::debug!("audio capture stopped");
        }
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Find a mono-preferred config that supports `target_rate` exactly
fn exact_rate_config(
    device: &Device,
    target_rate: u32,
) -> Result<Option<(StreamConfig, SampleFormat)>> {
    let target = SampleRate(target_rate);
    let found = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .filter(|c| {
            c.min_sample_rate() <= target
                && c.max_sample_rate() >= target
                && matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16)
        })
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .map(|c| {
            let supported = c.with_sample_rate(target);
            (supported.config(), supported.sample_format())
        });
    Ok(found)
}

/// Build an input stream feeding a fresh assembler through `gate`
fn build_stream(
    device: &Device,
    config: &StreamConfig,
    format: SampleFormat,
    target_rate: u32,
    frame_samples: usize,
    gate: &CaptureGate,
) -> Result<Stream> {
    let mut assembler =
        FrameAssembler::new(config.sample_rate.0, target_rate, config.channels, frame_samples);
    let gate = gate.clone();
    let on_error = |err: cpal::StreamError| {
        tracing::error!(error = %err, "audio capture error");
    };

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                assembler.push(data, |frame| {
                    gate.emit(frame);
                });
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    scratch.extend(data.iter().copied().map(codec::i16_to_f32));
                    assembler.push(&scratch, |frame| {
                        gate.emit(frame);
                    });
                },
                on_error,
                None,
            )
        }
        other => {
            return Err(Error::Device(format!("unsupported sample format: {other:?}")));
        }
    };

    stream.map_err(|e| Error::Device(e.to_string()))
}
