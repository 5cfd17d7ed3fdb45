//! Audio playback to speakers
//!
//! Decoded frames are queued on a [`RenderQueue`] that a dedicated render
//! thread drains into the output device. The orchestrator only talks to the
//! queue through fixed-format [`RenderMessage`]s and reads back snapshots
//! from the analysis tap.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate};
use tokio::sync::{oneshot, watch};

use super::codec;
use crate::config::VoiceSessionConfig;
use crate::{Error, Result};

/// Samples kept by the analysis tap
pub const ANALYSIS_WINDOW: usize = 512;

/// Message posted to the render queue
#[derive(Debug, Clone, PartialEq)]
pub enum RenderMessage {
    /// Append decoded samples
    Frame(Vec<f32>),
    /// Discard everything not yet rendered
    BargeIn,
    /// Override how many samples must be queued before output starts
    SetPrebuffer(usize),
}

/// Sample queue drained by the render thread
#[derive(Debug)]
pub struct RenderQueue {
    samples: VecDeque<f32>,
    prebuffer: usize,
    buffering: bool,
    tap: Vec<f32>,
    volume: f32,
}

impl RenderQueue {
    /// Create an empty queue that holds back `prebuffer` samples
    #[must_use]
    pub fn new(prebuffer: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            prebuffer,
            buffering: true,
            tap: vec![0.0; ANALYSIS_WINDOW],
            volume: 0.0,
        }
    }

    /// Apply a render message
    pub fn post(&mut self, message: RenderMessage) {
        match message {
            RenderMessage::Frame(samples) => self.samples.extend(samples),
            RenderMessage::BargeIn => {
                self.samples.clear();
                self.buffering = true;
            }
            RenderMessage::SetPrebuffer(len) => self.prebuffer = len,
        }
    }

    /// Fill one output block
    ///
    /// Emits silence while pre-buffering. Running dry re-enters pre-buffering
    /// so the next response starts without stutter.
    pub fn render(&mut self, out: &mut [f32]) {
        if self.buffering && self.samples.len() < self.prebuffer.max(1) {
            out.fill(0.0);
        } else {
            self.buffering = false;
            for slot in out.iter_mut() {
                *slot = self.samples.pop_front().unwrap_or(0.0);
            }
            if self.samples.is_empty() {
                self.buffering = true;
            }
        }
        self.record(out);
    }

    /// Samples queued but not yet rendered
    #[must_use]
    pub fn queued(&self) -> usize {
        self.samples.len()
    }

    /// Whether output is held back waiting for the pre-buffer
    #[must_use]
    pub const fn is_buffering(&self) -> bool {
        self.buffering
    }

    /// RMS level of the last rendered block
    #[must_use]
    pub const fn volume(&self) -> f32 {
        self.volume
    }

    /// The last [`ANALYSIS_WINDOW`] rendered samples
    #[must_use]
    pub fn snapshot(&self) -> Vec<f32> {
        self.tap.clone()
    }

    fn record(&mut self, block: &[f32]) {
        self.volume = codec::rms(block);
        if block.len() >= ANALYSIS_WINDOW {
            self.tap
                .copy_from_slice(&block[block.len() - ANALYSIS_WINDOW..]);
        } else {
            self.tap.drain(..block.len());
            self.tap.extend_from_slice(block);
        }
    }
}

/// Render queue shared between the engine and the render thread
pub type SharedRenderQueue = Arc<Mutex<RenderQueue>>;

fn lock_queue(queue: &Mutex<RenderQueue>) -> MutexGuard<'_, RenderQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An output device the render thread can drive
///
/// `open` runs on the render thread and the returned stream never leaves it,
/// so platform streams that are not `Send` are fine.
pub trait OutputDevice: Send + 'static {
    /// Handle keeping the output alive until dropped
    type Stream;

    /// Start pulling from `queue` at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn open(&mut self, sample_rate: u32, queue: SharedRenderQueue) -> Result<Self::Stream>;
}

/// Default system output via cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

impl OutputDevice for CpalOutput {
    type Stream = cpal::Stream;

    fn open(&mut self, sample_rate: u32, queue: SharedRenderQueue) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::RenderInit("no output device available".to_string()))?;

        let rate = SampleRate(sample_rate);
        let supported = |channels: u16| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == channels
                    && c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
            })
        };
        let config = supported(1)
            .or_else(|| supported(2))
            .ok_or_else(|| Error::RenderInit("no suitable output config found".to_string()))?
            .with_sample_rate(rate)
            .config();
        let channels = usize::from(config.channels);

        let mut mono = Vec::new();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    mono.resize(frames, 0.0);
                    lock_queue(&queue).render(&mut mono);
                    for (frame, &sample) in data.chunks_mut(channels).zip(&mono) {
                        frame.fill(sample);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::RenderInit(e.to_string()))?;

        stream.play().map_err(|e| Error::RenderInit(e.to_string()))?;

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio output opened"
        );

        Ok(stream)
    }
}

/// Output that renders into nothing
///
/// For headless runs; the queue is never drained.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl OutputDevice for NullOutput {
    type Stream = ();

    fn open(&mut self, _sample_rate: u32, _queue: SharedRenderQueue) -> Result<()> {
        Ok(())
    }
}

/// Lifecycle of the playback engine
///
/// This is the single authoritative readiness value; it flips to `Ready` in
/// the same step that observes the render thread's confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    /// `initialize` not yet called
    Uninitialized,
    /// Waiting for the render thread to confirm
    Initializing,
    /// Render thread confirmed; all methods usable
    Ready,
    /// Render thread failed to come up
    Failed,
    /// Released by `stop`
    Stopped,
}

struct RenderThread {
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Plays decoded wire frames on a dedicated render thread
pub struct PlaybackEngine {
    sample_rate: u32,
    queue: SharedRenderQueue,
    status: watch::Sender<PlaybackStatus>,
    render: Option<RenderThread>,
}

impl PlaybackEngine {
    /// Create an engine for `sample_rate` audio, holding back `prebuffer` samples
    #[must_use]
    pub fn new(sample_rate: u32, prebuffer: usize) -> Self {
        let (status, _) = watch::channel(PlaybackStatus::Uninitialized);
        Self {
            sample_rate,
            queue: Arc::new(Mutex::new(RenderQueue::new(prebuffer))),
            status,
            render: None,
        }
    }

    /// Create an engine from session configuration
    #[must_use]
    pub fn from_config(config: &VoiceSessionConfig) -> Self {
        Self::new(config.playback_sample_rate, config.prebuffer_samples())
    }

    /// Start the render thread on `device` and wait for it to confirm
    ///
    /// # Errors
    ///
    /// Returns `Error::RenderInit` if the device cannot be opened or the
    /// render thread exits before confirming
    pub async fn initialize<D: OutputDevice>(&mut self, mut device: D) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        self.status.send_replace(PlaybackStatus::Initializing);

        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let queue = Arc::clone(&self.queue);
        let sample_rate = self.sample_rate;

        let spawned = std::thread::Builder::new()
            .name("beacon-render".to_string())
            .spawn(move || {
                let stream = match device.open(sample_rate, queue) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                // Park until stop() or the engine is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.status.send_replace(PlaybackStatus::Failed);
                return Err(Error::RenderInit(format!("failed to spawn render thread: {e}")));
            }
        };

        let confirmed = ready_rx.await;
        match confirmed {
            Ok(Ok(())) => {
                self.render = Some(RenderThread {
                    shutdown: shutdown_tx,
                    handle,
                });
                self.status.send_replace(PlaybackStatus::Ready);
                tracing::debug!(sample_rate, "playback engine ready");
                Ok(())
            }
            outcome => {
                let _ = handle.join();
                self.status.send_replace(PlaybackStatus::Failed);
                let err = match outcome {
                    Ok(Err(Error::RenderInit(msg))) => Error::RenderInit(msg),
                    Ok(Err(other)) => Error::RenderInit(other.to_string()),
                    _ => Error::RenderInit(
                        "render thread exited before confirming readiness".to_string(),
                    ),
                };
                tracing::error!(error = %err, "playback engine failed to initialize");
                Err(err)
            }
        }
    }

    /// Decode a wire frame and queue it for rendering
    ///
    /// Returns the number of samples queued.
    ///
    /// # Errors
    ///
    /// Returns error if the engine is not ready or the frame is malformed
    pub fn play_audio(&self, frame: &str) -> Result<usize> {
        self.ensure_ready()?;
        let samples = codec::decode_frame(frame)?;
        let len = samples.len();
        self.post(RenderMessage::Frame(samples));
        Ok(len)
    }

    /// Discard all queued, not-yet-rendered audio
    ///
    /// Takes effect before the next rendered block.
    pub fn barge_in(&self) {
        let dropped = self.queued_samples();
        self.post(RenderMessage::BargeIn);
        tracing::debug!(dropped, "barge-in: playback queue flushed");
    }

    /// Override the pre-buffer length
    pub fn set_prebuffer(&self, samples: usize) {
        self.post(RenderMessage::SetPrebuffer(samples));
    }

    /// RMS level of the last rendered block
    #[must_use]
    pub fn get_volume(&self) -> f32 {
        lock_queue(&self.queue).volume()
    }

    /// The most recent rendered samples, for visualization
    #[must_use]
    pub fn get_samples(&self) -> Vec<f32> {
        lock_queue(&self.queue).snapshot()
    }

    /// Samples queued but not yet rendered
    #[must_use]
    pub fn queued_samples(&self) -> usize {
        lock_queue(&self.queue).queued()
    }

    /// Current lifecycle status
    #[must_use]
    pub fn status(&self) -> PlaybackStatus {
        *self.status.borrow()
    }

    /// Watch lifecycle changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.subscribe()
    }

    /// Whether the render thread has confirmed readiness
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status() == PlaybackStatus::Ready
    }

    /// Playback sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Release the render thread and output device
    ///
    /// Idempotent.
    pub fn stop(&mut self) {
        let Some(render) = self.render.take() else {
            return;
        };
        let _ = render.shutdown.send(());
        if render.handle.join().is_err() {
            tracing::warn!("render thread panicked during shutdown");
        }
        self.post(RenderMessage::BargeIn);
        self.status.send_replace(PlaybackStatus::Stopped);
        tracing::debug!("playback engine stopped");
    }

    fn post(&self, message: RenderMessage) {
        lock_queue(&self.queue).post(message);
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.status() {
            PlaybackStatus::Ready => Ok(()),
            status => Err(Error::Playback(format!(
                "playback engine not ready ({status:?})"
            ))),
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prebuffer_holds_output_back() {
        let mut queue = RenderQueue::new(4);
        queue.post(RenderMessage::Frame(vec![0.5; 3]));

        let mut out = [1.0; 2];
        queue.render(&mut out);
        assert_eq!(out, [0.0, 0.0]);
        assert_eq!(queue.queued(), 3);

        queue.post(RenderMessage::Frame(vec![0.5; 1]));
        queue.render(&mut out);
        assert_eq!(out, [0.5, 0.5]);
        assert_eq!(queue.queued(), 2);
    }

    #[test]
    fn frames_play_back_to_back() {
        let mut queue = RenderQueue::new(0);
        queue.post(RenderMessage::Frame(vec![0.1, 0.2]));
        queue.post(RenderMessage::Frame(vec![0.3, 0.4]));

        let mut out = [0.0; 4];
        queue.render(&mut out);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn underrun_pads_with_silence_and_rebuffers() {
        let mut queue = RenderQueue::new(2);
        queue.post(RenderMessage::Frame(vec![0.5; 3]));

        let mut out = [9.0; 4];
        queue.render(&mut out);
        assert_eq!(out, [0.5, 0.5, 0.5, 0.0]);
        assert!(queue.is_buffering());

        // One sample is below the pre-buffer again
        queue.post(RenderMessage::Frame(vec![0.5]));
        queue.render(&mut out);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn barge_in_discards_queued_samples() {
        let mut queue = RenderQueue::new(0);
        for _ in 0..3 {
            queue.post(RenderMessage::Frame(vec![0.25; 480]));
        }
        assert_eq!(queue.queued(), 1440);

        queue.post(RenderMessage::BargeIn);
        assert_eq!(queue.queued(), 0);

        let mut out = [1.0; 8];
        queue.render(&mut out);
        assert_eq!(out, [0.0; 8]);
    }

    #[test]
    fn prebuffer_override_applies() {
        let mut queue = RenderQueue::new(1_000);
        queue.post(RenderMessage::SetPrebuffer(1));
        queue.post(RenderMessage::Frame(vec![0.7]));

        let mut out = [0.0; 1];
        queue.render(&mut out);
        assert!((out[0] - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn analysis_tap_tracks_last_window() {
        let mut queue = RenderQueue::new(0);
        queue.post(RenderMessage::Frame(vec![0.5; 64]));

        let mut out = [0.0; 64];
        queue.render(&mut out);

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), ANALYSIS_WINDOW);
        assert!(snapshot[..ANALYSIS_WINDOW - 64].iter().all(|s| *s == 0.0));
        assert!(snapshot[ANALYSIS_WINDOW - 64..].iter().all(|s| (*s - 0.5).abs() < f32::EPSILON));
        assert!((queue.volume() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn engine_rejects_frames_before_initialize() {
        let engine = PlaybackEngine::new(24_000, 0);
        let frame = codec::encode_frame(&[0.1; 4]);
        assert!(matches!(engine.play_audio(&frame), Err(Error::Playback(_))));
        assert_eq!(engine.status(), PlaybackStatus::Uninitialized);
    }
}
