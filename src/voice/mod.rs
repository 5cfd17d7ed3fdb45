//! Voice processing module
//!
//! Handles microphone capture, the PCM16 wire codec, and low-latency playback.
//! Frames reach the remote service through the session client (see `session`).

pub mod codec;
mod capture;
mod playback;

pub use capture::{AudioInput, CaptureEngine, CaptureGate, FrameAssembler, FrameSink};
pub use playback::{
    ANALYSIS_WINDOW, CpalOutput, NullOutput, OutputDevice, PlaybackEngine, PlaybackStatus,
    RenderMessage, RenderQueue, SharedRenderQueue,
};
