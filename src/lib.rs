//! Beacon Realtime - Full-duplex voice conversations with a speech-to-speech service
//!
//! This library provides the client side of a real-time voice session:
//! - Microphone capture, decimated and framed as base64 PCM16
//! - A streaming session over WebSocket with an ordered handshake
//! - Low-latency playback with barge-in
//! - A conversation state machine that builds a role-tagged transcript
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   VoiceSession                       │
//! │   start  │  recording  │  run loop  │  disconnect    │
//! └──────┬──────────────┬──────────────────┬────────────┘
//!        │              │                  │
//! ┌──────▼──────┐ ┌─────▼──────┐ ┌─────────▼───────────┐
//! │   Capture   │ │  Session   │ │    Conversation      │
//! │ decimate +  │ │  client +  │ │  state machine +     │
//! │   PCM16     │ │ WebSocket  │ │    transcript        │
//! └─────────────┘ └─────┬──────┘ └─────────┬───────────┘
//!                       │                  │ directives
//!                       │          ┌───────▼───────────┐
//!                       │          │     Playback       │
//!                       │          │  render thread     │
//!                       │          └───────────────────┘
//! ┌─────────────────────▼───────────────────────────────┐
//! │          Remote speech-to-speech service             │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod voice;

pub use config::{DisplayPolicy, VoiceSessionConfig};
pub use conversation::{ChatHistory, ChatMessage, TranscriptStore};
pub use error::{Error, Result};
pub use orchestrator::{SessionCommand, SessionStatus, VoiceSession};
pub use session::{Connector, WebSocketConnector};
