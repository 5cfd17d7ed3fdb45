//! Error types for Beacon realtime

use thiserror::Error;

/// Result type alias for Beacon realtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in a realtime voice session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device denied, missing, or unusable
    #[error("audio device error: {0}")]
    Device(String),

    /// Render thread failed to come up
    #[error("render init error: {0}")]
    RenderInit(String),

    /// Playback engine used outside its ready window
    #[error("playback error: {0}")]
    Playback(String),

    /// Connection refused, dropped, or closed
    #[error("transport error: {0}")]
    Transport(String),

    /// Error event reported by the remote service
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Malformed wire audio
    #[error("codec error: {0}")]
    Codec(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error ends the session
    ///
    /// Codec and playback misuse errors are per-call; everything else tears
    /// the session down.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Codec(_) | Self::Playback(_))
    }
}
