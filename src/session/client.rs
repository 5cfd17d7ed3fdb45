//! Streaming session client
//!
//! Owns the duplex connection, performs the three-message handshake, and
//! refuses to put audio on the wire before the handshake is done.

use std::sync::Arc;

use super::protocol::{InboundEvent, OutboundEvent};
use super::transport::{Connector, EventWriter, InboundMessages};
use crate::config::VoiceSessionConfig;
use crate::{Error, Result};

/// Transport-level connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Parsed inbound events for one connection
pub struct SessionEvents {
    inbound: InboundMessages,
}

impl SessionEvents {
    /// Next inbound event
    ///
    /// Malformed messages are logged and skipped. Returns `None` once the
    /// connection is closed.
    pub async fn next(&mut self) -> Option<Result<InboundEvent>> {
        loop {
            match self.inbound.recv().await? {
                Ok(text) => match InboundEvent::from_json(&text) {
                    Ok(event) => return Some(Ok(event)),
                    Err(e) => {
                        tracing::warn!(error = %e, "ignoring malformed inbound event");
                    }
                },
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Client side of one streaming session
pub struct SessionClient {
    connector: Arc<dyn Connector>,
    endpoint: String,
    system_prompt: String,
    writer: Option<Box<dyn EventWriter>>,
    inbound: Option<InboundMessages>,
    status: ConnectionStatus,
    handshake_complete: bool,
    frames_sent: u64,
    frames_dropped: u64,
}

impl SessionClient {
    /// Create a disconnected client
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: &VoiceSessionConfig) -> Self {
        Self {
            connector,
            endpoint: config.endpoint.clone(),
            system_prompt: config.system_prompt.clone(),
            writer: None,
            inbound: None,
            status: ConnectionStatus::Disconnected,
            handshake_complete: false,
            frames_sent: 0,
            frames_dropped: 0,
        }
    }

    /// Open the duplex connection
    ///
    /// No automatic reconnection: a failure leaves the client in `Error`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the connection cannot be opened
    pub async fn connect(&mut self) -> Result<()> {
        if self.status == ConnectionStatus::Connected {
            return Ok(());
        }

        self.status = ConnectionStatus::Connecting;
        tracing::debug!(endpoint = %self.endpoint, "connecting");

        match self.connector.connect(&self.endpoint).await {
            Ok(connection) => {
                self.writer = Some(connection.writer);
                self.inbound = Some(connection.inbound);
                self.handshake_complete = false;
                self.status = ConnectionStatus::Connected;
                Ok(())
            }
            Err(e) => {
                self.status = ConnectionStatus::Error;
                tracing::error!(endpoint = %self.endpoint, error = %e, "connection failed");
                Err(e)
            }
        }
    }

    /// Send open-prompt, system-prompt and open-audio-stream, in that order
    ///
    /// # Errors
    ///
    /// Returns error if not connected or a handshake message cannot be sent
    pub async fn handshake(&mut self) -> Result<()> {
        if self.status != ConnectionStatus::Connected {
            return Err(Error::Transport("handshake requires a connection".to_string()));
        }
        if self.handshake_complete {
            return Ok(());
        }

        self.send(&OutboundEvent::OpenPrompt).await?;
        self.send(&OutboundEvent::SystemPrompt {
            text: self.system_prompt.clone(),
        })
        .await?;
        self.send(&OutboundEvent::OpenAudioStream).await?;

        self.handshake_complete = true;
        tracing::info!("session handshake complete");
        Ok(())
    }

    /// Take the inbound event stream for this connection
    ///
    /// Returns `None` if not connected or already taken.
    pub fn take_events(&mut self) -> Option<SessionEvents> {
        self.inbound.take().map(|inbound| SessionEvents { inbound })
    }

    /// Send one capture frame
    ///
    /// Before the handshake completes the frame is dropped with a warning,
    /// never buffered. Returns whether the frame was sent.
    ///
    /// # Errors
    ///
    /// Returns error if the connection fails while sending
    pub async fn send_audio_frame(&mut self, frame: String) -> Result<bool> {
        if !self.is_ready() {
            self.frames_dropped += 1;
            tracing::warn!(
                status = ?self.status,
                dropped = self.frames_dropped,
                "session not ready, dropping audio frame"
            );
            return Ok(false);
        }

        self.send(&OutboundEvent::AudioInput { data: frame }).await?;
        self.frames_sent += 1;
        Ok(true)
    }

    /// Signal end of the user's utterance
    ///
    /// # Errors
    ///
    /// Returns error if the connection fails while sending
    pub async fn send_stop_audio(&mut self) -> Result<()> {
        if !self.is_ready() {
            tracing::warn!(status = ?self.status, "session not ready, ignoring stop-audio");
            return Ok(());
        }
        self.send(&OutboundEvent::StopAudio).await
    }

    /// Close the connection
    pub async fn disconnect(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close().await {
                tracing::debug!(error = %e, "error closing connection");
            }
        }
        self.inbound = None;
        self.handshake_complete = false;
        self.status = ConnectionStatus::Disconnected;
        tracing::debug!(
            frames_sent = self.frames_sent,
            frames_dropped = self.frames_dropped,
            "disconnected"
        );
    }

    /// Mark the connection failed after an error observed elsewhere
    pub fn mark_failed(&mut self) {
        self.status = ConnectionStatus::Error;
        self.handshake_complete = false;
    }

    /// Transport status
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Whether audio may flow
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == ConnectionStatus::Connected && self.handshake_complete
    }

    /// Frames put on the wire so far
    #[must_use]
    pub const fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Frames dropped because the session was not ready
    #[must_use]
    pub const fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    async fn send(&mut self, event: &OutboundEvent) -> Result<()> {
        let text = event.to_json()?;
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::Transport("not connected".to_string()));
        };

        if let Err(e) = writer.send_text(text).await {
            self.mark_failed();
            tracing::error!(event = event.name(), error = %e, "send failed");
            return Err(e);
        }

        tracing::trace!(event = event.name(), "sent");
        Ok(())
    }
}
