//! Voice session orchestrator
//!
//! Composes playback, the session client, capture, the conversation state
//! machine and the transcript, and owns every state transition. Startup runs
//! leaf-first (playback confirmed ready, then connect, then handshake) and
//! teardown runs in reverse.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::config::VoiceSessionConfig;
use crate::conversation::{ConversationState, Directive, ThinkingState, ToolExecutionState, TranscriptStore};
use crate::session::{Connector, InboundEvent, SessionClient, SessionEvents};
use crate::voice::{AudioInput, FrameSink, OutputDevice, PlaybackEngine};
use crate::{Error, Result};

/// Capture frames buffered between the capture callback and the session
const FRAME_BUFFER: usize = 64;

/// Session lifecycle as seen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Handshake complete, microphone idle
    Ready,
    /// Handshake complete, microphone live
    Recording,
    /// Utterance sent, waiting for the service to finish
    Processing,
    Error,
}

/// Caller request to a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    StartRecording,
    StopRecording,
    Disconnect,
}

/// One real-time voice conversation
pub struct VoiceSession {
    id: Uuid,
    config: VoiceSessionConfig,
    client: SessionClient,
    playback: PlaybackEngine,
    capture: Box<dyn AudioInput>,
    conversation: ConversationState,
    transcript: TranscriptStore,
    status: watch::Sender<SessionStatus>,
    audio_open: Arc<AtomicBool>,
    frames_tx: mpsc::Sender<String>,
    frames_rx: mpsc::Receiver<String>,
    events: Option<SessionEvents>,
    recording: bool,
}

impl VoiceSession {
    /// Create a disconnected session
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(
        config: VoiceSessionConfig,
        connector: Arc<dyn Connector>,
        capture: Box<dyn AudioInput>,
    ) -> Result<Self> {
        config.validate()?;

        let transcript = TranscriptStore::new();
        let (status, _) = watch::channel(SessionStatus::Disconnected);
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);

        Ok(Self {
            id: Uuid::new_v4(),
            client: SessionClient::new(connector, &config),
            playback: PlaybackEngine::from_config(&config),
            conversation: ConversationState::new(transcript.clone(), config.display_policy),
            transcript,
            capture,
            config,
            status,
            audio_open: Arc::new(AtomicBool::new(false)),
            frames_tx,
            frames_rx,
            events: None,
            recording: false,
        })
    }

    /// Bring the session up
    ///
    /// Playback must confirm readiness before the connection is opened, and
    /// no audio flows until the handshake completes.
    ///
    /// # Errors
    ///
    /// Returns `Error::RenderInit` if playback fails to start, or
    /// `Error::Transport` if the connection or handshake fails
    pub async fn start<D: OutputDevice>(&mut self, output: D) -> Result<()> {
        self.transcript.clear();
        self.conversation.reset();

        if let Err(e) = self.playback.initialize(output).await {
            return Err(self.fail(e));
        }

        self.set_status(SessionStatus::Connecting);
        if let Err(e) = self.client.connect().await {
            return Err(self.fail(e));
        }
        self.set_status(SessionStatus::Connected);
        if let Some(events) = self.client.take_events() {
            self.events = Some(events);
        }

        if let Err(e) = self.client.handshake().await {
            return Err(self.fail(e));
        }

        self.audio_open.store(true, Ordering::Release);
        self.set_status(self.idle_status());
        tracing::info!(session = %self.id, endpoint = %self.config.endpoint, "voice session ready");
        Ok(())
    }

    /// Open the microphone
    ///
    /// May be called before [`start`](Self::start) completes; frames are
    /// discarded at the capture callback until the session is ready.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the microphone is denied or unavailable
    pub fn start_recording(&mut self) -> Result<()> {
        if self.recording {
            return Ok(());
        }

        let open = Arc::clone(&self.audio_open);
        let frames = self.frames_tx.clone();
        let sink: FrameSink = Box::new(move |frame| {
            if open.load(Ordering::Acquire) && frames.try_send(frame).is_err() {
                tracing::trace!("frame buffer full, dropping capture frame");
            }
        });

        if let Err(e) = self.capture.start(sink) {
            return Err(self.fail(e));
        }

        self.recording = true;
        if self.client.is_ready() {
            self.set_status(SessionStatus::Recording);
        }
        tracing::debug!(session = %self.id, "recording started");
        Ok(())
    }

    /// Close the microphone and signal end of utterance
    ///
    /// Frames captured before the stop are sent ahead of `stop-audio`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if sending fails
    pub async fn stop_recording(&mut self) -> Result<()> {
        if !self.recording {
            return Ok(());
        }

        self.capture.stop();
        self.flush_frames().await?;
        self.recording = false;

        if self.client.is_ready() {
            if let Err(e) = self.client.send_stop_audio().await {
                return Err(self.fail(e));
            }
            self.set_status(SessionStatus::Processing);
        }
        tracing::debug!(session = %self.id, "recording stopped");
        Ok(())
    }

    /// Send every capture frame waiting in the buffer
    ///
    /// Returns the number of frames put on the wire.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if sending fails
    pub async fn flush_frames(&mut self) -> Result<usize> {
        let mut sent = 0;
        while let Ok(frame) = self.frames_rx.try_recv() {
            if self.forward_frame(frame).await? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Apply one inbound event
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` when the service reports an error
    pub fn handle_event(&mut self, event: InboundEvent) -> Result<()> {
        tracing::trace!(session = %self.id, event = event.name(), "inbound event");

        match self.conversation.dispatch(event, self.recording) {
            None => {}
            Some(Directive::Play(frame)) => {
                if let Err(e) = self.playback.play_audio(&frame) {
                    if e.is_fatal() {
                        return Err(self.fail(e));
                    }
                    tracing::warn!(session = %self.id, error = %e, "dropping assistant audio");
                }
            }
            Some(Directive::BargeIn) => self.playback.barge_in(),
            Some(Directive::SessionReady) => self.set_status(self.idle_status()),
            Some(Directive::Fault(payload)) => {
                return Err(self.fail(Error::Protocol(payload)));
            }
        }
        Ok(())
    }

    /// Drive the session until a disconnect is requested or a fatal error
    ///
    /// The caller tears down with [`disconnect`](Self::disconnect) afterwards;
    /// on error the transcript is left intact until then.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that ended the session
    pub async fn run(&mut self, mut commands: mpsc::Receiver<SessionCommand>) -> Result<()> {
        let mut events = self
            .events
            .take()
            .ok_or_else(|| Error::Transport("session not started".to_string()))?;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::StartRecording) => self.start_recording()?,
                    Some(SessionCommand::StopRecording) => self.stop_recording().await?,
                    Some(SessionCommand::Disconnect) | None => {
                        tracing::info!(session = %self.id, "disconnect requested");
                        return Ok(());
                    }
                },
                Some(frame) = self.frames_rx.recv() => {
                    self.forward_frame(frame).await?;
                }
                event = events.next() => match event {
                    Some(Ok(event)) => self.handle_event(event)?,
                    Some(Err(e)) => return Err(self.fail(e)),
                    None => {
                        return Err(self.fail(Error::Transport(
                            "connection closed by remote".to_string(),
                        )));
                    }
                },
            }
        }
    }

    /// Tear the session down in reverse start order
    ///
    /// Clears the transcript. Safe to call in any state.
    pub async fn disconnect(&mut self) {
        self.audio_open.store(false, Ordering::Release);
        self.capture.stop();
        self.recording = false;
        while self.frames_rx.try_recv().is_ok() {}

        self.client.disconnect().await;
        self.events = None;
        self.playback.stop();

        self.transcript.clear();
        self.conversation.reset();
        self.set_status(SessionStatus::Disconnected);
        tracing::info!(session = %self.id, "voice session disconnected");
    }

    /// Session identifier used in logs
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Watch status changes
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Handle to the conversation history
    #[must_use]
    pub fn transcript(&self) -> TranscriptStore {
        self.transcript.clone()
    }

    /// Thinking indicators
    #[must_use]
    pub const fn thinking(&self) -> ThinkingState {
        self.conversation.thinking()
    }

    /// Tool execution state
    #[must_use]
    pub const fn tools(&self) -> &ToolExecutionState {
        self.conversation.tools()
    }

    /// Playback engine, for volume/sample snapshots
    #[must_use]
    pub const fn playback(&self) -> &PlaybackEngine {
        &self.playback
    }

    /// Session client
    #[must_use]
    pub const fn client(&self) -> &SessionClient {
        &self.client
    }

    /// Whether the microphone is live
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.recording
    }

    /// Per-connection configuration
    #[must_use]
    pub const fn config(&self) -> &VoiceSessionConfig {
        &self.config
    }

    async fn forward_frame(&mut self, frame: String) -> Result<bool> {
        if !self.recording {
            tracing::trace!("not recording, dropping capture frame");
            return Ok(false);
        }
        match self.client.send_audio_frame(frame).await {
            Ok(sent) => Ok(sent),
            Err(e) => Err(self.fail(e)),
        }
    }

    const fn idle_status(&self) -> SessionStatus {
        if self.recording {
            SessionStatus::Recording
        } else {
            SessionStatus::Ready
        }
    }

    fn set_status(&self, status: SessionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            tracing::debug!(session = %self.id, from = ?previous, to = ?status, "session status");
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        tracing::error!(session = %self.id, error = %error, "voice session failed");
        self.audio_open.store(false, Ordering::Release);
        if matches!(error, Error::Transport(_) | Error::Protocol(_)) {
            self.client.mark_failed();
        }
        self.conversation.fail();
        self.set_status(SessionStatus::Error);
        error
    }
}
