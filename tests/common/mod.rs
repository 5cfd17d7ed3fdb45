//! Shared test utilities
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use beacon_realtime::session::{Connection, Connector, EventWriter, OutboundEvent};
use beacon_realtime::voice::{AudioInput, FrameSink, OutputDevice, SharedRenderQueue};
use beacon_realtime::{Error, Result, VoiceSessionConfig};

/// Config pointing at the in-memory service
#[must_use]
pub fn test_config() -> VoiceSessionConfig {
    VoiceSessionConfig::default().with_endpoint("memory://realtime")
}

/// In-memory stand-in for the remote service
///
/// Records every outbound event and lets the test push inbound ones.
#[derive(Default)]
pub struct MemoryConnector {
    sent: Arc<Mutex<Vec<OutboundEvent>>>,
    server: Mutex<Option<mpsc::Sender<Result<String>>>>,
    refuse: bool,
}

impl MemoryConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A connector whose endpoint refuses every connection
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            refuse: true,
            ..Self::default()
        })
    }

    /// Outbound events in send order
    pub fn sent(&self) -> Vec<OutboundEvent> {
        self.sent.lock().unwrap().clone()
    }

    /// Outbound event names in send order
    pub fn sent_names(&self) -> Vec<&'static str> {
        self.sent().iter().map(OutboundEvent::name).collect()
    }

    /// Deliver one inbound message to the client
    pub async fn push(&self, message: Value) {
        self.push_raw(message.to_string()).await;
    }

    /// Deliver raw text to the client
    pub async fn push_raw(&self, text: String) {
        let server = self.server.lock().unwrap().clone();
        server
            .expect("client not connected")
            .send(Ok(text))
            .await
            .expect("client hung up");
    }

    /// Close the connection from the service side
    pub fn hang_up(&self) {
        self.server.lock().unwrap().take();
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> Result<Connection> {
        if self.refuse {
            return Err(Error::Transport(format!("connection refused: {endpoint}")));
        }

        let (server, inbound) = mpsc::channel(64);
        *self.server.lock().unwrap() = Some(server);

        Ok(Connection {
            writer: Box::new(MemoryWriter {
                sent: Arc::clone(&self.sent),
                closed: false,
            }),
            inbound,
        })
    }
}

struct MemoryWriter {
    sent: Arc<Mutex<Vec<OutboundEvent>>>,
    closed: bool,
}

#[async_trait]
impl EventWriter for MemoryWriter {
    async fn send_text(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(Error::Transport("connection closed".to_string()));
        }
        let event: OutboundEvent = serde_json::from_str(&text)?;
        self.sent.lock().unwrap().push(event);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Microphone driven by the test
///
/// Clones share the same sink, so a test keeps one handle and hands another
/// to the session.
#[derive(Clone, Default)]
pub struct ScriptedInput {
    sink: Arc<Mutex<Option<FrameSink>>>,
    deny: bool,
}

impl ScriptedInput {
    /// A microphone whose permission is denied
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// Emit one wire frame as the capture callback would
    ///
    /// Returns whether a sink was attached.
    pub fn emit(&self, frame: String) -> bool {
        match self.sink.lock().unwrap().as_mut() {
            Some(sink) => {
                sink(frame);
                true
            }
            None => false,
        }
    }
}

impl AudioInput for ScriptedInput {
    fn start(&mut self, sink: FrameSink) -> Result<()> {
        if self.deny {
            return Err(Error::Device("microphone permission denied".to_string()));
        }
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.lock().unwrap().take();
    }

    fn is_capturing(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }
}

/// Output device that cannot be opened
pub struct FailingOutput;

impl OutputDevice for FailingOutput {
    type Stream = ();

    fn open(&mut self, _sample_rate: u32, _queue: SharedRenderQueue) -> Result<()> {
        Err(Error::RenderInit("no output device".to_string()))
    }
}

/// Generate sine wave samples
#[allow(clippy::cast_precision_loss)]
pub fn sine(frequency: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}
