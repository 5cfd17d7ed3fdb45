//! Streaming session with the remote speech-to-speech service
//!
//! Each transport implements `Connector` to provide one duplex event stream.

mod client;
pub mod protocol;
mod transport;

pub use client::{ConnectionStatus, SessionClient, SessionEvents};
pub use protocol::{
    AudioOutput, ContentEnd, ContentStart, ContentType, InboundEvent, OutboundEvent, Role,
    StopReason, TextOutput, ToolResult, ToolUse,
};
pub use transport::{Connection, Connector, EventWriter, InboundMessages, WebSocketConnector};
