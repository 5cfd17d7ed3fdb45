//! Duplex event transport
//!
//! The session client only sees [`Connector`] and [`EventWriter`]; the
//! WebSocket implementation lives here.

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::{Error, Result};

/// Inbound text messages; closes when the remote does
pub type InboundMessages = mpsc::Receiver<Result<String>>;

/// Outbound half of a connection
#[async_trait]
pub trait EventWriter: Send {
    /// Send one text message
    ///
    /// # Errors
    ///
    /// Returns error if the connection is gone
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns error if the close handshake fails
    async fn close(&mut self) -> Result<()>;
}

/// An open duplex connection
pub struct Connection {
    /// Outbound half
    pub writer: Box<dyn EventWriter>,
    /// Inbound half
    pub inbound: InboundMessages,
}

/// Opens connections to a streaming endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one duplex connection
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the endpoint refuses the connection
    async fn connect(&self, endpoint: &str) -> Result<Connection>;
}

/// Inbound messages buffered between the socket reader and the session
const INBOUND_BUFFER: usize = 256;

/// WebSocket connector
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<Connection> {
        let (ws, _) = connect_async(endpoint)
            .await
            .map_err(|e| Error::Transport(format!("failed to connect to {endpoint}: {e}")))?;

        tracing::info!(endpoint, "websocket connected");

        let (sink, mut stream) = ws.split();
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let forwarded = match message {
                    Ok(Message::Text(text)) => Ok(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => Ok(text),
                        Err(_) => {
                            tracing::warn!("dropping non-UTF-8 binary message");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "remote closed websocket");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => Err(Error::Transport(e.to_string())),
                };

                let failed = forwarded.is_err();
                if tx.send(forwarded).await.is_err() || failed {
                    break;
                }
            }
            tracing::debug!("websocket reader finished");
        });

        Ok(Connection {
            writer: Box::new(WebSocketWriter { sink }),
            inbound: rx,
        })
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct WebSocketWriter {
    sink: WsSink,
}

#[async_trait]
impl EventWriter for WebSocketWriter {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}
