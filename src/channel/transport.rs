use super::ChannelError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// One frame as seen by the channel state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    /// Peer closed, with its close code if it sent one
    Close(Option<u16>),
    /// Binary, ping and pong frames (answered by the transport itself)
    Other,
}

/// A connected duplex transport.
///
/// Owned exclusively by the channel task; nothing else holds it.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError>;

    /// Next frame, or `None` once the stream has ended.
    async fn next_frame(&mut self) -> Option<Result<Frame, ChannelError>>;

    async fn close(&mut self, code: u16) -> Result<(), ChannelError>;
}

/// Opens transports for the channel, once per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, ChannelError>;

    /// Where this connector points (for logs)
    fn endpoint(&self) -> &str;
}

/// WebSocket connector (`ws://` or `wss://`).
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, ChannelError> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        debug!(url = %self.url, status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WsTransport { stream }))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, ChannelError>> {
        let msg = self.stream.next().await?;
        Some(match msg {
            Ok(Message::Text(text)) => Ok(Frame::Text(text.as_str().to_string())),
            Ok(Message::Close(frame)) => Ok(Frame::Close(frame.map(|f| u16::from(f.code)))),
            Ok(_) => Ok(Frame::Other),
            Err(e) => Err(ChannelError::Transport(e.to_string())),
        })
    }

    async fn close(&mut self, code: u16) -> Result<(), ChannelError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Utf8Bytes::from_static(""),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }
}
