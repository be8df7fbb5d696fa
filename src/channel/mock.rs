//! In-memory transport for exercising the channel without sockets.

use super::{ChannelError, Connector, Frame, Transport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What the client wrote
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text(String),
    Close(u16),
}

/// Server side of one accepted mock connection
pub struct ServerEnd {
    pub to_client: mpsc::UnboundedSender<Frame>,
    pub from_client: mpsc::UnboundedReceiver<Sent>,
}

impl ServerEnd {
    pub fn push_text(&self, text: &str) {
        let _ = self.to_client.send(Frame::Text(text.to_string()));
    }

    pub fn close(&self, code: u16) {
        let _ = self.to_client.send(Frame::Close(Some(code)));
    }
}

pub struct MockConnector {
    pub attempts: AtomicUsize,
    pub refuse: AtomicBool,
    /// Attempts hang instead of completing the handshake
    pub stall: AtomicBool,
    accepted_tx: mpsc::UnboundedSender<ServerEnd>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            attempts: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            stall: AtomicBool::new(false),
            accepted_tx,
        });
        (connector, accepted_rx)
    }

    /// Connector that refuses every attempt
    pub fn refusing() -> Arc<Self> {
        let (connector, _accepted) = Self::new();
        connector.refuse.store(true, Ordering::SeqCst);
        connector
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, ChannelError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::Transport("connection refused".to_string()));
        }
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let _ = self.accepted_tx.send(ServerEnd {
            to_client,
            from_client,
        });
        Ok(Box::new(MockTransport { incoming, outgoing }))
    }

    fn endpoint(&self) -> &str {
        "mock://relay"
    }
}

struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Frame>,
    outgoing: mpsc::UnboundedSender<Sent>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.outgoing
            .send(Sent::Text(text))
            .map_err(|_| ChannelError::Transport("peer gone".to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, ChannelError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16) -> Result<(), ChannelError> {
        self.outgoing
            .send(Sent::Close(code))
            .map_err(|_| ChannelError::Transport("peer gone".to_string()))
    }
}
