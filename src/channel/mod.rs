//! Reconnecting real-time channel.
//!
//! One background task owns the transport and runs the connection state
//! machine: `Idle → Connecting → Open → Closed → (fixed delay) → Connecting`,
//! forever, until the handle is shut down. While Open a `ping` goes out on a
//! fixed interval. Inbound frames are parsed and forwarded, in arrival order,
//! on an unbounded receiver; frames that fail to parse are logged and dropped
//! without touching the connection.

mod connection;
pub mod transport;
#[cfg(test)]
pub(crate) mod mock;
#[cfg(test)]
mod tests;

pub use transport::{Connector, Frame, Transport, WsConnector};

use crate::event::{InboundEvent, OutboundEvent};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// WebSocket "normal closure". Sent only when the client itself tears down.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Idle => "idle",
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Channel configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub url: String,
    /// Constant delay between a closure and the next attempt
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,
    /// Upper bound on one connection attempt; a stalled handshake counts as
    /// a failed attempt
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_retry_delay_ms() -> u64 {
    3000
}

fn default_liveness_interval_ms() -> u64 {
    5000
}

fn default_handshake_timeout_ms() -> u64 {
    10000
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry_delay_ms: default_retry_delay_ms(),
            liveness_interval_ms: default_liveness_interval_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        // A zero period would make tokio's interval panic
        Duration::from_millis(self.liveness_interval_ms.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelError {
    /// Send attempted while the channel was not Open
    NotOpen(ChannelState),
    Encode(String),
    Transport(String),
    /// The channel task is gone (handle shut down)
    Terminated,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::NotOpen(state) => write!(f, "channel is {}", state),
            ChannelError::Encode(reason) => write!(f, "failed to encode frame: {}", reason),
            ChannelError::Transport(reason) => write!(f, "transport error: {}", reason),
            ChannelError::Terminated => write!(f, "channel has been shut down"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Frame waiting to be written, with an optional write acknowledgement.
pub(crate) struct Outbound {
    pub(crate) text: String,
    pub(crate) ack: Option<oneshot::Sender<Result<(), ChannelError>>>,
}

/// Exclusive handle to a running channel.
///
/// All interaction with the transport goes through `send`/`deliver` and
/// `shutdown`. Dropping the handle without calling `shutdown` aborts the
/// background task.
pub struct ChannelHandle {
    sender: ChannelSender,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Cloneable send side of a channel, for work running off the owner's task.
///
/// Holds no lifecycle control: once the handle shuts down, every send fails
/// with `NotOpen` or `Terminated`.
#[derive(Clone)]
pub struct ChannelSender {
    state_rx: watch::Receiver<ChannelState>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

/// Start a channel. Returns the handle and the ordered stream of inbound
/// events.
pub fn spawn(
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
) -> (ChannelHandle, mpsc::UnboundedReceiver<InboundEvent>) {
    let (state_tx, state_rx) = watch::channel(ChannelState::Idle);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    info!(
        endpoint = %connector.endpoint(),
        retry_delay_ms = config.retry_delay_ms,
        liveness_interval_ms = config.liveness_interval_ms,
        "Starting real-time channel"
    );

    let task = tokio::spawn(connection::run(
        config,
        connector,
        state_tx,
        outbound_rx,
        inbound_tx,
        shutdown_rx,
    ));

    let handle = ChannelHandle {
        sender: ChannelSender {
            state_rx,
            outbound_tx,
        },
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    };
    (handle, inbound_rx)
}

/// Convenience wrapper: WebSocket channel to `config.url`.
pub fn connect_ws(
    config: ChannelConfig,
) -> (ChannelHandle, mpsc::UnboundedReceiver<InboundEvent>) {
    let connector = Arc::new(WsConnector::new(config.url.clone()));
    spawn(config, connector)
}

impl ChannelHandle {
    pub fn state(&self) -> ChannelState {
        self.sender.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Watch state transitions (e.g. for a "reconnecting…" indicator).
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.sender.state_rx.clone()
    }

    /// Send side that can be moved into a spawned task.
    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Fire-and-forget send.
    ///
    /// Fails immediately with `NotOpen` when the channel is not Open so the
    /// caller can take a fallback path. A frame accepted here may still be
    /// dropped if the transport closes before it is written; use `deliver`
    /// when that matters.
    pub fn send(&self, event: &OutboundEvent) -> Result<(), ChannelError> {
        self.sender.send(event)
    }

    /// Send and wait until the frame has been written to the transport.
    pub async fn deliver(&self, event: &OutboundEvent) -> Result<(), ChannelError> {
        self.sender.deliver(event).await
    }

    /// Tear the channel down: cancels a pending reconnection, closes an open
    /// transport with `NORMAL_CLOSURE`, and waits for the task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Channel task ended abnormally");
                }
            }
        }
    }
}

impl ChannelSender {
    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    pub fn send(&self, event: &OutboundEvent) -> Result<(), ChannelError> {
        self.enqueue(event, None)
    }

    pub async fn deliver(&self, event: &OutboundEvent) -> Result<(), ChannelError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.enqueue(event, Some(ack_tx))?;
        ack_rx.await.map_err(|_| ChannelError::Terminated)?
    }

    fn enqueue(
        &self,
        event: &OutboundEvent,
        ack: Option<oneshot::Sender<Result<(), ChannelError>>>,
    ) -> Result<(), ChannelError> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(ChannelError::NotOpen(state));
        }
        let text = event
            .to_frame()
            .map_err(|e| ChannelError::Encode(e.to_string()))?;
        self.outbound_tx
            .send(Outbound { text, ack })
            .map_err(|_| ChannelError::Terminated)
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
