//! Operator-side admin link to one kiosk.
//!
//! Carries live-video control and free-text messages over a reconnecting
//! channel to the kiosk's admin endpoint. Media stays with the video SDK.

use crate::channel::{self, ChannelConfig, ChannelError, ChannelHandle, ChannelState, Connector};
use crate::event::{InboundEvent, OutboundEvent};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveLinkStatus {
    Idle,
    /// `webex_connect_request` sent, no answer yet
    Requested,
    Established,
    Terminated,
}

impl fmt::Display for LiveLinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LiveLinkStatus::Idle => "idle",
            LiveLinkStatus::Requested => "requested",
            LiveLinkStatus::Established => "established",
            LiveLinkStatus::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkError {
    /// No admin endpoint configured for the stop
    NotConfigured(u64),
    /// No link open to the stop
    NotOpen(u64),
    Channel(ChannelError),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::NotConfigured(id) => write!(f, "no device endpoint configured for stop {}", id),
            LinkError::NotOpen(id) => write!(f, "no live link open to stop {}", id),
            LinkError::Channel(e) => write!(f, "live link unavailable: {}", e),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<ChannelError> for LinkError {
    fn from(e: ChannelError) -> Self {
        LinkError::Channel(e)
    }
}

pub struct LiveLink {
    stop_id: u64,
    channel: ChannelHandle,
    status: LiveLinkStatus,
    device_info: Option<Value>,
    last_error: Option<String>,
}

impl LiveLink {
    pub fn open(
        stop_id: u64,
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<InboundEvent>) {
        info!(stop_id = stop_id, url = %config.url, "Opening live link");
        let (channel, inbound_rx) = channel::spawn(config, connector);
        let link = Self {
            stop_id,
            channel,
            status: LiveLinkStatus::Idle,
            device_info: None,
            last_error: None,
        };
        (link, inbound_rx)
    }

    pub fn stop_id(&self) -> u64 {
        self.stop_id
    }

    pub fn status(&self) -> LiveLinkStatus {
        self.status
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn device_info(&self) -> Option<&Value> {
        self.device_info.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Ask the kiosk to join a live video link.
    pub fn request_connect(&mut self) -> Result<(), LinkError> {
        self.channel.send(&OutboundEvent::WebexConnectRequest)?;
        self.status = LiveLinkStatus::Requested;
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<(), LinkError> {
        self.channel.send(&OutboundEvent::WebexDisconnect)?;
        Ok(())
    }

    pub fn send_message(&self, content: impl Into<String>) -> Result<(), LinkError> {
        let event = OutboundEvent::AdminMessage {
            content: content.into(),
        };
        self.channel.send(&event)?;
        Ok(())
    }

    /// Apply one frame from the kiosk. Returns the error text of an `error`
    /// frame so the caller can surface it.
    pub fn handle_event(&mut self, event: InboundEvent) -> Option<String> {
        match event {
            InboundEvent::ConnectionEstablished { device_info } => {
                debug!(stop_id = self.stop_id, "Kiosk admin endpoint greeted");
                self.device_info = Some(device_info);
                None
            }
            InboundEvent::WebexConnectionEstablished { .. } => {
                info!(stop_id = self.stop_id, "Live video link established");
                self.status = LiveLinkStatus::Established;
                self.last_error = None;
                None
            }
            InboundEvent::WebexConnectionTerminated { .. } => {
                info!(stop_id = self.stop_id, "Live video link terminated");
                self.status = LiveLinkStatus::Terminated;
                None
            }
            InboundEvent::Error { message } => {
                warn!(stop_id = self.stop_id, message = %message, "Kiosk reported an error");
                self.last_error = Some(message.clone());
                Some(message)
            }
            other => {
                debug!(stop_id = self.stop_id, kind = other.kind(), "Ignored on live link");
                None
            }
        }
    }

    pub async fn shutdown(self) {
        info!(stop_id = self.stop_id, "Closing live link");
        self.channel.shutdown().await;
    }
}
