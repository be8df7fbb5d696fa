//! Kiosk client: the panic-button device at a bus stop.
//!
//! Shows device identity, a live-link status and a message log; sends
//! emergencies over the real-time channel with an HTTP fallback.

pub mod log;
pub mod report;

pub use log::{LogEntry, LogKind, MessageLog};
pub use report::{DeliveryError, DeliveryPath, EmergencyReporter};

use crate::channel::{ChannelHandle, ChannelState};
use crate::config::KioskConfig;
use crate::event::InboundEvent;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const ONLINE_MESSAGE: &str = "System is online.";
pub const CONNECTION_LOST_MESSAGE: &str = "Connection to server lost. Reconnecting...";
pub const EMERGENCY_SENT_MESSAGE: &str =
    "Emergency alert sent! An operator will respond shortly.";
pub const LINK_UP_MESSAGE: &str = "Live video link with operator established.";
pub const LINK_DOWN_MESSAGE: &str = "Live video link ended.";

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
}

/// Live video link between this kiosk and an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KioskCommand {
    PressEmergency,
    Shutdown,
}

pub struct Kiosk {
    device: DeviceInfo,
    channel: ChannelHandle,
    reporter: EmergencyReporter,
    /// Emergency reports still being delivered
    deliveries: JoinSet<Result<DeliveryPath, DeliveryError>>,
    log: MessageLog,
    link_status: LinkStatus,
    last_emergency: Option<DateTime<Utc>>,
    /// Set once the channel has been Open, cleared when it drops
    was_open: bool,
    suppressed_echoes: u64,
}

impl Kiosk {
    pub fn new(config: &KioskConfig, channel: ChannelHandle) -> Self {
        let reporter = EmergencyReporter::new(
            config.device_id.clone(),
            config.device_name.clone(),
            config.fallback_url.clone(),
        );
        Self {
            device: DeviceInfo {
                id: config.device_id.clone(),
                name: config.device_name.clone(),
            },
            channel,
            reporter,
            deliveries: JoinSet::new(),
            log: MessageLog::new(),
            link_status: LinkStatus::Disconnected,
            last_emergency: None,
            was_open: false,
            suppressed_echoes: 0,
        }
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn link_status(&self) -> LinkStatus {
        self.link_status
    }

    pub fn last_emergency(&self) -> Option<DateTime<Utc>> {
        self.last_emergency
    }

    pub fn suppressed_echoes(&self) -> u64 {
        self.suppressed_echoes
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn deliveries_in_flight(&self) -> usize {
        self.deliveries.len()
    }

    /// Soft status indicator; transport trouble never shows as a hard error
    pub fn status_line(&self) -> &'static str {
        match self.channel.state() {
            ChannelState::Open => "online",
            ChannelState::Idle | ChannelState::Connecting => "connecting…",
            ChannelState::Closing | ChannelState::Closed => "reconnecting…",
        }
    }

    /// React to a channel state transition.
    pub fn on_channel_state(&mut self, state: ChannelState) {
        match state {
            ChannelState::Open if !self.was_open => {
                self.was_open = true;
                self.log.push(LogKind::System, ONLINE_MESSAGE);
            }
            // Connecting too: the watch may coalesce Closed → Connecting
            ChannelState::Closed | ChannelState::Connecting if self.was_open => {
                self.was_open = false;
                self.log.push(LogKind::System, CONNECTION_LOST_MESSAGE);
            }
            _ => {}
        }
    }

    /// Dispatch one inbound event.
    pub fn handle_event(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Pong => {}
            InboundEvent::WebexConnectionStatus { connected, .. } => {
                if connected {
                    self.link_status = LinkStatus::Connected;
                    self.log.push(LogKind::System, LINK_UP_MESSAGE);
                } else {
                    self.link_status = LinkStatus::Disconnected;
                    self.log.push(LogKind::System, LINK_DOWN_MESSAGE);
                }
            }
            InboundEvent::AdminMessage { content, .. } => {
                self.log.push(LogKind::Admin, content);
            }
            InboundEvent::EmergencyActivated { .. } => {
                // Echo of our own press: the "sent" entry already exists
                self.last_emergency = Some(Utc::now());
                self.suppressed_echoes += 1;
                debug!(device_id = %self.device.id, "Emergency echo received, not logged again");
            }
            InboundEvent::Error { message } => {
                warn!(device_id = %self.device.id, message = %message, "Backend reported an error");
            }
            other => {
                debug!(kind = other.kind(), "Event not addressed to kiosk, ignored");
            }
        }
    }

    /// Panic button. Logs the "sent" entry exactly once and at once, then
    /// delivers in the background; the outcome comes back through
    /// `next_delivery` (or the `run` loop).
    pub fn press_emergency_button(&mut self) {
        let pressed_at = Utc::now();
        self.last_emergency = Some(pressed_at);
        self.log.push(LogKind::Emergency, EMERGENCY_SENT_MESSAGE);

        let reporter = self.reporter.clone();
        let channel = self.channel.sender();
        self.deliveries
            .spawn(async move { reporter.report(&channel, pressed_at).await });
    }

    /// Wait for the next emergency delivery to finish. `None` when nothing
    /// is in flight.
    pub async fn next_delivery(&mut self) -> Option<Result<DeliveryPath, DeliveryError>> {
        while let Some(joined) = self.deliveries.join_next().await {
            match joined {
                Ok(outcome) => {
                    self.on_delivery(&outcome);
                    return Some(outcome);
                }
                Err(e) => warn!(error = %e, "Emergency delivery task ended abnormally"),
            }
        }
        None
    }

    /// A failed delivery adds one visible error entry.
    fn on_delivery(&mut self, outcome: &Result<DeliveryPath, DeliveryError>) {
        if let Err(e) = outcome {
            self.log
                .push(LogKind::Error, format!("Failed to send emergency alert: {}", e));
        }
    }

    /// Event loop: channel state, inbound events, delivery outcomes and
    /// local commands are handled one at a time in arrival order. Nothing
    /// here waits on the network.
    pub async fn run(
        mut self,
        mut inbound_rx: mpsc::UnboundedReceiver<InboundEvent>,
        mut commands_rx: mpsc::UnboundedReceiver<KioskCommand>,
    ) {
        let mut state_rx = self.channel.subscribe_state();
        let initial = *state_rx.borrow_and_update();
        self.on_channel_state(initial);
        info!(device_id = %self.device.id, name = %self.device.name, "Kiosk running");

        loop {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        warn!("Channel state stream ended");
                        break;
                    }
                    let state = *state_rx.borrow_and_update();
                    self.on_channel_state(state);
                }
                Some(event) = inbound_rx.recv() => {
                    self.handle_event(event);
                }
                Some(joined) = self.deliveries.join_next(), if !self.deliveries.is_empty() => {
                    match joined {
                        Ok(outcome) => self.on_delivery(&outcome),
                        Err(e) => warn!(error = %e, "Emergency delivery task ended abnormally"),
                    }
                }
                command = commands_rx.recv() => {
                    match command {
                        Some(KioskCommand::PressEmergency) => self.press_emergency_button(),
                        Some(KioskCommand::Shutdown) | None => break,
                    }
                }
            }
        }

        self.shutdown().await;
    }

    pub async fn shutdown(mut self) {
        info!(device_id = %self.device.id, "Kiosk shutting down");
        if !self.deliveries.is_empty() {
            warn!(
                in_flight = self.deliveries.len(),
                "Abandoning emergency deliveries still in flight"
            );
        }
        self.deliveries.shutdown().await;
        self.channel.shutdown().await;
    }
}
