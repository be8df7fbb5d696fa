use super::{ChannelConfig, ChannelError, ChannelState, Connector, Frame, Outbound, Transport};
use super::NORMAL_CLOSURE;
use crate::event::{FrameError, InboundEvent, OutboundEvent};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Why an Open session ended
enum SessionEnd {
    Shutdown,
    PeerClosed(Option<u16>),
    Failed(ChannelError),
    StreamEnded,
}

/// Connection state machine. Runs until shutdown is requested (or the
/// handle is dropped).
pub(super) async fn run(
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    state_tx: watch::Sender<ChannelState>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let endpoint = connector.endpoint().to_string();
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        state_tx.send_replace(ChannelState::Connecting);
        debug!(endpoint = %endpoint, attempt = attempt, "Connecting");

        let connected = tokio::select! {
            _ = &mut shutdown_rx => {
                state_tx.send_replace(ChannelState::Closed);
                info!(endpoint = %endpoint, "Channel shut down while connecting");
                return;
            }
            result = timeout(config.handshake_timeout(), connector.connect()) => {
                result.unwrap_or_else(|_| {
                    Err(ChannelError::Transport(format!(
                        "handshake timed out after {}ms",
                        config.handshake_timeout_ms
                    )))
                })
            }
        };

        match connected {
            Ok(mut transport) => {
                state_tx.send_replace(ChannelState::Open);
                info!(endpoint = %endpoint, attempt = attempt, "Channel open");

                let end = drive(
                    transport.as_mut(),
                    &config,
                    &state_tx,
                    &mut outbound_rx,
                    &inbound_tx,
                    &mut shutdown_rx,
                )
                .await;

                match end {
                    SessionEnd::Shutdown => {
                        fail_pending(&mut outbound_rx, ChannelState::Closed);
                        state_tx.send_replace(ChannelState::Closed);
                        info!(endpoint = %endpoint, "Channel closed by client");
                        return;
                    }
                    SessionEnd::PeerClosed(code) => {
                        warn!(endpoint = %endpoint, code = ?code, "Channel closed by peer");
                    }
                    SessionEnd::Failed(e) => {
                        warn!(endpoint = %endpoint, error = %e, "Channel transport failed");
                    }
                    SessionEnd::StreamEnded => {
                        warn!(endpoint = %endpoint, "Channel stream ended");
                    }
                }
            }
            Err(e) => {
                warn!(endpoint = %endpoint, attempt = attempt, error = %e, "Channel connect failed");
            }
        }

        state_tx.send_replace(ChannelState::Closed);
        fail_pending(&mut outbound_rx, ChannelState::Closed);

        // Fixed delay, no backoff
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!(endpoint = %endpoint, "Channel shut down, pending reconnect cancelled");
                return;
            }
            _ = sleep(config.retry_delay()) => {}
        }
    }
}

/// Open-state loop. The liveness ticker lives only as long as this call, so
/// no ping can go out after the session ends.
async fn drive(
    transport: &mut dyn Transport,
    config: &ChannelConfig,
    state_tx: &watch::Sender<ChannelState>,
    outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    inbound_tx: &mpsc::UnboundedSender<InboundEvent>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let period = config.liveness_interval();
    let mut liveness = interval_at(Instant::now() + period, period);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let ping = match OutboundEvent::Ping.to_frame() {
        Ok(text) => text,
        Err(e) => return SessionEnd::Failed(ChannelError::Encode(e.to_string())),
    };

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => {
                state_tx.send_replace(ChannelState::Closing);
                if let Err(e) = transport.close(NORMAL_CLOSURE).await {
                    debug!(error = %e, "Close handshake failed");
                }
                return SessionEnd::Shutdown;
            }

            frame = transport.next_frame() => {
                match frame {
                    Some(Ok(Frame::Text(text))) => dispatch(&text, inbound_tx),
                    Some(Ok(Frame::Close(code))) => return SessionEnd::PeerClosed(code),
                    Some(Ok(Frame::Other)) => {}
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    None => return SessionEnd::StreamEnded,
                }
            }

            Some(outbound) = outbound_rx.recv() => {
                let result = transport.send_text(outbound.text).await;
                let failed = result.clone().err();
                if let Some(ack) = outbound.ack {
                    let _ = ack.send(result);
                }
                if let Some(e) = failed {
                    return SessionEnd::Failed(e);
                }
            }

            _ = liveness.tick() => {
                if let Err(e) = transport.send_text(ping.clone()).await {
                    return SessionEnd::Failed(e);
                }
            }
        }
    }
}

/// Parse one text frame and forward it. Never ends the session.
fn dispatch(text: &str, inbound_tx: &mpsc::UnboundedSender<InboundEvent>) {
    match InboundEvent::parse(text) {
        Ok(event) => {
            debug!(kind = event.kind(), "Inbound event");
            if inbound_tx.send(event).is_err() {
                debug!("Inbound receiver dropped, event discarded");
            }
        }
        Err(FrameError::UnknownType(kind)) => {
            warn!(kind = %kind, "Unhandled event type, dropped");
        }
        Err(e) => {
            error!(error = %e, "Failed to parse inbound frame");
        }
    }
}

/// Fail every frame queued but not written; they are not replayed on the
/// next connection.
fn fail_pending(outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>, state: ChannelState) {
    let mut dropped = 0usize;
    while let Ok(outbound) = outbound_rx.try_recv() {
        dropped += 1;
        if let Some(ack) = outbound.ack {
            let _ = ack.send(Err(ChannelError::NotOpen(state)));
        }
    }
    if dropped > 0 {
        warn!(dropped = dropped, "Discarded unsent frames after closure");
    }
}
