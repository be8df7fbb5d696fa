//! Emergency delivery: real-time channel first, one-shot HTTP POST when the
//! channel cannot take the frame. Never retried silently.

use crate::channel::{ChannelError, ChannelSender};
use crate::event::OutboundEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

/// Upper bound on the fallback request
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest response body carried into an error message
const MAX_ERROR_BODY: usize = 200;

/// Which path carried the report
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryPath {
    Channel,
    Http { status: u16 },
}

/// Both paths failed
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// Fallback endpoint answered with a non-2xx status
    Rejected {
        channel: ChannelError,
        status: u16,
        body: String,
    },
    /// Fallback request could not be completed
    Unreachable { channel: ChannelError, reason: String },
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Rejected {
                channel,
                status,
                body,
            } => {
                write!(f, "server rejected the alert (status {})", status)?;
                if !body.is_empty() {
                    write!(f, ": {}", body)?;
                }
                write!(f, " [{}]", channel)
            }
            DeliveryError::Unreachable { channel, reason } => {
                write!(f, "server unreachable: {} [{}]", reason, channel)
            }
        }
    }
}

impl std::error::Error for DeliveryError {}

/// JSON body of the HTTP fallback
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FallbackBody<'a> {
    timestamp: DateTime<Utc>,
    device_id: &'a str,
    device_name: &'a str,
}

#[derive(Clone)]
pub struct EmergencyReporter {
    device_id: String,
    device_name: String,
    fallback_url: String,
    http_client: reqwest::Client,
}

impl EmergencyReporter {
    pub fn new(device_id: String, device_name: String, fallback_url: String) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(FALLBACK_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client with timeout, using defaults");
                reqwest::Client::new()
            });
        Self {
            device_id,
            device_name,
            fallback_url,
            http_client,
        }
    }

    /// Deliver one report. Exactly one channel write or one HTTP POST is
    /// attempted per path; failures are returned, not retried.
    pub async fn report(
        &self,
        channel: &ChannelSender,
        pressed_at: DateTime<Utc>,
    ) -> Result<DeliveryPath, DeliveryError> {
        let event = OutboundEvent::EmergencyButton {
            timestamp: pressed_at,
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
        };

        let channel_error = match channel.deliver(&event).await {
            Ok(()) => {
                info!(device_id = %self.device_id, "Emergency sent over real-time channel");
                return Ok(DeliveryPath::Channel);
            }
            Err(e) => e,
        };

        info!(
            device_id = %self.device_id,
            reason = %channel_error,
            url = %self.fallback_url,
            "Channel unavailable, sending emergency over HTTP"
        );
        self.post_fallback(pressed_at, channel_error).await
    }

    async fn post_fallback(
        &self,
        pressed_at: DateTime<Utc>,
        channel_error: ChannelError,
    ) -> Result<DeliveryPath, DeliveryError> {
        let body = FallbackBody {
            timestamp: pressed_at,
            device_id: &self.device_id,
            device_name: &self.device_name,
        };

        let response = match self
            .http_client
            .post(&self.fallback_url)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Emergency fallback request failed");
                return Err(DeliveryError::Unreachable {
                    channel: channel_error,
                    reason: e.to_string(),
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body: String = text.chars().take(MAX_ERROR_BODY).collect();
            error!(status = status.as_u16(), body = %body, "Emergency fallback rejected");
            return Err(DeliveryError::Rejected {
                channel: channel_error,
                status: status.as_u16(),
                body,
            });
        }

        info!(status = status.as_u16(), "Emergency sent over HTTP fallback");
        Ok(DeliveryPath::Http {
            status: status.as_u16(),
        })
    }
}
