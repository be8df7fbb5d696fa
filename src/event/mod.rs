use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

mod validation;

pub use validation::{validate_emergency, ValidationError};

/// Every `type` value an inbound frame may carry.
pub const INBOUND_TYPES: &[&str] = &[
    "ping",
    "pong",
    "webex_connection_status",
    "connection_status",
    "admin_message",
    "emergency_activated",
    "emergency",
    "connection_established",
    "webex_connection_established",
    "webex_connection_terminated",
    "error",
];

/// Backend → client frame.
///
/// One JSON object per frame with a mandatory `type` discriminant. Kiosks
/// and dashboards share the envelope; each role ignores the variants that
/// are not addressed to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Ping,
    Pong,
    /// Live video link between the kiosk and an operator went up or down.
    #[serde(alias = "connection_status")]
    WebexConnectionStatus {
        connected: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        with: Option<String>,
    },
    /// Free text pushed by an operator to a kiosk.
    AdminMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Backend confirmation of a kiosk-originated emergency.
    EmergencyActivated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    /// A new incident pushed to dashboards.
    Emergency(EmergencyReport),
    /// Kiosk admin endpoint greeting.
    ConnectionEstablished {
        #[serde(default)]
        device_info: Value,
    },
    WebexConnectionEstablished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    WebexConnectionTerminated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Error {
        message: String,
    },
}

/// Payload of an `emergency` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyReport {
    #[serde(alias = "busStopId")]
    pub stop_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    /// Origin timestamp as sent by the relay (not necessarily RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl InboundEvent {
    /// Parse one text frame.
    ///
    /// The `type` field is checked before the payload so an unrecognized
    /// type is reported as such rather than as a generic decode failure.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(FrameError::Malformed("frame is not a JSON object".to_string()));
        }

        let kind = match value.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_string(),
            None => return Err(FrameError::MissingType),
        };
        if !INBOUND_TYPES.contains(&kind.as_str()) {
            return Err(FrameError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|e| FrameError::InvalidPayload {
            kind,
            reason: e.to_string(),
        })
    }

    /// Wire name of this event's `type`
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Ping => "ping",
            InboundEvent::Pong => "pong",
            InboundEvent::WebexConnectionStatus { .. } => "webex_connection_status",
            InboundEvent::AdminMessage { .. } => "admin_message",
            InboundEvent::EmergencyActivated { .. } => "emergency_activated",
            InboundEvent::Emergency(_) => "emergency",
            InboundEvent::ConnectionEstablished { .. } => "connection_established",
            InboundEvent::WebexConnectionEstablished { .. } => "webex_connection_established",
            InboundEvent::WebexConnectionTerminated { .. } => "webex_connection_terminated",
            InboundEvent::Error { .. } => "error",
        }
    }
}

/// Client → backend frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Ping,
    /// Kiosk panic button press.
    EmergencyButton {
        timestamp: DateTime<Utc>,
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "deviceName")]
        device_name: String,
    },
    /// Operator asks a kiosk to join a live video link.
    WebexConnectRequest,
    WebexDisconnect,
    AdminMessage {
        content: String,
    },
}

impl OutboundEvent {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Reasons an inbound frame is dropped before dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameError {
    Malformed(String),
    MissingType,
    UnknownType(String),
    InvalidPayload { kind: String, reason: String },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Malformed(reason) => write!(f, "malformed frame: {}", reason),
            FrameError::MissingType => write!(f, "frame has no string 'type' field"),
            FrameError::UnknownType(kind) => write!(f, "unknown event type '{}'", kind),
            FrameError::InvalidPayload { kind, reason } => {
                write!(f, "invalid '{}' payload: {}", kind, reason)
            }
        }
    }
}

impl std::error::Error for FrameError {}
