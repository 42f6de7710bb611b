//! Normalized events and bus payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{ConnectionStatus, SessionStatus};

/// Tag carrying [`BusEvent::ConnectionStatus`]
pub const CONNECTION_STATUS_TAG: &str = "__CONNECTION_STATUS__";

/// Tag carrying [`BusEvent::GlobalError`]
pub const GLOBAL_ERROR_TAG: &str = "__GLOBAL_ERROR__";

/// Tag carrying [`BusEvent::Status`]
pub const STATUS_TAG: &str = "__STATUS__";

/// A server event reduced to a single payload value
///
/// Produced both from stream messages and from the startup enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// `"<concept>/<identifier>"`, also the bus tag
    pub topic: String,

    /// Extracted payload value (e.g. `"ON"`, `21.5`)
    pub payload: Value,

    /// Payload type reported by the server (e.g. `"OnOff"`, `"Switch"`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_type: Option<String>,

    /// Server event type (e.g. `"ItemStateEvent"`); `None` for enumerated resources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    /// Trailing topic segment (e.g. `"state"`, `"statechanged"`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_suffix: Option<String>,

    /// The message or resource as received
    pub raw: Value,

    pub received_at: DateTime<Utc>,
}

impl NormalizedEvent {
    pub fn new(topic: impl Into<String>, payload: Value, raw: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            payload_type: None,
            event_type: None,
            event_suffix: None,
            raw,
            received_at: Utc::now(),
        }
    }

    pub fn with_payload_type(mut self, payload_type: Option<String>) -> Self {
        self.payload_type = payload_type;
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_event_suffix(mut self, suffix: Option<String>) -> Self {
        self.event_suffix = suffix;
        self
    }
}

/// A failure that concerns the whole session rather than one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalError {
    pub message: String,
    /// Error kind from the classifier (e.g. "network", "auth"), if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub retry: bool,
}

impl GlobalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            retry: false,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>, retry: bool) -> Self {
        self.kind = Some(kind.into());
        self.retry = retry;
        self
    }
}

/// Everything a session publishes on its bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum BusEvent {
    Resource(NormalizedEvent),
    ConnectionStatus(ConnectionStatus),
    GlobalError(GlobalError),
    Status(SessionStatus),
}

impl BusEvent {
    pub fn as_resource(&self) -> Option<&NormalizedEvent> {
        match self {
            BusEvent::Resource(event) => Some(event),
            _ => None,
        }
    }
}
