//! Connection and session status types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a server connection
///
/// ```text
/// Down ──start──▶ Connecting ──stream open──▶ Up
///   ▲                 ▲   │                    │
///   │                 │   └──────close─────────┤
///   │                 └──stream error / retryable request failure
///   └──────────────────────────close───────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Down,
    Connecting,
    Up,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Down => "down",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Up => "up",
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, ConnectionState::Up)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On/off flag published on the connection status tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    On,
    Off,
}

/// Semantic status for a status indicator, decoupled from the error taxonomy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Connecting,
    Up,
    #[default]
    Down,
    Error,
}

impl From<ConnectionState> for SessionStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Down => SessionStatus::Down,
            ConnectionState::Connecting => SessionStatus::Connecting,
            ConnectionState::Up => SessionStatus::Up,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Up => "up",
            SessionStatus::Down => "down",
            SessionStatus::Error => "error",
        };
        f.write_str(s)
    }
}
