//! Request and stream errors

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub type RequestResult = Result<Value, RequestError>;

/// Failure taxonomy shared by the request path and the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient transport failure
    Network,
    /// Certificate or protocol failure; retrying will not help
    Tls,
    /// 401 / 403
    Auth,
    /// Resource-level failure confirmed against a live server
    Domain,
    /// Server believed down
    System,
    /// Any other non-2xx response
    Http,
    /// Request rejected locally because the connection is not up
    Offline,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Tls => "tls",
            ErrorKind::Auth => "auth",
            ErrorKind::Domain => "domain",
            ErrorKind::System => "system",
            ErrorKind::Http => "http",
            ErrorKind::Offline => "offline",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified request failure
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct RequestError {
    pub kind: ErrorKind,
    /// Whether the connection should treat the server as offline and retry
    pub retry: bool,
    pub message: String,
    /// HTTP status, for response failures
    pub status: Option<u16>,
    /// Transport error code (e.g. `ECONNREFUSED`), for transport failures
    pub code: Option<String>,
    /// 401 without credentials
    pub auth_required: bool,
    /// 401 with rejected credentials
    pub auth_failed: bool,
    /// Whether the failed response carried a body
    pub has_body: bool,
}

impl RequestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retry: false,
            message: message.into(),
            status: None,
            code: None,
            auth_required: false,
            auth_failed: false,
            has_body: false,
        }
    }

    pub fn offline(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Offline, message)
    }

    /// 404-shaped failure raised without touching the network
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Http, message).with_status(404)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retry = true;
        self
    }

    /// Resource genuinely absent on a live server
    pub fn into_domain(mut self) -> Self {
        self.kind = ErrorKind::Domain;
        self.retry = false;
        self
    }

    /// Server did not answer the health probe
    pub fn into_system(mut self) -> Self {
        self.kind = ErrorKind::System;
        self.retry = true;
        self
    }

    /// Annotate a retryable failure after the connection has been degraded
    pub fn mark_offline(mut self) -> Self {
        self.message = format!("{} (server offline)", self.message);
        self
    }
}

/// A failure on the event stream
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct StreamError {
    pub message: String,
    /// `type` field of the error payload, when the stream layer reports one
    pub error_type: Option<Value>,
    /// Classified failure when the stream could not be opened
    pub request: Option<RequestError>,
}

impl StreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            request: None,
        }
    }

    /// Error payload whose `type` is present but an empty object
    pub fn phantom() -> Self {
        Self {
            message: String::new(),
            error_type: Some(Value::Object(Default::default())),
            request: None,
        }
    }

    pub fn is_phantom(&self) -> bool {
        matches!(&self.error_type, Some(Value::Object(map)) if map.is_empty())
    }
}

impl From<RequestError> for StreamError {
    fn from(error: RequestError) -> Self {
        Self {
            message: error.message.clone(),
            error_type: Some(Value::String(error.kind.as_str().to_string())),
            request: Some(error),
        }
    }
}
