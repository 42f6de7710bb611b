//! Transport classifier
//!
//! Maps raw transport failures and HTTP responses onto [`RequestError`]s with
//! a [`ErrorKind`] and a retry decision. Everything above this module reasons
//! about kinds and the retry flag only.

use serde_json::Value;

use crate::error::{ErrorKind, RequestError, RequestResult};

/// Well-known transport failure codes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransportCode {
    ConnectionRefused,
    ConnectionReset,
    TimedOut,
    DnsFailure,
    BrokenPipe,
    HostUnreachable,
    NetworkUnreachable,
    TlsHandshakeTimeout,
    CertificateExpired,
    HostnameMismatch,
    WrongProtocol,
    UntrustedCertificate,
    Other(String),
}

impl TransportCode {
    pub const NETWORK: &'static [TransportCode] = &[
        TransportCode::ConnectionRefused,
        TransportCode::ConnectionReset,
        TransportCode::TimedOut,
        TransportCode::DnsFailure,
        TransportCode::BrokenPipe,
        TransportCode::HostUnreachable,
        TransportCode::NetworkUnreachable,
        TransportCode::TlsHandshakeTimeout,
    ];

    pub const TLS: &'static [TransportCode] = &[
        TransportCode::CertificateExpired,
        TransportCode::HostnameMismatch,
        TransportCode::WrongProtocol,
        TransportCode::UntrustedCertificate,
    ];

    /// Parse a socket/TLS error code as reported by the platform
    pub fn from_code(code: &str) -> Self {
        match code {
            "ECONNREFUSED" => TransportCode::ConnectionRefused,
            "ECONNRESET" | "ECONNABORTED" => TransportCode::ConnectionReset,
            "ETIMEDOUT" | "ESOCKETTIMEDOUT" | "UND_ERR_CONNECT_TIMEOUT" => TransportCode::TimedOut,
            "ENOTFOUND" | "EAI_AGAIN" => TransportCode::DnsFailure,
            "EPIPE" => TransportCode::BrokenPipe,
            "EHOSTUNREACH" => TransportCode::HostUnreachable,
            "ENETUNREACH" => TransportCode::NetworkUnreachable,
            "ERR_TLS_HANDSHAKE_TIMEOUT" => TransportCode::TlsHandshakeTimeout,
            "CERT_HAS_EXPIRED" => TransportCode::CertificateExpired,
            "ERR_TLS_CERT_ALTNAME_INVALID" => TransportCode::HostnameMismatch,
            "EPROTO" | "ERR_SSL_WRONG_VERSION_NUMBER" => TransportCode::WrongProtocol,
            "SELF_SIGNED_CERT_IN_CHAIN"
            | "DEPTH_ZERO_SELF_SIGNED_CERT"
            | "UNABLE_TO_VERIFY_LEAF_SIGNATURE" => TransportCode::UntrustedCertificate,
            other => TransportCode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TransportCode::ConnectionRefused => "ECONNREFUSED",
            TransportCode::ConnectionReset => "ECONNRESET",
            TransportCode::TimedOut => "ETIMEDOUT",
            TransportCode::DnsFailure => "ENOTFOUND",
            TransportCode::BrokenPipe => "EPIPE",
            TransportCode::HostUnreachable => "EHOSTUNREACH",
            TransportCode::NetworkUnreachable => "ENETUNREACH",
            TransportCode::TlsHandshakeTimeout => "ERR_TLS_HANDSHAKE_TIMEOUT",
            TransportCode::CertificateExpired => "CERT_HAS_EXPIRED",
            TransportCode::HostnameMismatch => "ERR_TLS_CERT_ALTNAME_INVALID",
            TransportCode::WrongProtocol => "EPROTO",
            TransportCode::UntrustedCertificate => "SELF_SIGNED_CERT_IN_CHAIN",
            TransportCode::Other(code) => code,
        }
    }

    pub fn is_network(&self) -> bool {
        Self::NETWORK.contains(self)
    }

    pub fn is_tls(&self) -> bool {
        Self::TLS.contains(self)
    }
}

/// A request that never produced an HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub code: Option<TransportCode>,
    /// Error type name, when the transport reports one
    pub name: Option<String>,
    pub message: String,
}

impl TransportFailure {
    pub fn new(code: Option<TransportCode>, message: impl Into<String>) -> Self {
        Self {
            code,
            name: None,
            message: message.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A received HTTP response, body unparsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: String::new(),
            body: body.into(),
        }
    }

    pub fn with_status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = status_text.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Result of one request attempt at the transport level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Transport(TransportFailure),
    Response(HttpResponse),
}

/// Classify a request outcome
///
/// `credentials_supplied` distinguishes a 401 caused by missing credentials
/// from one caused by rejected credentials.
pub fn classify(outcome: Outcome, credentials_supplied: bool) -> RequestResult {
    match outcome {
        Outcome::Transport(failure) => Err(classify_transport(&failure)),
        Outcome::Response(response) => classify_response(&response, credentials_supplied),
    }
}

pub fn classify_transport(failure: &TransportFailure) -> RequestError {
    let message = if failure.message.is_empty() {
        failure
            .name
            .clone()
            .unwrap_or_else(|| "transport error".to_string())
    } else {
        failure.message.clone()
    };

    let Some(code) = &failure.code else {
        return RequestError::new(ErrorKind::Unknown, message);
    };

    let kind = if code.is_network() {
        ErrorKind::Network
    } else if code.is_tls() {
        ErrorKind::Tls
    } else {
        ErrorKind::Unknown
    };

    let mut error = RequestError::new(kind, message).with_code(code.as_str());
    error.retry = kind == ErrorKind::Network;
    error
}

pub fn classify_response(response: &HttpResponse, credentials_supplied: bool) -> RequestResult {
    if response.is_success() {
        return Ok(parse_body(&response.body));
    }

    let status = response.status;
    let message = extract_message(response);
    let kind = match status {
        401 | 403 => ErrorKind::Auth,
        _ => ErrorKind::Http,
    };

    let mut error = RequestError::new(kind, message).with_status(status);
    error.has_body = !response.body.trim().is_empty();
    match status {
        401 if credentials_supplied => error.auth_failed = true,
        401 => error.auth_required = true,
        503 => error.retry = true,
        _ => {}
    }
    Err(error)
}

/// Success body: JSON when it parses, a JSON string otherwise, null when empty
fn parse_body(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

/// Best-effort error message: `error.message`, `message`, raw body, status line
pub fn extract_message(response: &HttpResponse) -> String {
    if let Ok(body) = serde_json::from_str::<Value>(&response.body) {
        let nested = body
            .pointer("/error/message")
            .or_else(|| body.get("message"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        if let Some(message) = nested {
            return message.to_string();
        }
    }

    let raw = response.body.trim();
    if !raw.is_empty() {
        return raw.to_string();
    }

    if response.status_text.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        format!("HTTP {} {}", response.status, response.status_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failure(code: TransportCode) -> Outcome {
        Outcome::Transport(TransportFailure::new(Some(code), "failed"))
    }

    #[test]
    fn test_network_codes_are_retryable() {
        for code in TransportCode::NETWORK {
            let error = classify(failure(code.clone()), false).unwrap_err();
            assert_eq!(error.kind, ErrorKind::Network, "{:?}", code);
            assert!(error.retry, "{:?}", code);
            assert_eq!(error.code.as_deref(), Some(code.as_str()));
        }
    }

    #[test]
    fn test_tls_codes_are_fatal() {
        for code in TransportCode::TLS {
            let error = classify(failure(code.clone()), false).unwrap_err();
            assert_eq!(error.kind, ErrorKind::Tls, "{:?}", code);
            assert!(!error.retry, "{:?}", code);
        }
    }

    #[test]
    fn test_code_aliases() {
        assert_eq!(TransportCode::from_code("EAI_AGAIN"), TransportCode::DnsFailure);
        assert_eq!(TransportCode::from_code("ENOTFOUND"), TransportCode::DnsFailure);
        assert_eq!(
            TransportCode::from_code("DEPTH_ZERO_SELF_SIGNED_CERT"),
            TransportCode::UntrustedCertificate
        );
        assert_eq!(
            TransportCode::from_code("EWEIRD"),
            TransportCode::Other("EWEIRD".to_string())
        );
    }

    #[test]
    fn test_unknown_keeps_original_message() {
        let outcome = Outcome::Transport(
            TransportFailure::new(Some(TransportCode::Other("EWEIRD".into())), "odd failure")
                .with_name("WeirdError"),
        );
        let error = classify(outcome, false).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Unknown);
        assert!(!error.retry);
        assert_eq!(error.message, "odd failure");

        let nameless = Outcome::Transport(TransportFailure::new(None, "").with_name("AbortError"));
        let error = classify(nameless, false).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Unknown);
        assert_eq!(error.message, "AbortError");
    }

    #[test]
    fn test_success_bodies() {
        let ok = |body: &str| classify(Outcome::Response(HttpResponse::new(200, body)), false);
        assert_eq!(ok(r#"{"state":"ON"}"#).unwrap(), json!({"state": "ON"}));
        assert_eq!(ok("ON").unwrap(), json!("ON"));
        assert_eq!(ok("").unwrap(), Value::Null);
        assert_eq!(
            classify(Outcome::Response(HttpResponse::new(202, "")), false).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_auth_statuses() {
        let response = HttpResponse::new(401, "");
        let error = classify_response(&response, false).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Auth);
        assert!(error.auth_required);
        assert!(!error.auth_failed);

        let error = classify_response(&response, true).unwrap_err();
        assert!(error.auth_failed);
        assert!(!error.auth_required);
        assert!(!error.retry);

        let error = classify_response(&HttpResponse::new(403, ""), true).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Auth);
        assert!(!error.auth_failed);
    }

    #[test]
    fn test_unavailable_is_retryable() {
        let error = classify_response(&HttpResponse::new(503, ""), false).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Http);
        assert!(error.retry);
    }

    #[test]
    fn test_not_found_is_not_retryable() {
        let error = classify_response(&HttpResponse::new(404, ""), false).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Http);
        assert_eq!(error.status, Some(404));
        assert!(!error.retry);
        assert!(!error.has_body);

        let body = r#"{"error":{"message":"Item X does not exist!"}}"#;
        let error = classify_response(&HttpResponse::new(404, body), false).unwrap_err();
        assert!(error.has_body);
        assert_eq!(error.message, "Item X does not exist!");
    }

    #[test]
    fn test_message_extraction_order() {
        let message = |body: &str| {
            extract_message(&HttpResponse::new(500, body).with_status_text("Internal Server Error"))
        };

        assert_eq!(
            message(r#"{"error":{"message":"nested"},"message":"top"}"#),
            "nested"
        );
        assert_eq!(message(r#"{"message":"top"}"#), "top");
        assert_eq!(message("plain failure"), "plain failure");
        assert_eq!(message(""), "HTTP 500 Internal Server Error");
        assert_eq!(extract_message(&HttpResponse::new(418, "")), "HTTP 418");
    }
}
