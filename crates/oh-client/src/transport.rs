//! Transport seam
//!
//! The connection talks to the server only through [`Transport`], so tests
//! can script responses and streams without sockets.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{BoxStream, StreamExt};
use oh_config::ServerConfig;
use oh_core::Method;
use reqwest::{header, Client};
use std::error::Error as StdError;
use std::io;
use std::time::Duration;
use tracing::{debug, trace};

use crate::classify::{
    classify_response, classify_transport, HttpResponse, TransportCode, TransportFailure,
};
use crate::error::StreamError;

/// Data of each `message` event on the stream
pub type MessageStream = BoxStream<'static, Result<String, StreamError>>;

/// A fully resolved request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_credentials(&self) -> bool {
        self.header(header::AUTHORIZATION.as_str()).is_some()
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one request and return the response, whatever its status
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure>;

    /// Open the server-sent event stream
    async fn open_stream(&self, request: HttpRequest) -> Result<MessageStream, StreamError>;
}

/// [`Transport`] backed by reqwest
pub struct ReqwestTransport {
    client: Client,
    stream_client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &ServerConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.allow_self_signed)
            .build()?;

        // The stream is long-lived: bound only the connect phase here, the
        // connection bounds the wait for response headers
        let stream_client = Client::builder()
            .connect_timeout(config.request_timeout())
            .tcp_keepalive(Duration::from_secs(60))
            .danger_accept_invalid_certs(config.allow_self_signed)
            .build()?;

        Ok(Self {
            client,
            stream_client,
        })
    }

    fn builder(client: &Client, request: HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
            Method::Put => client.put(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        builder
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        trace!(method = request.method.as_str(), url = %request.url, "Sending request");

        let response = Self::builder(&self.client, request)
            .send()
            .await
            .map_err(|e| failure_from_reqwest(&e))?;

        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or_default().to_string();
        let body = response.text().await.map_err(|e| failure_from_reqwest(&e))?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text,
            body,
        })
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<MessageStream, StreamError> {
        let credentials_supplied = request.has_credentials();
        debug!(url = %request.url, "Opening event stream");

        let response = Self::builder(&self.stream_client, request)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| StreamError::from(classify_transport(&failure_from_reqwest(&e))))?;

        let status = response.status();
        if !status.is_success() {
            let status_text = status.canonical_reason().unwrap_or_default().to_string();
            let body = response.text().await.unwrap_or_default();
            let response = HttpResponse {
                status: status.as_u16(),
                status_text,
                body,
            };
            return match classify_response(&response, credentials_supplied) {
                Err(error) => Err(error.into()),
                Ok(_) => Err(StreamError::new(format!("unexpected status {}", status))),
            };
        }

        let stream = response
            .bytes_stream()
            .eventsource()
            .filter_map(|item| async move {
                match item {
                    Ok(event) if event.event.is_empty() || event.event == "message" => {
                        Some(Ok(event.data))
                    }
                    Ok(event) => {
                        trace!(event = %event.event, "Ignoring non-message event");
                        None
                    }
                    Err(e) => Some(Err(StreamError::new(e.to_string()))),
                }
            })
            .boxed();

        Ok(stream)
    }
}

/// Map a reqwest error onto a transport failure by walking its source chain
pub fn failure_from_reqwest(error: &reqwest::Error) -> TransportFailure {
    let code = if error.is_timeout() {
        Some(TransportCode::TimedOut)
    } else {
        code_from_chain(error)
    };
    TransportFailure::new(code, error.to_string()).with_name("reqwest::Error")
}

fn code_from_chain(error: &reqwest::Error) -> Option<TransportCode> {
    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(cause) = source {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            match io_error.kind() {
                io::ErrorKind::ConnectionRefused => return Some(TransportCode::ConnectionRefused),
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                    return Some(TransportCode::ConnectionReset)
                }
                io::ErrorKind::BrokenPipe => return Some(TransportCode::BrokenPipe),
                io::ErrorKind::TimedOut => return Some(TransportCode::TimedOut),
                _ => {}
            }
        }
        if let Some(code) = code_from_message(&cause.to_string()) {
            return Some(code);
        }
        source = cause.source();
    }
    None
}

/// Recognize resolver and TLS failures from their display text
fn code_from_message(message: &str) -> Option<TransportCode> {
    let text = message.to_ascii_lowercase();
    let code = if text.contains("dns error") || text.contains("failed to lookup address") {
        TransportCode::DnsFailure
    } else if text.contains("no route to host") {
        TransportCode::HostUnreachable
    } else if text.contains("network is unreachable") {
        TransportCode::NetworkUnreachable
    } else if text.contains("handshake") && text.contains("timed out") {
        TransportCode::TlsHandshakeTimeout
    } else if text.contains("expired") && text.contains("certificate") {
        TransportCode::CertificateExpired
    } else if contains_any(&text, &["notvalidforname", "not valid for name", "hostname mismatch"]) {
        TransportCode::HostnameMismatch
    } else if contains_any(
        &text,
        &["self signed", "self-signed", "unknownissuer", "unable to get local issuer"],
    ) {
        TransportCode::UntrustedCertificate
    } else if contains_any(
        &text,
        &["wrong version number", "corrupt message", "invalidcontenttype"],
    ) {
        TransportCode::WrongProtocol
    } else {
        return None;
    };
    Some(code)
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| text.contains(needle))
}
