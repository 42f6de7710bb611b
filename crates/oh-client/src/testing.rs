//! Scriptable in-memory transport
//!
//! Used by this crate's tests and by downstream crates that drive a
//! connection without a server.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

use crate::classify::{
    classify_response, classify_transport, HttpResponse, TransportCode, TransportFailure,
};
use crate::error::StreamError;
use crate::http::PROBE_PATH;
use crate::transport::{HttpRequest, MessageStream, Transport};

type StreamItem = Result<String, StreamError>;

/// How the next `open_stream` behaves
#[derive(Debug, Clone)]
enum StreamMode {
    Open,
    Refused,
    /// Answered with this non-success response
    Rejected(HttpResponse),
    /// Never answered
    Hang,
}

/// Mock [`Transport`]
///
/// Responses are registered per path and repeat until replaced. Unregistered
/// paths answer 404 without a body. The health probe follows
/// [`set_healthy`](MockTransport::set_healthy).
pub struct MockTransport {
    healthy: AtomicBool,
    stream_mode: Mutex<StreamMode>,
    routes: Mutex<HashMap<String, Result<HttpResponse, TransportFailure>>>,
    requests: Mutex<Vec<HttpRequest>>,
    probes: Mutex<Vec<Instant>>,
    stream_opens: Mutex<Vec<Instant>>,
    stream: Mutex<Option<mpsc::UnboundedSender<StreamItem>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            stream_mode: Mutex::new(StreamMode::Open),
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            probes: Mutex::new(Vec::new()),
            stream_opens: Mutex::new(Vec::new()),
            stream: Mutex::new(None),
        }
    }

    /// Answer every request to `path` with `status` and `body`
    pub fn respond(&self, path: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Ok(HttpResponse::new(status, body)));
    }

    /// Fail every request to `path` at the transport level
    pub fn fail(&self, path: &str, code: TransportCode) {
        let failure = TransportFailure::new(Some(code), "mock transport failure");
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Err(failure));
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Whether opening the event stream succeeds
    pub fn set_stream_available(&self, available: bool) {
        let mode = if available {
            StreamMode::Open
        } else {
            StreamMode::Refused
        };
        *self.stream_mode.lock().unwrap() = mode;
    }

    /// Answer stream opens with `status` and `body`
    pub fn reject_stream(&self, status: u16, body: &str) {
        let response = HttpResponse::new(status, body);
        *self.stream_mode.lock().unwrap() = StreamMode::Rejected(response);
    }

    /// Leave stream opens pending forever, as a server that accepts the
    /// connection but never sends headers
    pub fn hang_stream(&self) {
        *self.stream_mode.lock().unwrap() = StreamMode::Hang;
    }

    /// Requests to `path`, probes excluded
    pub fn request_count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| path_of(&request.url) == path)
            .count()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Instants at which health probes were received
    pub fn probe_times(&self) -> Vec<Instant> {
        self.probes.lock().unwrap().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.lock().unwrap().len()
    }

    pub fn stream_open_count(&self) -> usize {
        self.stream_opens.lock().unwrap().len()
    }

    /// Deliver a message on the most recently opened stream
    pub fn push_message(&self, data: &str) -> bool {
        self.push(Ok(data.to_string()))
    }

    /// Deliver an error on the most recently opened stream
    pub fn push_error(&self, error: StreamError) -> bool {
        self.push(Err(error))
    }

    /// End the most recently opened stream
    pub fn end_stream(&self) {
        self.stream.lock().unwrap().take();
    }

    fn push(&self, item: StreamItem) -> bool {
        match self.stream.lock().unwrap().as_ref() {
            Some(sender) => sender.unbounded_send(item).is_ok(),
            None => false,
        }
    }
}

fn path_of(url: &str) -> String {
    Url::parse(url)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        let path = path_of(&request.url);

        if path == PROBE_PATH {
            self.probes.lock().unwrap().push(Instant::now());
            return if self.healthy.load(Ordering::SeqCst) {
                Ok(HttpResponse::new(200, r#"{"version":"8"}"#))
            } else {
                Err(TransportFailure::new(
                    Some(TransportCode::ConnectionRefused),
                    "connection refused",
                ))
            };
        }

        self.requests.lock().unwrap().push(request);
        self.routes
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .unwrap_or_else(|| Ok(HttpResponse::new(404, "")))
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<MessageStream, StreamError> {
        self.stream_opens.lock().unwrap().push(Instant::now());

        let mode = self.stream_mode.lock().unwrap().clone();
        match mode {
            StreamMode::Open => {}
            StreamMode::Refused => {
                let failure = TransportFailure::new(
                    Some(TransportCode::ConnectionRefused),
                    "connection refused",
                );
                return Err(classify_transport(&failure).into());
            }
            StreamMode::Rejected(response) => {
                return match classify_response(&response, request.has_credentials()) {
                    Err(error) => Err(error.into()),
                    Ok(_) => Err(StreamError::new(format!(
                        "unexpected status {}",
                        response.status
                    ))),
                };
            }
            StreamMode::Hang => std::future::pending::<()>().await,
        }

        let (sender, receiver) = mpsc::unbounded();
        *self.stream.lock().unwrap() = Some(sender);
        Ok(receiver.boxed())
    }
}
