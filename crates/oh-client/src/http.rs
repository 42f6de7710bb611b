//! REST request layer
//!
//! Resolves paths against the server base URL, attaches credentials and
//! classifies every outcome.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use oh_config::{Credentials, ServerConfig};
use oh_core::Method;
use reqwest::{header, Url};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::classify::{classify, Outcome};
use crate::error::RequestResult;
use crate::transport::{HttpRequest, Transport};

/// Health probe endpoint; answers without authentication
pub const PROBE_PATH: &str = "/rest/";

/// Server-sent event endpoint
pub const EVENTS_PATH: &str = "/rest/events";

/// Request payload
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Sent as `text/plain`
    Text(String),
    /// Sent as `application/json`
    Json(Value),
}

/// A request relative to the server base URL
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<RequestBody>,
    /// Attach the configured credentials
    pub authenticated: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            authenticated: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

/// REST client for one server
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    credentials: Credentials,
}

impl HttpClient {
    pub fn new(transport: Arc<dyn Transport>, config: &ServerConfig) -> Self {
        Self {
            transport,
            base_url: config.base_url().to_string(),
            credentials: config.credentials(),
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorization(&self) -> Option<String> {
        match &self.credentials {
            Credentials::None => None,
            Credentials::Bearer(token) => Some(format!("Bearer {}", token)),
            Credentials::Basic { username, password } => Some(format!(
                "Basic {}",
                BASE64.encode(format!("{}:{}", username, password))
            )),
        }
    }

    /// Resolve an [`ApiRequest`] into a transport request
    pub fn build(&self, request: &ApiRequest) -> HttpRequest {
        let mut http = HttpRequest::new(request.method, self.url(&request.path));
        http.headers
            .push((header::ACCEPT.to_string(), "application/json".to_string()));

        if request.authenticated {
            if let Some(value) = self.authorization() {
                http.headers.push((header::AUTHORIZATION.to_string(), value));
            }
        }

        match &request.body {
            Some(RequestBody::Text(text)) => {
                http.headers
                    .push((header::CONTENT_TYPE.to_string(), "text/plain".to_string()));
                http.body = Some(text.clone());
            }
            Some(RequestBody::Json(value)) => {
                http.headers.push((
                    header::CONTENT_TYPE.to_string(),
                    "application/json".to_string(),
                ));
                http.body = Some(value.to_string());
            }
            None => {}
        }

        http
    }

    /// Send a request and classify the outcome
    pub async fn request(&self, request: ApiRequest) -> RequestResult {
        let http = self.build(&request);
        let credentials_supplied = http.has_credentials();
        trace!(method = request.method.as_str(), path = %request.path, "Request");

        let outcome = match self.transport.execute(http).await {
            Ok(response) => Outcome::Response(response),
            Err(failure) => Outcome::Transport(failure),
        };

        let result = classify(outcome, credentials_supplied);
        if let Err(ref error) = result {
            debug!(
                path = %request.path,
                kind = %error.kind,
                retry = error.retry,
                "Request failed: {}",
                error
            );
        }
        result
    }

    /// Unauthenticated liveness check; healthy iff the server answers 2xx
    pub async fn probe(&self) -> bool {
        let request = self.build(&ApiRequest::get(PROBE_PATH).unauthenticated());
        match self.transport.execute(request).await {
            Ok(response) => response.is_success(),
            Err(failure) => {
                trace!("Health probe failed: {}", failure.message);
                false
            }
        }
    }

    /// Event stream request, optionally restricted to a topic filter
    pub fn stream_request(&self, topics: Option<&str>) -> HttpRequest {
        let mut request = self.build(&ApiRequest::get(EVENTS_PATH));
        request.headers.retain(|(name, _)| name != header::ACCEPT.as_str());

        if let Some(topics) = topics.map(str::trim).filter(|t| !t.is_empty()) {
            request.url = match Url::parse(&request.url) {
                Ok(mut url) => {
                    url.query_pairs_mut().append_pair("topics", topics);
                    url.to_string()
                }
                Err(_) => format!("{}?topics={}", request.url, topics),
            };
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::json;

    fn client(config: ServerConfig) -> (HttpClient, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        (HttpClient::new(transport.clone(), &config), transport)
    }

    #[test]
    fn test_bearer_header() {
        let mut config = ServerConfig::new("home", "http://openhab.local:8080/");
        config.token = Some("oh.token".to_string());
        let (client, _) = client(config);

        let request = client.build(&ApiRequest::get("/rest/items"));
        assert_eq!(request.url, "http://openhab.local:8080/rest/items");
        assert_eq!(request.header("authorization"), Some("Bearer oh.token"));

        let probe = client.build(&ApiRequest::get(PROBE_PATH).unauthenticated());
        assert!(!probe.has_credentials());
    }

    #[test]
    fn test_basic_header() {
        let mut config = ServerConfig::new("home", "http://openhab.local:8080");
        config.username = Some("admin".to_string());
        config.password = Some("secret".to_string());
        let (client, _) = client(config);

        let request = client.build(&ApiRequest::get("/rest/items"));
        assert_eq!(request.header("authorization"), Some("Basic YWRtaW46c2VjcmV0"));
    }

    #[test]
    fn test_body_encoding() {
        let (client, _) = client(ServerConfig::new("home", "http://openhab.local:8080"));

        let text = client.build(
            &ApiRequest::new(Method::Post, "/rest/items/Lamp")
                .with_body(RequestBody::Text("ON".into())),
        );
        assert_eq!(text.header("content-type"), Some("text/plain"));
        assert_eq!(text.body.as_deref(), Some("ON"));

        let json = client.build(
            &ApiRequest::new(Method::Post, "/rest/rules/r1/runnow")
                .with_body(RequestBody::Json(json!({"a": 1}))),
        );
        assert_eq!(json.header("content-type"), Some("application/json"));
        assert_eq!(json.body.as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_stream_request_filter() {
        let (client, _) = client(ServerConfig::new("home", "http://openhab.local:8080"));

        let request = client.stream_request(None);
        assert_eq!(request.url, "http://openhab.local:8080/rest/events");

        let request = client.stream_request(Some("openhab/items/*"));
        assert_eq!(
            request.url,
            "http://openhab.local:8080/rest/events?topics=openhab%2Fitems%2F*"
        );
    }

    #[tokio::test]
    async fn test_request_classifies() {
        let (client, transport) = client(ServerConfig::new("home", "http://openhab.local:8080"));
        transport.respond("/rest/items/Lamp", 200, r#"{"name":"Lamp","state":"ON"}"#);
        transport.respond("/rest/items/Gone", 404, "");

        let value = client.request(ApiRequest::get("/rest/items/Lamp")).await.unwrap();
        assert_eq!(value["state"], "ON");

        let error = client.request(ApiRequest::get("/rest/items/Gone")).await.unwrap_err();
        assert_eq!(error.status, Some(404));
        assert!(!error.retry);
    }

    #[tokio::test]
    async fn test_probe() {
        let (client, transport) = client(ServerConfig::new("home", "http://openhab.local:8080"));
        assert!(client.probe().await);

        transport.set_healthy(false);
        assert!(!client.probe().await);
    }
}
