//! Session controller
//!
//! A [`Session`] owns one [`Connection`] and one [`EventBus`]. It translates
//! the connection lifecycle into bus events, publishes a snapshot of every
//! enumerated resource when the connection comes up, forwards normalized
//! stream events, and exposes [`Session::control`] for reads and writes.

use futures::future::join_all;
use oh_client::{Clock, Connection, ConnectionEvent, ConnectionEvents, RequestError, Transport};
use oh_config::ServerConfig;
use oh_core::concept::{ConceptSpec, ENUMERATION_ORDER};
use oh_core::{
    resolve_concept, BusEvent, ConnectionState, ConnectionStatus, GlobalError, NormalizedEvent,
    Operation, ResourceLocator, SessionStatus, CONNECTION_STATUS_TAG, GLOBAL_ERROR_TAG,
    STATUS_TAG,
};
use oh_event_bus::EventBus;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::control::{build_request, ControlError, ControlOutput, ControlResult, ResourceState};
use crate::message::parse_stream_message;

/// Message published when an established connection drops
pub const CONNECTION_LOST: &str = "connection lost, reconnecting";

/// Prefix of the error published when the server refuses the event stream
pub const STREAM_REFUSED: &str = "event stream refused";

/// Bus, status and name, shared with the event task
struct Inner {
    name: String,
    bus: Arc<EventBus<BusEvent>>,
    status: watch::Sender<SessionStatus>,
}

struct Running {
    connection: Connection,
    events: JoinHandle<()>,
}

pub struct Session {
    config: ServerConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

impl Session {
    pub fn new(config: ServerConfig, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        let (status, _) = watch::channel(SessionStatus::Down);
        let inner = Arc::new(Inner {
            name: config.name.clone(),
            bus: Arc::new(EventBus::new()),
            status,
        });

        Self {
            config,
            transport,
            clock,
            inner,
            running: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The session's event bus; listeners attach here
    pub fn bus(&self) -> Arc<EventBus<BusEvent>> {
        Arc::clone(&self.inner.bus)
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// The live connection, if the session is set up
    pub async fn connection(&self) -> Option<Connection> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.connection.clone())
    }

    /// Open the connection and start forwarding its events
    ///
    /// Publishes connection status off first. Calling it again while set up
    /// does nothing.
    #[instrument(skip(self), fields(server = %self.inner.name))]
    pub async fn setup(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Session already set up");
            return;
        }

        self.inner.publish_connection_status(ConnectionStatus::Off);
        self.inner.set_status(SessionStatus::Connecting);

        let (connection, events) = Connection::new(
            &self.config,
            Arc::clone(&self.transport),
            Arc::clone(&self.clock),
        );
        let task = tokio::spawn(Arc::clone(&self.inner).run(connection.clone(), events));
        connection.start();

        info!("Session started");
        *running = Some(Running {
            connection,
            events: task,
        });
    }

    /// Read or write one resource
    ///
    /// Validation happens locally before any request. Failures are returned
    /// to the caller and never published on the bus.
    #[instrument(skip(self, payload), fields(server = %self.inner.name, resource = %resource))]
    pub async fn control(
        &self,
        resource: &ResourceLocator,
        operation: Operation,
        payload: Option<Value>,
    ) -> ControlResult {
        let (concept, request) = build_request(resource, operation, payload)?;

        let connection = self.connection().await.ok_or_else(|| {
            ControlError::Request(RequestError::offline(format!(
                "{}: session not set up",
                self.inner.name
            )))
        })?;

        let result = connection.send_request(request).await?;
        match operation {
            Operation::Get => Ok(ControlOutput::State(ResourceState::from_rest(
                concept,
                &resource.identifier,
                result,
            ))),
            Operation::Command | Operation::Update => Ok(ControlOutput::Accepted(result)),
        }
    }

    /// [`control`](Session::control) with a textual locator and operation
    pub async fn dispatch(
        &self,
        resource: &str,
        operation: &str,
        payload: Option<Value>,
    ) -> ControlResult {
        let resource: ResourceLocator = resource.parse()?;
        let operation: Operation = operation.parse()?;
        self.control(&resource, operation, payload).await
    }

    /// Publish a final status off and close the connection
    ///
    /// Idempotent. The bus stays usable afterwards.
    #[instrument(skip(self), fields(server = %self.inner.name))]
    pub async fn close(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.events.abort();
        self.inner.publish_connection_status(ConnectionStatus::Off);
        running.connection.close().await;
        self.inner.set_status(SessionStatus::Down);
        info!("Session closed");
    }
}

impl Inner {
    async fn run(self: Arc<Self>, connection: Connection, mut events: ConnectionEvents) {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::StateChanged(state) => self.on_state(state, &connection).await,
                ConnectionEvent::Message(data) => self.on_message(&data),
                ConnectionEvent::StreamRejected(error) => self.on_stream_rejected(&error),
            }
        }
        trace!(server = %self.name, "Connection event channel closed");
    }

    async fn on_state(&self, state: ConnectionState, connection: &Connection) {
        match state {
            ConnectionState::Up => {
                info!(server = %self.name, "Connected");
                self.set_status(SessionStatus::Up);
                self.enumerate(connection).await;
            }
            ConnectionState::Connecting => {
                warn!(server = %self.name, "Connection lost, reconnecting");
                self.publish_error(GlobalError::new(CONNECTION_LOST).with_kind("network", true));
                self.publish_connection_status(ConnectionStatus::Off);
                self.set_status(SessionStatus::Connecting);
            }
            ConnectionState::Down => {
                self.publish_connection_status(ConnectionStatus::Off);
                self.set_status(SessionStatus::Down);
            }
        }
    }

    /// Fetch every enumerated concept concurrently, publish in registry order
    async fn enumerate(&self, connection: &Connection) {
        let concepts: Vec<&'static ConceptSpec> = ENUMERATION_ORDER
            .iter()
            .map(|name| resolve_concept(name))
            .filter(|concept| concept.enumerate)
            .collect();

        let results = join_all(
            concepts
                .iter()
                .map(|concept| connection.get_resources(concept.name)),
        )
        .await;

        let mut announced = false;
        for (concept, result) in concepts.into_iter().zip(results) {
            let data = match result {
                Ok(data) => data,
                Err(failure) => {
                    let error = &failure.error;
                    warn!(
                        server = %self.name,
                        concept = concept.name,
                        kind = %error.kind,
                        "Enumeration failed: {}",
                        error
                    );
                    if !error.retry {
                        self.set_status(SessionStatus::Error);
                    }
                    self.publish_error(
                        GlobalError::new(format!("failed to load {}: {}", concept.name, error))
                            .with_kind(error.kind.as_str(), error.retry),
                    );
                    continue;
                }
            };

            if !announced {
                self.publish_connection_status(ConnectionStatus::On);
                announced = true;
            }

            let resources = match data {
                Value::Array(resources) => resources,
                other => {
                    warn!(
                        server = %self.name,
                        concept = concept.name,
                        "Expected a list, got {}",
                        other
                    );
                    continue;
                }
            };

            debug!(
                server = %self.name,
                concept = concept.name,
                count = resources.len(),
                "Publishing snapshot"
            );
            for resource in &resources {
                if let Some(event) = normalize_resource(concept, resource) {
                    self.publish_resource(event);
                }
            }
        }
    }

    /// The server refuses the stream for a reason retrying will not fix
    fn on_stream_rejected(&self, error: &RequestError) {
        warn!(server = %self.name, kind = %error.kind, "Event stream refused: {}", error);
        self.publish_error(
            GlobalError::new(format!("{}: {}", STREAM_REFUSED, error))
                .with_kind(error.kind.as_str(), error.retry),
        );
        self.set_status(SessionStatus::Error);
    }

    fn on_message(&self, data: &str) {
        match parse_stream_message(data) {
            Ok(Some(event)) => self.publish_resource(event),
            Ok(None) => trace!(server = %self.name, "Dropping stream message"),
            Err(e) => {
                warn!(server = %self.name, "Failed to parse stream message: {}", e);
                self.publish_error(GlobalError::new(e.to_string()));
            }
        }
    }

    fn publish_resource(&self, event: NormalizedEvent) {
        let tag = event.topic.clone();
        self.bus.publish(&tag, &BusEvent::Resource(event));
    }

    fn publish_connection_status(&self, status: ConnectionStatus) {
        self.bus
            .publish(CONNECTION_STATUS_TAG, &BusEvent::ConnectionStatus(status));
    }

    fn publish_error(&self, error: GlobalError) {
        self.bus
            .publish(GLOBAL_ERROR_TAG, &BusEvent::GlobalError(error));
    }

    /// Record and publish the semantic status when it changes
    fn set_status(&self, status: SessionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(server = %self.name, from = %previous, to = %status, "Session status");
            self.bus.publish(STATUS_TAG, &BusEvent::Status(status));
        }
    }
}

/// One enumerated resource as a bus event
fn normalize_resource(concept: &ConceptSpec, resource: &Value) -> Option<NormalizedEvent> {
    let Some(identifier) = concept.identifier_of(resource) else {
        trace!(concept = concept.name, "Skipping resource without identifier");
        return None;
    };

    Some(
        NormalizedEvent::new(
            concept.topic_for(identifier),
            concept.rest_payload_of(resource),
            resource.clone(),
        )
        .with_payload_type(concept.payload_type_of(resource)),
    )
}
