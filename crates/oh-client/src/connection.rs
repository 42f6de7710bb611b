//! Connection lifecycle
//!
//! Each [`Connection`] is driven by one owner task. The owner task holds the
//! connection state, the event stream reader and the single reconnect timer;
//! handles only send it commands and read the state it publishes.
//!
//! ```text
//! DOWN ──start──▶ (opening) ──stream open──▶ UP
//!                    ▲                        │ stream error / retryable request failure
//!                    │ probe healthy          ▼
//!                    └──────────────── CONNECTING ◀─┐
//!                                        │ timer    │ probe unhealthy: delay *= 2
//!                                        └──probe───┘
//! any ──close──▶ DOWN
//! ```
//!
//! Stale completions (a stream reader that was replaced, a probe that
//! finishes after the state moved on) are recognized by generation number or
//! by re-checking the current state, never by racing cancellation.

use futures::future::BoxFuture;
use futures::StreamExt;
use oh_config::{NotFoundProbe, ServerConfig};
use oh_core::{resolve_concept, ConnectionState};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::backoff::Backoff;
use crate::cache::{ResourceCache, ResourceFailure, ResourceResult};
use crate::clock::Clock;
use crate::classify::{classify_transport, TransportCode, TransportFailure};
use crate::error::{RequestError, RequestResult, StreamError};
use crate::http::{ApiRequest, HttpClient};
use crate::transport::{HttpRequest, Transport};

/// Delivered to the owner of a connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    /// Data of one stream message, unparsed
    Message(String),
    /// The server refused the event stream in a way retrying will not fix
    ///
    /// Reported once per outage; reconnect attempts continue.
    StreamRejected(RequestError),
}

pub type ConnectionEvents = mpsc::UnboundedReceiver<ConnectionEvent>;

enum Command {
    Start,
    /// A request failed in a way that means the server is gone
    Degrade(String),
    Close(oneshot::Sender<()>),
}

/// Completions reported back to the owner task
enum Signal {
    Opened(u64),
    Message(u64, String),
    Failed(u64, StreamError),
    Probed(bool),
}

struct Shared {
    name: String,
    http: HttpClient,
    cache: ResourceCache,
    not_found_probe: NotFoundProbe,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    delay_ms: AtomicU64,
}

/// Handle to one server connection
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Connection {
    /// Create a connection in `DOWN` and spawn its owner task
    ///
    /// Must be called within a tokio runtime. The returned receiver yields
    /// state changes and stream messages until the connection is closed.
    pub fn new(
        config: &ServerConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> (Self, ConnectionEvents) {
        let backoff = Backoff::new(config.retry_initial(), config.retry_max());
        let (state, _) = watch::channel(ConnectionState::Down);

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            http: HttpClient::new(transport, config),
            cache: ResourceCache::new(config.cache_ttl(), Arc::clone(&clock)),
            not_found_probe: config.not_found_probe,
            state,
            attempts: AtomicU32::new(0),
            delay_ms: AtomicU64::new(millis(backoff.delay())),
        });

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (signals, signal_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            shared: Arc::clone(&shared),
            clock,
            event_filter: config.event_filter.clone(),
            open_timeout: config.request_timeout(),
            commands: command_rx,
            signals,
            signal_rx,
            events: Some(events),
            state: ConnectionState::Down,
            backoff,
            generation: 0,
            reader: None,
            probe: None,
            timer: None,
            reopening: false,
            rejected: false,
        };
        tokio::spawn(driver.run());

        (Self { shared, commands }, event_rx)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Begin connecting; ignored unless `DOWN`
    pub fn start(&self) {
        let _ = self.commands.send(Command::Start);
    }

    /// Stop the connection and wait for the owner task to finish
    ///
    /// Idempotent. Once this returns no further events are delivered.
    pub async fn close(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Close(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Failed reconnect attempts since the stream was last open
    pub fn retry_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::Relaxed)
    }

    /// Delay before the next reconnect probe
    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.shared.delay_ms.load(Ordering::Relaxed))
    }

    /// Send a request through the connection
    ///
    /// Rejected with an offline error unless the connection is up. A
    /// non-retryable 404 or 5xx is checked against a health probe: a live
    /// server turns it into a domain error, a dead one into a retryable
    /// system error. Retryable failures move the connection to `CONNECTING`.
    #[instrument(skip(self, request), fields(server = %self.shared.name, path = %request.path))]
    pub async fn send_request(&self, request: ApiRequest) -> RequestResult {
        if !self.state().is_up() {
            return Err(RequestError::offline(format!(
                "{}: server offline",
                self.shared.name
            )));
        }

        let error = match self.shared.http.request(request).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let error = if self.needs_probe(&error) {
            if self.shared.http.probe().await {
                error.into_domain()
            } else {
                error.into_system()
            }
        } else {
            error
        };

        if error.retry {
            let _ = self.commands.send(Command::Degrade(error.message.clone()));
            return Err(error.mark_offline());
        }
        Err(error)
    }

    fn needs_probe(&self, error: &RequestError) -> bool {
        if error.retry {
            return false;
        }
        match error.status {
            Some(404) => match self.shared.not_found_probe {
                NotFoundProbe::Always => true,
                NotFoundProbe::EmptyBody => !error.has_body,
            },
            Some(status) => (500..600).contains(&status),
            None => false,
        }
    }

    /// Fetch every resource of a concept, served from cache within the TTL
    ///
    /// On failure the last cached collection, if any, rides along in
    /// [`ResourceFailure::stale`].
    pub async fn get_resources(&self, concept: &str) -> ResourceResult {
        let spec = resolve_concept(concept);
        if spec.is_unknown() {
            return Err(ResourceFailure {
                error: RequestError::not_found(format!("unknown resource type '{}'", concept)),
                stale: None,
            });
        }

        if let Some(data) = self.shared.cache.fresh(spec.name) {
            return Ok(data);
        }

        match self.send_request(ApiRequest::get(spec.get_all_path)).await {
            Ok(data) => {
                self.shared.cache.store(spec.name, data.clone());
                Ok(data)
            }
            Err(error) => Err(ResourceFailure {
                error,
                stale: self.shared.cache.stale(spec.name),
            }),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Owner task state
struct Driver {
    shared: Arc<Shared>,
    clock: Arc<dyn Clock>,
    event_filter: Option<String>,
    /// Bound on waiting for the stream's response headers
    open_timeout: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    signals: mpsc::UnboundedSender<Signal>,
    signal_rx: mpsc::UnboundedReceiver<Signal>,
    events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    state: ConnectionState,
    backoff: Backoff,
    /// Tags the current stream reader; signals from older readers are dropped
    generation: u64,
    reader: Option<JoinHandle<()>>,
    probe: Option<JoinHandle<()>>,
    timer: Option<BoxFuture<'static, ()>>,
    /// The current stream attempt follows a healthy probe
    reopening: bool,
    /// A non-retryable stream refusal was already reported
    rejected: bool,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Start) => self.start(),
                    Some(Command::Degrade(reason)) => self.degrade(&reason),
                    Some(Command::Close(ack)) => {
                        self.shutdown();
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(signal) = self.signal_rx.recv() => self.handle_signal(signal),
                _ = expire(&mut self.timer) => {
                    self.timer = None;
                    self.on_timer();
                }
            }
        }
    }

    fn start(&mut self) {
        if self.state != ConnectionState::Down {
            return;
        }
        info!(server = %self.shared.name, "Connecting");
        // Initial attempt: CONNECTING without notifying, nothing was lost yet
        self.set_state(ConnectionState::Connecting, false);
        self.open_stream();
    }

    fn degrade(&mut self, reason: &str) {
        if self.state == ConnectionState::Up {
            warn!(server = %self.shared.name, "Server considered offline: {}", reason);
            self.enter_connecting();
        }
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Opened(generation) if generation == self.generation => self.on_open(),
            Signal::Message(generation, data) if generation == self.generation => {
                self.emit(ConnectionEvent::Message(data))
            }
            Signal::Failed(generation, error) if generation == self.generation => {
                self.on_stream_error(error)
            }
            Signal::Probed(healthy) => self.on_probe(healthy),
            _ => trace!(server = %self.shared.name, "Dropping signal from a replaced stream"),
        }
    }

    fn on_open(&mut self) {
        self.backoff.reset();
        self.publish_backoff();
        self.reopening = false;
        self.rejected = false;
        if self.state != ConnectionState::Up {
            info!(server = %self.shared.name, "Event stream open");
            self.set_state(ConnectionState::Up, true);
        }
    }

    fn on_stream_error(&mut self, error: StreamError) {
        if error.is_phantom() {
            debug!(server = %self.shared.name, "Ignoring phantom stream error");
            return;
        }

        match self.state {
            ConnectionState::Up => {
                warn!(server = %self.shared.name, "Event stream failed: {}", error);
                self.enter_connecting();
            }
            ConnectionState::Connecting => {
                match &error.request {
                    Some(request) if !request.retry => self.report_rejection(request.clone()),
                    _ => debug!(server = %self.shared.name, "Event stream unavailable: {}", error),
                }
                self.stop_stream();
                if std::mem::take(&mut self.reopening) {
                    self.backoff.advance();
                    self.publish_backoff();
                }
                self.schedule_reconnect();
            }
            ConnectionState::Down => {}
        }
    }

    fn report_rejection(&mut self, error: RequestError) {
        if std::mem::replace(&mut self.rejected, true) {
            debug!(server = %self.shared.name, "Event stream still refused: {}", error);
            return;
        }
        warn!(
            server = %self.shared.name,
            kind = %error.kind,
            "Event stream refused, will keep retrying: {}",
            error
        );
        self.emit(ConnectionEvent::StreamRejected(error));
    }

    fn enter_connecting(&mut self) {
        self.stop_stream();
        self.set_state(ConnectionState::Connecting, true);
        self.schedule_reconnect();
    }

    /// Arm the reconnect timer unless a timer or probe is already pending
    fn schedule_reconnect(&mut self) {
        if self.timer.is_some() || self.probe.is_some() {
            trace!(server = %self.shared.name, "Reconnect already pending");
            return;
        }
        let delay = self.backoff.delay();
        debug!(
            server = %self.shared.name,
            delay_ms = millis(delay),
            attempts = self.backoff.attempts(),
            "Scheduling reconnect probe"
        );
        self.timer = Some(self.clock.sleep(delay));
    }

    fn on_timer(&mut self) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        let http = self.shared.http.clone();
        let signals = self.signals.clone();
        self.probe = Some(tokio::spawn(async move {
            let healthy = http.probe().await;
            let _ = signals.send(Signal::Probed(healthy));
        }));
    }

    fn on_probe(&mut self, healthy: bool) {
        self.probe = None;
        if self.state != ConnectionState::Connecting {
            return;
        }

        if healthy {
            info!(server = %self.shared.name, "Server reachable, reopening event stream");
            self.reopening = true;
            self.open_stream();
        } else {
            let delay = self.backoff.advance();
            self.publish_backoff();
            debug!(
                server = %self.shared.name,
                delay_ms = millis(delay),
                "Server unreachable"
            );
            self.schedule_reconnect();
        }
    }

    fn open_stream(&mut self) {
        self.stop_stream();
        let request = self
            .shared
            .http
            .stream_request(self.event_filter.as_deref());
        self.reader = Some(tokio::spawn(read_stream(
            self.shared.http.transport(),
            request,
            self.clock.sleep(self.open_timeout),
            self.generation,
            self.signals.clone(),
        )));
    }

    fn stop_stream(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    fn shutdown(&mut self) {
        self.timer = None;
        if let Some(probe) = self.probe.take() {
            probe.abort();
        }
        self.stop_stream();
        if self.state != ConnectionState::Down {
            self.set_state(ConnectionState::Down, true);
        }
        self.events = None;
        info!(server = %self.shared.name, "Connection closed");
    }

    fn set_state(&mut self, state: ConnectionState, notify: bool) {
        if self.state == state {
            return;
        }
        debug!(server = %self.shared.name, from = %self.state, to = %state, "State change");
        self.state = state;
        self.shared.state.send_replace(state);
        if notify {
            self.emit(ConnectionEvent::StateChanged(state));
        }
    }

    fn publish_backoff(&self) {
        self.shared
            .attempts
            .store(self.backoff.attempts(), Ordering::Relaxed);
        self.shared
            .delay_ms
            .store(millis(self.backoff.delay()), Ordering::Relaxed);
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

async fn expire(timer: &mut Option<BoxFuture<'static, ()>>) {
    match timer {
        Some(timer) => timer.await,
        None => std::future::pending().await,
    }
}

/// Open the stream, giving up at `deadline`, and forward what it yields
async fn read_stream(
    transport: Arc<dyn Transport>,
    request: HttpRequest,
    deadline: BoxFuture<'static, ()>,
    generation: u64,
    signals: mpsc::UnboundedSender<Signal>,
) {
    let opened = tokio::select! {
        opened = transport.open_stream(request) => opened,
        _ = deadline => {
            let failure = TransportFailure::new(
                Some(TransportCode::TimedOut),
                "timed out waiting for the event stream",
            );
            Err(classify_transport(&failure).into())
        }
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(error) => {
            let _ = signals.send(Signal::Failed(generation, error));
            return;
        }
    };

    if signals.send(Signal::Opened(generation)).is_err() {
        return;
    }

    while let Some(item) = stream.next().await {
        match item {
            Ok(data) => {
                if signals.send(Signal::Message(generation, data)).is_err() {
                    return;
                }
            }
            Err(error) => {
                let fatal = !error.is_phantom();
                if signals.send(Signal::Failed(generation, error)).is_err() || fatal {
                    return;
                }
            }
        }
    }

    let _ = signals.send(Signal::Failed(
        generation,
        StreamError::new("event stream ended"),
    ));
}
