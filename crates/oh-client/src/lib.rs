//! openHAB REST client
//!
//! Everything between a session and the network: the transport classifier,
//! the REST request layer, the server-sent event stream and the connection
//! lifecycle that keeps it alive.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  ConnectionEvent   ┌──────────────────────────┐
//! │  Session      │ ◀───────────────── │  Connection (owner task) │
//! │               │ ──send_request───▶ │  state / timer / reader  │
//! └───────────────┘                    └────────────┬─────────────┘
//!                                                   │ HttpClient
//!                                      ┌────────────▼─────────────┐
//!                                      │  Transport (reqwest/SSE) │
//!                                      └──────────────────────────┘
//! ```

pub mod backoff;
pub mod cache;
pub mod classify;
pub mod clock;
pub mod connection;
mod error;
pub mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transport;

pub use backoff::Backoff;
pub use cache::{ResourceCache, ResourceFailure, ResourceResult};
pub use classify::{classify, HttpResponse, Outcome, TransportCode, TransportFailure};
pub use clock::{Clock, TokioClock};
pub use connection::{Connection, ConnectionEvent, ConnectionEvents};
pub use error::{ErrorKind, RequestError, RequestResult, StreamError};
pub use http::{ApiRequest, HttpClient, RequestBody};
pub use transport::{HttpRequest, MessageStream, ReqwestTransport, Transport};
