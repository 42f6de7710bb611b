//! Session controller for the openHAB bridge
//!
//! This crate binds a [`oh_client::Connection`] to an [`oh_event_bus::EventBus`]:
//! - connection lifecycle → connection status, global error and status events
//! - startup enumeration → one resource event per item and thing
//! - stream messages → normalized resource events under `<concept>/<identifier>`
//! - [`Session::control`] → validated get / command / update requests

pub mod control;
pub mod message;
mod session;

pub use control::{ControlError, ControlOutput, ControlResult, ResourceState};
pub use message::{parse_stream_message, EventTopic, MessageError};
pub use session::{Session, CONNECTION_LOST, STREAM_REFUSED};
