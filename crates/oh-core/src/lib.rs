//! Core types for the openHAB bridge
//!
//! This crate provides the types shared by every layer of the bridge:
//! resource locators and operations, the static concept registry, connection
//! states, and the normalized events published on a session's bus.

pub mod concept;
mod event;
mod resource;
mod state;

pub use concept::{resolve as resolve_concept, ConceptSpec, Method, UNKNOWN_CONCEPT};
pub use event::{
    BusEvent, GlobalError, NormalizedEvent, CONNECTION_STATUS_TAG, GLOBAL_ERROR_TAG, STATUS_TAG,
};
pub use resource::{Operation, ResourceError, ResourceLocator};
pub use state::{ConnectionState, ConnectionStatus, SessionStatus};

/// Event topic namespaces understood on the stream (current, legacy)
pub const TOPIC_NAMESPACES: &[&str] = &["openhab", "smarthome"];
