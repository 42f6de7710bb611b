//! Resource locator and operation types
//!
//! A resource is an addressable entity on the openHAB server (an item, a
//! thing, a rule), identified by its concept and its identifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for malformed locators and operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("resource must be written as '<concept>/<identifier>'")]
    InvalidFormat,

    #[error("{0}: unknown operation")]
    UnknownOperation(String),
}

/// Identifies an addressable entity on the server (e.g. "items/Kitchen_Light")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceLocator {
    /// Concept the resource belongs to (e.g. "items", "things")
    pub concept: String,
    /// Identifier within the concept (item name, thing UID, rule UID)
    pub identifier: String,
}

impl ResourceLocator {
    /// Create a new locator. No validation happens here: an empty identifier
    /// or an unknown concept is reported by the operation that uses it.
    pub fn new(concept: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            concept: concept.into(),
            identifier: identifier.into(),
        }
    }

    /// The bus tag / topic for this resource
    pub fn topic(&self) -> String {
        format!("{}/{}", self.concept, self.identifier)
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.concept, self.identifier)
    }
}

impl FromStr for ResourceLocator {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Thing UIDs contain ':' but never '/', so the first '/' splits
        let (concept, identifier) = s.split_once('/').ok_or(ResourceError::InvalidFormat)?;
        if concept.is_empty() || identifier.contains('/') {
            return Err(ResourceError::InvalidFormat);
        }
        Ok(Self::new(concept, identifier))
    }
}

/// Operation applied to a resource through the session façade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Read the current state
    Get,
    /// Send a command (items: POST, rules: run now)
    Command,
    /// Post a state update without triggering a command
    Update,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Command => "command",
            Operation::Update => "update",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "get" => Ok(Operation::Get),
            "command" => Ok(Operation::Command),
            "update" => Ok(Operation::Update),
            _ => Err(ResourceError::UnknownOperation(s.to_string())),
        }
    }
}
