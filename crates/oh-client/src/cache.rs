//! Per-concept resource collection cache

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

use crate::clock::Clock;
use crate::error::RequestError;

/// A failed collection fetch, with the last known data if any
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct ResourceFailure {
    pub error: RequestError,
    /// Cached collection, possibly expired
    pub stale: Option<Value>,
}

pub type ResourceResult = Result<Value, ResourceFailure>;

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    fetched_at: Instant,
}

/// TTL cache keyed by concept name
///
/// Concurrent misses may both fetch and store; the last write wins.
pub struct ResourceCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ResourceCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    /// Cached data younger than the TTL
    pub fn fresh(&self, concept: &str) -> Option<Value> {
        let entry = self.entries.get(concept)?;
        let age = self.clock.now().saturating_duration_since(entry.fetched_at);
        if age < self.ttl {
            trace!(concept, ?age, "Cache hit");
            Some(entry.data.clone())
        } else {
            None
        }
    }

    /// Cached data regardless of age
    pub fn stale(&self, concept: &str) -> Option<Value> {
        self.entries.get(concept).map(|entry| entry.data.clone())
    }

    pub fn store(&self, concept: &str, data: Value) {
        self.entries.insert(
            concept.to_string(),
            CacheEntry {
                data,
                fetched_at: self.clock.now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
