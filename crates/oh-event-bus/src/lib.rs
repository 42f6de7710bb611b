//! Pattern-matching publish/subscribe bus for the openHAB bridge
//!
//! Listeners subscribe to tags either exactly (`items/Kitchen_Light`) or with
//! a glob (`items/*`, `*/Kitchen_*`). A publish delivers the payload
//! synchronously to every matching listener, at most once per listener, and
//! isolates listeners from each other's panics.

mod pattern;

pub use pattern::{compile_glob, parse_patterns, IntoPatterns};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Callback invoked with the published tag and payload
pub type Callback<T> = Arc<dyn Fn(&str, &T) + Send + Sync>;

/// Identity of a listener, shared by all of its clones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

/// A subscribable callback
///
/// Identity is the callback allocation: clones of a `Listener` are the same
/// listener, two `Listener::new` calls on equal closures are not.
pub struct Listener<T> {
    callback: Callback<T>,
}

impl<T> Listener<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(f),
        }
    }

    pub fn id(&self) -> ListenerId {
        ListenerId(Arc::as_ptr(&self.callback) as *const () as usize)
    }
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("id", &self.id()).finish()
    }
}

struct WildcardEntry<T> {
    regex: Regex,
    listeners: Vec<Listener<T>>,
}

/// The bus
///
/// Subscription tables are only read under the map's shard locks while the
/// delivery set is collected; callbacks run afterwards on that snapshot, so a
/// callback may subscribe or unsubscribe without deadlocking.
pub struct EventBus<T> {
    /// Exact tag -> listeners
    exact: DashMap<String, Vec<Listener<T>>>,
    /// Glob pattern -> compiled regex and listeners
    wildcard: DashMap<String, WildcardEntry<T>>,
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self {
            exact: DashMap::new(),
            wildcard: DashMap::new(),
        }
    }

    /// Wrap a closure into a [`Listener`]
    pub fn listener<F>(&self, f: F) -> Listener<T>
    where
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        Listener::new(f)
    }

    /// Subscribe a listener to one or more patterns
    ///
    /// Subscribing the same listener to the same pattern twice is a no-op.
    pub fn subscribe(&self, patterns: impl IntoPatterns, listener: &Listener<T>) {
        let id = listener.id();
        for pattern in patterns.into_patterns() {
            trace!(pattern = %pattern, listener = ?id, "Subscribing");

            if !pattern.contains('*') {
                let mut list = self.exact.entry(pattern).or_default();
                if !list.iter().any(|l| l.id() == id) {
                    list.push(listener.clone());
                }
                continue;
            }

            match self.wildcard.entry(pattern) {
                Entry::Occupied(mut occupied) => {
                    let entry = occupied.get_mut();
                    if !entry.listeners.iter().any(|l| l.id() == id) {
                        entry.listeners.push(listener.clone());
                    }
                }
                Entry::Vacant(vacant) => match compile_glob(vacant.key()) {
                    Ok(regex) => {
                        vacant.insert(WildcardEntry {
                            regex,
                            listeners: vec![listener.clone()],
                        });
                    }
                    Err(e) => {
                        warn!(pattern = %vacant.key(), error = %e, "Ignoring uncompilable pattern");
                    }
                },
            }
        }
    }

    /// Remove a listener from one or more patterns
    ///
    /// Other listeners on the same pattern are unaffected. A pattern left
    /// without listeners is dropped entirely.
    pub fn unsubscribe(&self, patterns: impl IntoPatterns, listener: &Listener<T>) {
        let id = listener.id();
        for pattern in patterns.into_patterns() {
            trace!(pattern = %pattern, listener = ?id, "Unsubscribing");

            if pattern.contains('*') {
                if let Some(mut entry) = self.wildcard.get_mut(&pattern) {
                    entry.listeners.retain(|l| l.id() != id);
                }
                self.wildcard
                    .remove_if(&pattern, |_, entry| entry.listeners.is_empty());
            } else {
                if let Some(mut list) = self.exact.get_mut(&pattern) {
                    list.retain(|l| l.id() != id);
                }
                self.exact.remove_if(&pattern, |_, list| list.is_empty());
            }
        }
    }

    /// Remove a listener from every pattern it is subscribed to
    pub fn unsubscribe_all(&self, listener: &Listener<T>) {
        let id = listener.id();
        self.exact.retain(|_, list| {
            list.retain(|l| l.id() != id);
            !list.is_empty()
        });
        self.wildcard.retain(|_, entry| {
            entry.listeners.retain(|l| l.id() != id);
            !entry.listeners.is_empty()
        });
    }

    /// Publish a payload under a tag
    ///
    /// Returns the number of listeners the payload was delivered to,
    /// including ones whose callback panicked.
    pub fn publish(&self, tag: &str, payload: &T) -> usize {
        let targets = self.delivery_set(tag);
        debug!(tag = %tag, listeners = targets.len(), "Publishing");

        for listener in &targets {
            let callback = &listener.callback;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(tag, payload))) {
                error!(
                    tag = %tag,
                    listener = ?listener.id(),
                    panic = %panic_message(&panic),
                    "Listener panicked during publish"
                );
            }
        }

        targets.len()
    }

    /// Number of distinct patterns (exact and wildcard) with listeners
    pub fn pattern_count(&self) -> usize {
        self.exact.len() + self.wildcard.len()
    }

    /// Number of listeners registered for a literal pattern
    pub fn listener_count(&self, pattern: &str) -> usize {
        if pattern.contains('*') {
            self.wildcard
                .get(pattern)
                .map(|e| e.listeners.len())
                .unwrap_or(0)
        } else {
            self.exact.get(pattern).map(|l| l.len()).unwrap_or(0)
        }
    }

    /// Snapshot of listeners matching a tag, deduplicated by identity
    fn delivery_set(&self, tag: &str) -> Vec<Listener<T>> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        if let Some(list) = self.exact.get(tag) {
            for listener in list.iter() {
                if seen.insert(listener.id()) {
                    targets.push(listener.clone());
                }
            }
        }

        for entry in self.wildcard.iter() {
            if !entry.regex.is_match(tag) {
                continue;
            }
            for listener in &entry.listeners {
                if seen.insert(listener.id()) {
                    targets.push(listener.clone());
                }
            }
        }

        targets
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
