//! Fact gathering and storage.
//!
//! Facts are discovered runtime properties of a host. They are gathered at
//! most once per run per host (unless a play disables gathering entirely)
//! and queried read-only by conditionals and templates. Lookup walks dotted
//! paths explicitly; an absent key is `None`, the Missing sentinel — a run
//! is never aborted by a missing fact.

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::debug;

use crate::vars;

/// Facts gathered from a single host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Facts {
    data: IndexMap<String, JsonValue>,
}

impl Facts {
    /// Create empty facts
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fact
    pub fn set(&mut self, key: impl Into<String>, value: JsonValue) {
        self.data.insert(key.into(), value);
    }

    /// Get a fact by exact key
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.data.get(key)
    }

    /// Walk a dotted path (`net.iface.mtu`); `None` is the Missing sentinel
    pub fn lookup_path(&self, path: &str) -> Option<&JsonValue> {
        vars::lookup_path(&self.data, path)
    }

    /// All facts
    pub fn all(&self) -> &IndexMap<String, JsonValue> {
        &self.data
    }

    /// Whether this snapshot holds no facts
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Overlay another set of facts, later values winning
    pub fn merge(&mut self, other: &Facts) {
        for (key, value) in &other.data {
            self.data.insert(key.clone(), value.clone());
        }
    }
}

impl FromIterator<(String, JsonValue)> for Facts {
    fn from_iter<T: IntoIterator<Item = (String, JsonValue)>>(iter: T) -> Self {
        Self {
            data: iter.into_iter().collect(),
        }
    }
}

/// Per-run fact storage, shared read-mostly across host workers.
///
/// Each host's snapshot is private to its worker; the store itself only
/// synchronizes the map of snapshots.
#[derive(Debug, Default)]
pub struct FactStore {
    snapshots: RwLock<HashMap<String, Facts>>,
}

impl FactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate a host's snapshot unless one already exists.
    ///
    /// The probe is only invoked on the first call per host per run, so
    /// repeated plays against the same host reuse the cached snapshot.
    pub fn gather_with<E>(
        &self,
        host: &str,
        probe: impl FnOnce() -> Result<Facts, E>,
    ) -> Result<(), E> {
        if self.snapshots.read().contains_key(host) {
            debug!(host, "facts already gathered, reusing snapshot");
            return Ok(());
        }
        let facts = probe()?;
        debug!(host, count = facts.all().len(), "facts gathered");
        self.snapshots.write().insert(host.to_string(), facts);
        Ok(())
    }

    /// Whether a snapshot exists for the host
    pub fn has_snapshot(&self, host: &str) -> bool {
        self.snapshots.read().contains_key(host)
    }

    /// Get a fact by dotted path; `None` when the host has no snapshot or
    /// the path is absent.
    pub fn get(&self, host: &str, path: &str) -> Option<JsonValue> {
        self.snapshots
            .read()
            .get(host)
            .and_then(|facts| facts.lookup_path(path).cloned())
    }

    /// Clone the host's snapshot; empty when gathering was skipped
    pub fn snapshot(&self, host: &str) -> Facts {
        self.snapshots.read().get(host).cloned().unwrap_or_default()
    }

    /// Set a single fact mid-run (the `set_fact` module)
    pub fn set_fact(&self, host: &str, key: impl Into<String>, value: JsonValue) {
        self.snapshots
            .write()
            .entry(host.to_string())
            .or_default()
            .set(key, value);
    }
}
