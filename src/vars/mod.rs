//! Variable system for Converge.
//!
//! This module provides variable management for the reconciliation engine:
//! - Fixed six-level source precedence
//! - Layered storage with last-writer-wins flattening
//! - The immutable [`VariableContext`] handed to the task engine

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use thiserror::Error;

use crate::inventory::{Host, Inventory};
use crate::playbook::Play;

/// Variable precedence levels (from lowest to highest).
///
/// Flattening applies sources in ascending order, so on key conflict the
/// highest-precedence source wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum VarPrecedence {
    /// Role defaults (lowest priority)
    RoleDefaults = 1,
    /// Inventory-wide variables
    InventoryVars = 2,
    /// Group variables (parent groups applied before children)
    GroupVars = 3,
    /// Host variables
    HostVars = 4,
    /// Play variables
    PlayVars = 5,
    /// Extra vars (run-level overrides) - highest priority
    ExtraVars = 6,
}

impl VarPrecedence {
    /// Get all precedence levels in order (lowest to highest)
    pub fn all() -> impl Iterator<Item = VarPrecedence> {
        [
            VarPrecedence::RoleDefaults,
            VarPrecedence::InventoryVars,
            VarPrecedence::GroupVars,
            VarPrecedence::HostVars,
            VarPrecedence::PlayVars,
            VarPrecedence::ExtraVars,
        ]
        .into_iter()
    }

    /// Get the precedence level number
    pub fn level(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for VarPrecedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VarPrecedence::RoleDefaults => "role defaults",
            VarPrecedence::InventoryVars => "inventory vars",
            VarPrecedence::GroupVars => "group vars",
            VarPrecedence::HostVars => "host vars",
            VarPrecedence::PlayVars => "play vars",
            VarPrecedence::ExtraVars => "extra vars",
        };
        write!(f, "{}", name)
    }
}

/// Errors that can occur in the variable system
#[derive(Debug, Error)]
pub enum VarsError {
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for variable operations
pub type VarsResult<T> = Result<T, VarsError>;

/// Layered variable store used while building a host's context.
///
/// Within one precedence layer, later writes win; across layers, the higher
/// precedence wins. Flattening is cached and the cache is invalidated on any
/// write.
#[derive(Debug, Clone, Default)]
pub struct VarStore {
    /// Variables organized by precedence level
    layers: HashMap<VarPrecedence, IndexMap<String, JsonValue>>,

    /// Cached flattened variables (invalidated on changes)
    merged_cache: Option<IndexMap<String, JsonValue>>,
}

impl VarStore {
    /// Create a new empty variable store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable at a specific precedence level
    pub fn set(&mut self, key: impl Into<String>, value: JsonValue, precedence: VarPrecedence) {
        self.merged_cache = None;

        let layer = self.layers.entry(precedence).or_default();
        layer.insert(key.into(), value);
    }

    /// Set multiple variables at a precedence level
    pub fn set_many(&mut self, vars: &IndexMap<String, JsonValue>, precedence: VarPrecedence) {
        self.merged_cache = None;

        let layer = self.layers.entry(precedence).or_default();
        for (key, value) in vars {
            layer.insert(key.clone(), value.clone());
        }
    }

    /// Get a variable (considering precedence)
    pub fn get(&mut self, key: &str) -> Option<&JsonValue> {
        self.ensure_merged();
        self.merged_cache.as_ref().and_then(|cache| cache.get(key))
    }

    /// Check if a variable exists at any level
    pub fn contains(&mut self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Find which precedence level supplies the effective value for a key
    pub fn source_of(&self, key: &str) -> Option<VarPrecedence> {
        for precedence in VarPrecedence::all().collect::<Vec<_>>().into_iter().rev() {
            if let Some(layer) = self.layers.get(&precedence) {
                if layer.contains_key(key) {
                    return Some(precedence);
                }
            }
        }
        None
    }

    /// Flatten into an immutable [`VariableContext`]
    pub fn flatten(mut self) -> VariableContext {
        self.ensure_merged();
        VariableContext {
            vars: self.merged_cache.unwrap_or_default(),
        }
    }

    /// Ensure the merged cache is up to date
    fn ensure_merged(&mut self) {
        if self.merged_cache.is_some() {
            return;
        }

        let mut merged = IndexMap::new();

        // Apply variables in precedence order (lowest to highest)
        for precedence in VarPrecedence::all() {
            if let Some(layer) = self.layers.get(&precedence) {
                for (key, value) in layer {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }

        self.merged_cache = Some(merged);
    }
}

/// The flattened variable context for one host, immutable once resolved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableContext {
    vars: IndexMap<String, JsonValue>,
}

impl VariableContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context directly from a flattened map
    pub fn from_map(vars: IndexMap<String, JsonValue>) -> Self {
        Self { vars }
    }

    /// Get a variable by name
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.vars.get(key)
    }

    /// Get a variable, failing with `UndefinedVariable` when absent
    pub fn require(&self, key: &str) -> VarsResult<&JsonValue> {
        self.vars
            .get(key)
            .ok_or_else(|| VarsError::UndefinedVariable(key.to_string()))
    }

    /// Walk a dotted path (`a.b.c`) through nested objects.
    ///
    /// Returns `None` as the Missing sentinel for any absent segment; never
    /// errors.
    pub fn lookup_path(&self, path: &str) -> Option<&JsonValue> {
        lookup_path(&self.vars, path)
    }

    /// Check if a variable is defined
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Number of variables in the context
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the context is empty
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate over all variables
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.vars.iter()
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &IndexMap<String, JsonValue> {
        &self.vars
    }
}

/// Walk a dotted path through a map of nested JSON values.
pub fn lookup_path<'a>(
    map: &'a IndexMap<String, JsonValue>,
    path: &str,
) -> Option<&'a JsonValue> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = map.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Merge variable sources for one host in ascending precedence.
///
/// Deterministic and side-effect-free: the same inventory, play, and extra
/// vars always produce the same context. Group variables are applied parent
/// before child so child groups override their ancestors.
pub fn resolve(
    host: &Host,
    play: &Play,
    inventory: &Inventory,
    extra_vars: &IndexMap<String, JsonValue>,
) -> VariableContext {
    let mut store = VarStore::new();

    store.set_many(&play.defaults, VarPrecedence::RoleDefaults);
    store.set_many(inventory.vars(), VarPrecedence::InventoryVars);

    // Ancestors first, so deeper (more specific) groups override them.
    for group_name in inventory.group_chain(&host.name) {
        if let Some(group) = inventory.group(&group_name) {
            store.set_many(&group.vars, VarPrecedence::GroupVars);
        }
    }

    store.set_many(&host.vars, VarPrecedence::HostVars);
    store.set_many(&play.vars, VarPrecedence::PlayVars);
    store.set_many(extra_vars, VarPrecedence::ExtraVars);

    store.flatten()
}
