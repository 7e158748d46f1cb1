//! Host and group inventory management.
//!
//! The inventory defines the target hosts and their groupings. It is built
//! from a pluggable [`InventorySource`] and treated as read-only and static
//! for the duration of one run.
//!
//! Group hierarchies are validated at load time: parent/child edges must
//! form a DAG. A host that is a member of a child group is also a member of
//! every ancestor group, and [`Inventory::group_chain`] orders those
//! memberships ancestors-first for variable inheritance.

pub mod group;
pub mod host;

pub use group::Group;
pub use host::Host;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// Pluggable provider of inventory data.
///
/// The core only consumes the host list, group list, and inventory-wide
/// variables; where they come from (YAML file, script output, API) is the
/// source's concern.
pub trait InventorySource: Send + Sync {
    /// All hosts known to this source
    fn hosts(&self) -> Result<Vec<Host>>;

    /// All groups with their membership edges
    fn groups(&self) -> Result<Vec<Group>>;

    /// Inventory-wide variables
    fn vars(&self) -> Result<IndexMap<String, JsonValue>> {
        Ok(IndexMap::new())
    }
}

/// The assembled inventory for one run
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: IndexMap<String, Host>,
    groups: IndexMap<String, Group>,
    vars: IndexMap<String, JsonValue>,
}

impl Inventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an inventory from a pluggable source, link membership edges,
    /// and validate the group hierarchy.
    pub fn from_source(source: &dyn InventorySource) -> Result<Self> {
        let mut inventory = Self::new();
        inventory.vars = source.vars()?;
        for host in source.hosts()? {
            inventory.hosts.insert(host.name.clone(), host);
        }
        for group in source.groups()? {
            inventory.groups.insert(group.name.clone(), group);
        }
        inventory.link()?;
        Ok(inventory)
    }

    /// Add a host programmatically
    pub fn add_host(&mut self, host: Host) {
        self.hosts.insert(host.name.clone(), host);
    }

    /// Add a group programmatically
    pub fn add_group(&mut self, group: Group) {
        self.groups.insert(group.name.clone(), group);
    }

    /// Set an inventory-wide variable
    pub fn set_var(&mut self, key: impl Into<String>, value: JsonValue) {
        self.vars.insert(key.into(), value);
    }

    /// Inventory-wide variables
    pub fn vars(&self) -> &IndexMap<String, JsonValue> {
        &self.vars
    }

    /// Look up a host by name
    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    /// Look up a group by name
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// All host names in declaration order
    pub fn host_names(&self) -> impl Iterator<Item = &String> {
        self.hosts.keys()
    }

    /// All group names in declaration order
    pub fn group_names(&self) -> impl Iterator<Item = &String> {
        self.groups.keys()
    }

    /// Number of hosts
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Wire up reverse edges and memberships, then validate.
    ///
    /// Hosts referenced by a group but never declared are created
    /// implicitly. Must be called after programmatic construction and
    /// before selection; [`Inventory::from_source`] calls it for you.
    pub fn link(&mut self) -> Result<()> {
        // Parents from children edges
        let edges: Vec<(String, String)> = self
            .groups
            .iter()
            .flat_map(|(name, g)| {
                g.children
                    .iter()
                    .map(move |c| (name.clone(), c.clone()))
            })
            .collect();
        for (parent, child) in &edges {
            if !self.groups.contains_key(child) {
                return Err(Error::GroupNotFound(child.clone()));
            }
            if let Some(group) = self.groups.get_mut(child) {
                group.add_parent(parent.clone());
            }
        }

        self.validate_acyclic()?;

        // Host membership back-references, creating implicit hosts
        let memberships: Vec<(String, String)> = self
            .groups
            .iter()
            .flat_map(|(name, g)| g.hosts.iter().map(move |h| (h.clone(), name.clone())))
            .collect();
        for (host_name, group_name) in memberships {
            let host = self
                .hosts
                .entry(host_name.clone())
                .or_insert_with(|| Host::new(host_name));
            host.groups.insert(group_name);
        }

        debug!(
            hosts = self.hosts.len(),
            groups = self.groups.len(),
            "inventory linked"
        );
        Ok(())
    }

    /// Verify the group hierarchy contains no cycles
    fn validate_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        fn visit(
            name: &str,
            groups: &IndexMap<String, Group>,
            marks: &mut HashMap<String, Mark>,
        ) -> Result<()> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => return Err(Error::GroupCycle(name.to_string())),
                None => {}
            }
            marks.insert(name.to_string(), Mark::InProgress);
            if let Some(group) = groups.get(name) {
                for child in &group.children {
                    visit(child, groups, marks)?;
                }
            }
            marks.insert(name.to_string(), Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for name in self.groups.keys() {
            visit(name, &self.groups, &mut marks)?;
        }
        Ok(())
    }

    /// All hosts in a group, including those of descendant groups
    pub fn transitive_hosts(&self, group_name: &str) -> Vec<String> {
        let mut seen_groups = HashSet::new();
        let mut hosts = Vec::new();
        let mut stack = vec![group_name.to_string()];

        while let Some(name) = stack.pop() {
            if !seen_groups.insert(name.clone()) {
                continue;
            }
            if let Some(group) = self.groups.get(&name) {
                // Preserve host declaration order within the inventory
                for (host_name, _) in &self.hosts {
                    if group.has_host(host_name) && !hosts.contains(host_name) {
                        hosts.push(host_name.clone());
                    }
                }
                for child in &group.children {
                    stack.push(child.clone());
                }
            }
        }
        hosts
    }

    /// Groups a host belongs to (direct and via ancestors), ordered
    /// ancestors-first for variable inheritance.
    pub fn group_chain(&self, host_name: &str) -> Vec<String> {
        let direct: Vec<&String> = self
            .hosts
            .get(host_name)
            .map(|h| h.groups.iter().collect())
            .unwrap_or_default();

        // Membership closure over parent edges
        let mut member_of = HashSet::new();
        let mut stack: Vec<String> = direct.into_iter().cloned().collect();
        while let Some(name) = stack.pop() {
            if !member_of.insert(name.clone()) {
                continue;
            }
            if let Some(group) = self.groups.get(&name) {
                for parent in &group.parents {
                    stack.push(parent.clone());
                }
            }
        }

        let mut chain: Vec<String> = self
            .groups
            .keys()
            .filter(|name| member_of.contains(*name))
            .cloned()
            .collect();
        chain.sort_by_key(|name| self.depth(name));
        chain
    }

    /// Distance of a group from the hierarchy root (0 for parentless groups).
    /// The hierarchy is a validated DAG, so the recursion terminates.
    fn depth(&self, group_name: &str) -> usize {
        self.groups
            .get(group_name)
            .map(|group| {
                group
                    .parents
                    .iter()
                    .map(|parent| 1 + self.depth(parent))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// Select hosts matching a pattern.
    ///
    /// Supported atoms: `all`, a group name, a host name. Atoms may be
    /// joined with commas into a union. Disabled hosts never match.
    /// Unknown atoms match nothing.
    pub fn select(&self, pattern: &str) -> Vec<String> {
        let mut selected = Vec::new();
        for atom in pattern.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let matches: Vec<String> = if atom == "all" || atom == "*" {
                self.hosts.keys().cloned().collect()
            } else if self.groups.contains_key(atom) {
                self.transitive_hosts(atom)
            } else if self.hosts.contains_key(atom) {
                vec![atom.to_string()]
            } else {
                debug!(atom, "host pattern atom matched nothing");
                Vec::new()
            };
            for name in matches {
                let enabled = self.hosts.get(&name).map(|h| h.enabled).unwrap_or(false);
                if enabled && !selected.contains(&name) {
                    selected.push(name);
                }
            }
        }
        selected
    }
}

// ============================================================================
// YAML inventory source
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawInventory {
    #[serde(default)]
    vars: IndexMap<String, JsonValue>,
    #[serde(default)]
    hosts: IndexMap<String, Option<RawHost>>,
    #[serde(default)]
    groups: IndexMap<String, RawGroup>,
}

#[derive(Debug, Deserialize)]
struct RawHost {
    #[serde(default)]
    vars: IndexMap<String, JsonValue>,
    #[serde(default = "default_true")]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    #[serde(default)]
    hosts: Vec<String>,
    #[serde(default)]
    children: Vec<String>,
    #[serde(default)]
    vars: IndexMap<String, JsonValue>,
}

fn default_true() -> bool {
    true
}

/// YAML-backed inventory source
pub struct YamlInventorySource {
    raw: RawInventory,
}

impl YamlInventorySource {
    /// Parse an inventory from YAML text
    pub fn from_str(text: &str) -> Result<Self> {
        let raw: RawInventory = serde_yaml::from_str(text)?;
        Ok(Self { raw })
    }

    /// Parse an inventory from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::InventoryLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_str(&text)
    }
}

impl InventorySource for YamlInventorySource {
    fn hosts(&self) -> Result<Vec<Host>> {
        Ok(self
            .raw
            .hosts
            .iter()
            .map(|(name, raw)| {
                let mut host = Host::new(name.clone());
                if let Some(raw) = raw {
                    host.vars = raw.vars.clone();
                    host.enabled = raw.enabled;
                }
                host
            })
            .collect())
    }

    fn groups(&self) -> Result<Vec<Group>> {
        Ok(self
            .raw
            .groups
            .iter()
            .map(|(name, raw)| {
                let mut group = Group::new(name.clone());
                for host in &raw.hosts {
                    group.add_host(host.clone());
                }
                for child in &raw.children {
                    group.add_child(child.clone());
                }
                group.vars = raw.vars.clone();
                group
            })
            .collect())
    }

    fn vars(&self) -> Result<IndexMap<String, JsonValue>> {
        Ok(self.raw.vars.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const INVENTORY_YAML: &str = r#"
vars:
  dns: 10.0.0.1
hosts:
  web01:
    vars:
      http_port: 8080
  web02: ~
  db01:
    vars:
      engine: postgres
groups:
  web:
    hosts: [web01, web02]
    vars:
      tier: frontend
  db:
    hosts: [db01]
  prod:
    children: [web, db]
    vars:
      env: production
"#;

    fn load() -> Inventory {
        let source = YamlInventorySource::from_str(INVENTORY_YAML).unwrap();
        Inventory::from_source(&source).unwrap()
    }

    #[test]
    fn test_yaml_load_and_link() {
        let inv = load();
        assert_eq!(inv.host_count(), 3);
        assert!(inv.host("web01").unwrap().in_group("web"));
        assert!(inv.group("web").unwrap().parents.contains("prod"));
        assert_eq!(inv.vars().get("dns"), Some(&json!("10.0.0.1")));
    }

    #[test]
    fn test_transitive_hosts() {
        let inv = load();
        assert_eq!(inv.transitive_hosts("web"), vec!["web01", "web02"]);
        let mut prod = inv.transitive_hosts("prod");
        prod.sort();
        assert_eq!(prod, vec!["db01", "web01", "web02"]);
    }

    #[test]
    fn test_group_chain_ancestors_first() {
        let inv = load();
        assert_eq!(inv.group_chain("web01"), vec!["prod", "web"]);
        assert_eq!(inv.group_chain("db01"), vec!["prod", "db"]);
    }

    #[test]
    fn test_select_patterns() {
        let inv = load();
        assert_eq!(inv.select("all").len(), 3);
        assert_eq!(inv.select("web"), vec!["web01", "web02"]);
        assert_eq!(inv.select("db01"), vec!["db01"]);
        assert_eq!(inv.select("web01,db"), vec!["web01", "db01"]);
        assert!(inv.select("nonexistent").is_empty());
    }

    #[test]
    fn test_disabled_host_never_selected() {
        let yaml = r#"
hosts:
  up01: ~
  down01:
    enabled: false
groups:
  web:
    hosts: [up01, down01]
"#;
        let source = YamlInventorySource::from_str(yaml).unwrap();
        let inv = Inventory::from_source(&source).unwrap();
        assert_eq!(inv.select("web"), vec!["up01"]);
        assert!(inv.select("down01").is_empty());
    }

    #[test]
    fn test_cycle_detection() {
        let yaml = r#"
groups:
  a:
    children: [b]
  b:
    children: [c]
  c:
    children: [a]
"#;
        let source = YamlInventorySource::from_str(yaml).unwrap();
        let err = Inventory::from_source(&source).unwrap_err();
        assert!(matches!(err, Error::GroupCycle(_)));
    }

    #[test]
    fn test_unknown_child_group_rejected() {
        let yaml = r#"
groups:
  a:
    children: [ghost]
"#;
        let source = YamlInventorySource::from_str(yaml).unwrap();
        let err = Inventory::from_source(&source).unwrap_err();
        assert!(matches!(err, Error::GroupNotFound(ref g) if g == "ghost"));
    }

    #[test]
    fn test_implicit_host_creation() {
        let yaml = r#"
groups:
  web:
    hosts: [ghost01]
"#;
        let source = YamlInventorySource::from_str(yaml).unwrap();
        let inv = Inventory::from_source(&source).unwrap();
        assert!(inv.host("ghost01").is_some());
        assert_eq!(inv.select("web"), vec!["ghost01"]);
    }
}
