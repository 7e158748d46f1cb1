//! Simulated target state.
//!
//! The engine reconciles desired state against *something*; in a full
//! deployment that something sits behind a transport. Here the target is an
//! in-process state tree per host: packages, services, files, and a journal
//! of executed commands. Modules converge this state, fact gathering probes
//! it, and unreachable hosts are modeled with a flag the executor checks
//! before every apply.

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::facts::Facts;

/// Running/enabled state of one service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceState {
    /// Whether the service is currently running
    pub running: bool,
    /// Whether the service starts on boot
    pub enabled: bool,
    /// Times the service has been (re)started
    pub restarts: u32,
}

/// A managed file on the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File content
    pub content: String,
    /// Permission mode string (e.g. "0644")
    pub mode: Option<String>,
}

/// The actual state of one host, mutated only through module applies.
#[derive(Debug, Default)]
pub struct TargetState {
    /// Whether the host can be reached at all
    pub reachable: bool,
    /// Artificial per-apply latency, for exercising timeouts
    pub apply_delay: Option<Duration>,

    packages: BTreeSet<String>,
    services: IndexMap<String, ServiceState>,
    files: IndexMap<String, FileEntry>,
    commands: Vec<String>,
    seeded_facts: IndexMap<String, JsonValue>,
}

impl TargetState {
    /// A fresh, reachable target with nothing installed
    pub fn new() -> Self {
        Self {
            reachable: true,
            ..Default::default()
        }
    }

    // ------------------------------------------------------------------
    // Packages
    // ------------------------------------------------------------------

    /// Whether a package is installed
    pub fn has_package(&self, name: &str) -> bool {
        self.packages.contains(name)
    }

    /// Install a package; returns true if state changed
    pub fn install_package(&mut self, name: &str) -> bool {
        self.packages.insert(name.to_string())
    }

    /// Remove a package; returns true if state changed
    pub fn remove_package(&mut self, name: &str) -> bool {
        self.packages.remove(name)
    }

    /// Installed package names
    pub fn packages(&self) -> impl Iterator<Item = &String> {
        self.packages.iter()
    }

    // ------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------

    /// Current state of a service, if known
    pub fn service(&self, name: &str) -> Option<&ServiceState> {
        self.services.get(name)
    }

    /// Mutable service entry, created stopped/disabled on first touch
    pub fn service_mut(&mut self, name: &str) -> &mut ServiceState {
        self.services.entry(name.to_string()).or_default()
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    /// Read a managed file
    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    /// Write a managed file; returns true if content or mode changed
    pub fn write_file(&mut self, path: &str, content: &str, mode: Option<&str>) -> bool {
        let entry = FileEntry {
            content: content.to_string(),
            mode: mode.map(String::from),
        };
        match self.files.get(path) {
            Some(existing) if *existing == entry => false,
            _ => {
                self.files.insert(path.to_string(), entry);
                true
            }
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Record an executed command in the journal
    pub fn record_command(&mut self, cmd: &str) {
        self.commands.push(cmd.to_string());
    }

    /// Journal of executed commands, in order
    pub fn command_journal(&self) -> &[String] {
        &self.commands
    }

    // ------------------------------------------------------------------
    // Facts
    // ------------------------------------------------------------------

    /// Seed a fact reported by the next probe
    pub fn seed_fact(&mut self, key: impl Into<String>, value: JsonValue) {
        self.seeded_facts.insert(key.into(), value);
    }

    /// Probe the target for facts. The caller is responsible for checking
    /// reachability first; probing itself never fails.
    pub fn probe(&self, host_name: &str) -> Facts {
        let mut facts = Facts::new();
        facts.set("hostname", json!(host_name));
        facts.set("os_family", json!("linux"));
        facts.set(
            "packages",
            json!(self.packages.iter().cloned().collect::<Vec<_>>()),
        );
        for (key, value) in &self.seeded_facts {
            facts.set(key.clone(), value.clone());
        }
        facts
    }
}

/// Shared handle to one host's target state
pub type TargetHandle = Arc<Mutex<TargetState>>;

/// All targets for one run, keyed by host name.
///
/// Handles are created lazily; a host nobody configured starts as a fresh
/// reachable target.
#[derive(Debug, Default)]
pub struct TargetPool {
    targets: Mutex<HashMap<String, TargetHandle>>,
}

impl TargetPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the handle for a host
    pub fn handle(&self, host: &str) -> TargetHandle {
        self.targets
            .lock()
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TargetState::new())))
            .clone()
    }

    /// Configure a host's target state before a run
    pub fn configure(&self, host: &str, f: impl FnOnce(&mut TargetState)) {
        let handle = self.handle(host);
        let mut state = handle.lock();
        f(&mut state);
    }

    /// Whether a host is currently reachable
    pub fn is_reachable(&self, host: &str) -> bool {
        self.handle(host).lock().reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_install_is_idempotent_signal() {
        let mut state = TargetState::new();
        assert!(state.install_package("nginx"));
        assert!(!state.install_package("nginx"));
        assert!(state.has_package("nginx"));
        assert!(state.remove_package("nginx"));
        assert!(!state.remove_package("nginx"));
    }

    #[test]
    fn test_file_write_change_detection() {
        let mut state = TargetState::new();
        assert!(state.write_file("/etc/motd", "hello", None));
        assert!(!state.write_file("/etc/motd", "hello", None));
        assert!(state.write_file("/etc/motd", "hello", Some("0600")));
    }

    #[test]
    fn test_probe_reports_seeded_facts() {
        let mut state = TargetState::new();
        state.install_package("openssl");
        state.seed_fact("kernel", serde_json::json!("6.1"));

        let facts = state.probe("web01");
        assert_eq!(facts.get("hostname"), Some(&serde_json::json!("web01")));
        assert_eq!(facts.get("kernel"), Some(&serde_json::json!("6.1")));
        assert_eq!(
            facts.get("packages"),
            Some(&serde_json::json!(["openssl"]))
        );
    }

    #[test]
    fn test_pool_lazy_handles() {
        let pool = TargetPool::new();
        assert!(pool.is_reachable("fresh"));
        pool.configure("down", |t| t.reachable = false);
        assert!(!pool.is_reachable("down"));
    }
}
