//! Core reconciliation engine.
//!
//! The [`Executor`] drives a playbook across the inventory: it selects the
//! hosts a play targets, resolves each host's variable context, gathers
//! facts unless the play disables it, runs the task sequence through a
//! [`HostWorker`](task::HostWorker), flushes notified handlers, and
//! aggregates everything into a [`RunReport`].
//!
//! Scheduling model: one worker per host, spawned concurrently up to the
//! configured fan-out limit. Workers share nothing mutable except the fact
//! store and target pool, both keyed per host; task ordering is strict
//! within a host and unspecified across hosts. An operator abort request
//! stops every worker after its current task.

pub mod condition;
pub mod task;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, ExecutionErrorKind, Result};
use crate::facts::FactStore;
use crate::inventory::Inventory;
use crate::modules::ModuleRegistry;
use crate::playbook::{Play, Playbook};
use crate::target::TargetPool;
use crate::vars;

use task::{HostWorker, TaskResult, TaskStatus};

/// Options governing one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum number of concurrently executing host workers
    pub forks: usize,
    /// Report what would change without mutating targets
    pub check_mode: bool,
    /// Per-call timeout for a single module apply
    pub apply_timeout: Duration,
    /// Run-level override variables (highest precedence)
    pub extra_vars: IndexMap<String, JsonValue>,
    /// Optional host pattern intersected with every play's selector
    pub limit: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            forks: 5,
            check_mode: false,
            apply_timeout: Duration::from_secs(60),
            extra_vars: IndexMap::new(),
            limit: None,
        }
    }
}

/// Per-host tallies and terminal status for the report
#[derive(Debug, Clone, Default)]
pub struct HostRecap {
    /// Host name
    pub host: String,
    /// Results with status ok
    pub ok: usize,
    /// Results that changed the target
    pub changed: usize,
    /// Unignored failures
    pub failed: usize,
    /// Skipped results
    pub skipped: usize,
    /// Unreachable results
    pub unreachable: usize,
    /// Ignored failures (recorded distinctly from success)
    pub ignored: usize,
    /// Whether the host ended with an unignored failure
    pub failed_host: bool,
    /// Whether the host's failure was an unreachable target
    pub unreachable_host: bool,
    /// First fatally failing task or handler
    pub first_failure: Option<String>,
    /// Every result produced for this host, in execution order
    pub results: Vec<TaskResult>,
}

impl HostRecap {
    fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    fn absorb(&mut self, results: Vec<TaskResult>) {
        for result in &results {
            if result.ignored {
                self.ignored += 1;
            } else {
                match result.status {
                    TaskStatus::Ok => self.ok += 1,
                    TaskStatus::Changed => self.changed += 1,
                    TaskStatus::Failed => self.failed += 1,
                    TaskStatus::Skipped => self.skipped += 1,
                    TaskStatus::Unreachable => self.unreachable += 1,
                }
            }
        }
        self.results.extend(results);
    }

    fn merge(&mut self, other: HostRecap) {
        self.ok += other.ok;
        self.changed += other.changed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.unreachable += other.unreachable;
        self.ignored += other.ignored;
        self.failed_host |= other.failed_host;
        self.unreachable_host |= other.unreachable_host;
        if self.first_failure.is_none() {
            self.first_failure = other.first_failure;
        }
        self.results.extend(other.results);
    }
}

/// Aggregated outcome of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// Per-host recaps, keyed by host name
    pub hosts: IndexMap<String, HostRecap>,
    /// Whether an operator abort stopped the run early
    pub aborted: bool,
}

impl RunReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            hosts: IndexMap::new(),
            aborted: false,
        }
    }

    fn merge_host(&mut self, recap: HostRecap) {
        match self.hosts.get_mut(&recap.host) {
            Some(existing) => existing.merge(recap),
            None => {
                self.hosts.insert(recap.host.clone(), recap);
            }
        }
    }

    /// True when no host ended with an unignored failure
    pub fn success(&self) -> bool {
        !self
            .hosts
            .values()
            .any(|h| h.failed_host || h.unreachable_host)
    }

    /// Process exit code: 0 on full success, nonzero otherwise
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            2
        }
    }
}

/// The reconciliation engine for one inventory
pub struct Executor {
    inventory: Arc<Inventory>,
    options: RunOptions,
    registry: Arc<ModuleRegistry>,
    targets: Arc<TargetPool>,
    facts: Arc<FactStore>,
    cancel: CancellationToken,
}

impl Executor {
    /// Create an executor with default options and built-in modules
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory: Arc::new(inventory),
            options: RunOptions::default(),
            registry: Arc::new(ModuleRegistry::with_builtins()),
            targets: Arc::new(TargetPool::new()),
            facts: Arc::new(FactStore::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Set run options
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a custom module registry
    pub fn with_registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Share a pre-configured target pool (tests seed actual state here)
    pub fn with_targets(mut self, targets: Arc<TargetPool>) -> Self {
        self.targets = targets;
        self
    }

    /// The target pool in use
    pub fn targets(&self) -> Arc<TargetPool> {
        self.targets.clone()
    }

    /// Token an operator can trip to stop all workers after their current
    /// task
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every play of a playbook in order
    #[instrument(skip(self, playbook))]
    pub async fn run_playbook(&self, playbook: &Playbook) -> Result<RunReport> {
        playbook.validate()?;

        let mut report = RunReport::new();
        for play in &playbook.plays {
            let play_report = self.run_play(play).await?;
            for (_, recap) in play_report.hosts {
                report.merge_host(recap);
            }
            report.aborted |= play_report.aborted;
            if report.aborted {
                break;
            }
        }
        report.finished_at = Utc::now();
        Ok(report)
    }

    /// Run a single play across its selected hosts
    #[instrument(skip(self, play), fields(play = %play.name))]
    pub async fn run_play(&self, play: &Play) -> Result<RunReport> {
        play.validate()?;

        let mut hosts = self.inventory.select(&play.hosts);
        if let Some(ref limit) = self.options.limit {
            let limited = self.inventory.select(limit);
            hosts.retain(|h| limited.contains(h));
        }

        let mut report = RunReport::new();
        if hosts.is_empty() {
            warn!(selector = %play.hosts, "no hosts matched for play");
            report.finished_at = Utc::now();
            return Ok(report);
        }

        info!(hosts = hosts.len(), forks = self.options.forks, "starting play");

        let play = Arc::new(play.clone());
        let semaphore = Arc::new(Semaphore::new(self.options.forks.max(1)));
        let mut workers = JoinSet::new();

        for host_name in hosts {
            let permit_source = semaphore.clone();
            let play = play.clone();
            let inventory = self.inventory.clone();
            let registry = self.registry.clone();
            let targets = self.targets.clone();
            let facts = self.facts.clone();
            let options = self.options.clone();
            let cancel = self.cancel.clone();

            workers.spawn(async move {
                // The permit bounds fan-out; the worker owns it for its
                // whole host run.
                let _permit = permit_source.acquire_owned().await;
                run_host(
                    host_name, play, inventory, registry, targets, facts, options, cancel,
                )
                .await
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(recap) => report.merge_host(recap),
                Err(join_err) => {
                    return Err(Error::Internal(format!("host worker panicked: {join_err}")))
                }
            }
        }

        report.aborted = self.cancel.is_cancelled();
        report.finished_at = Utc::now();
        Ok(report)
    }
}

/// Drive one host through a play: resolve, gather, run, flush.
#[allow(clippy::too_many_arguments)]
async fn run_host(
    host_name: String,
    play: Arc<Play>,
    inventory: Arc<Inventory>,
    registry: Arc<ModuleRegistry>,
    targets: Arc<TargetPool>,
    facts: Arc<FactStore>,
    options: RunOptions,
    cancel: CancellationToken,
) -> HostRecap {
    let mut recap = HostRecap::new(&host_name);

    let Some(host) = inventory.host(&host_name) else {
        // select() only returns inventory hosts; this is a defect guard
        recap.failed_host = true;
        recap.first_failure = Some("host lookup".to_string());
        return recap;
    };

    let context = vars::resolve(host, &play, &inventory, &options.extra_vars);
    let target = targets.handle(&host_name);

    if play.gather_facts {
        let probe_target = target.clone();
        let probe_host = host_name.clone();
        let gathered = facts.gather_with(&host_name, move || {
            let state = probe_target.lock();
            if !state.reachable {
                return Err(Error::execution(
                    ExecutionErrorKind::Unreachable,
                    "gather_facts",
                    &probe_host,
                    "target did not respond to fact probe",
                ));
            }
            Ok(state.probe(&probe_host))
        });
        if let Err(err) = gathered {
            recap.absorb(vec![TaskResult::unreachable("gather facts", err.to_string())]);
            recap.failed_host = true;
            recap.unreachable_host = true;
            recap.first_failure = Some("gather facts".to_string());
            return recap;
        }
    }

    let mut worker = HostWorker::new(
        &host_name,
        context,
        registry,
        facts,
        target,
        options.check_mode,
        options.apply_timeout,
    );

    let run = worker.run_tasks(&play.tasks, &cancel).await;
    recap.failed_host = run.failed;
    recap.unreachable_host = run.unreachable;
    recap.first_failure = run.first_failure.clone();
    let completed = run.completed;
    let task_run_failed = run.failed;
    recap.absorb(run.results);

    // Handlers flush only when the task sequence finished on success or
    // ignored failures; an aborted or cancelled host discards its queue.
    if completed && !task_run_failed {
        let flush = worker.flush_handlers(&play).await;
        if flush.failed {
            recap.failed_host = true;
            if recap.first_failure.is_none() {
                recap.first_failure = flush.first_failure.clone();
            }
        }
        recap.absorb(flush.results);
    } else {
        debug!(host = %host_name, "discarding pending handlers");
        worker.discard_handlers();
    }

    recap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Host, Inventory};
    use crate::playbook::{Handler, Play, Task};
    use pretty_assertions::assert_eq;

    fn inventory(hosts: &[&str]) -> Inventory {
        let mut inv = Inventory::new();
        for h in hosts {
            inv.add_host(Host::new(*h));
        }
        inv.link().unwrap();
        inv
    }

    #[tokio::test]
    async fn test_run_play_counts() {
        let executor = Executor::new(inventory(&["h1"]));
        let play = Play::new("p", "all")
            .task(Task::new("install", "package").arg("name", "nginx"))
            .task(Task::new("say", "debug").arg("msg", "done"));

        let report = executor.run_play(&play).await.unwrap();
        let recap = &report.hosts["h1"];
        assert_eq!(recap.changed, 1);
        assert_eq!(recap.ok, 1);
        assert_eq!(recap.failed, 0);
        assert!(report.success());
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_empty_selection_is_empty_report() {
        let executor = Executor::new(inventory(&["h1"]));
        let play = Play::new("p", "nonexistent-group");

        let report = executor.run_play(&play).await.unwrap();
        assert!(report.hosts.is_empty());
        assert!(report.success());
    }

    #[tokio::test]
    async fn test_limit_intersection() {
        let executor = Executor::new(inventory(&["h1", "h2"])).with_options(RunOptions {
            limit: Some("h2".to_string()),
            ..Default::default()
        });
        let play = Play::new("p", "all").task(Task::new("say", "debug"));

        let report = executor.run_play(&play).await.unwrap();
        assert!(!report.hosts.contains_key("h1"));
        assert!(report.hosts.contains_key("h2"));
    }

    #[tokio::test]
    async fn test_unreachable_host_skips_tasks() {
        let executor = Executor::new(inventory(&["down"]));
        executor.targets().configure("down", |t| t.reachable = false);
        let play = Play::new("p", "all").task(Task::new("install", "package").arg("name", "x"));

        let report = executor.run_play(&play).await.unwrap();
        let recap = &report.hosts["down"];
        assert!(recap.unreachable_host);
        assert_eq!(recap.unreachable, 1);
        assert_eq!(report.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_gather_facts_disabled_still_deterministic() {
        let executor = Executor::new(inventory(&["h1"]));
        let play = Play::new("p", "all")
            .without_facts()
            .task(Task::new("gated on fact", "debug").when("os_family == 'linux'"));

        let report = executor.run_play(&play).await.unwrap();
        let recap = &report.hosts["h1"];
        // Empty snapshot: the fact is Missing, the condition is false
        assert_eq!(recap.skipped, 1);
        assert!(report.success());
    }

    #[tokio::test]
    async fn test_handler_not_flushed_after_failure() {
        let executor = Executor::new(inventory(&["h1"]));
        let play = Play::new("p", "all")
            .task(
                Task::new("change", "package")
                    .arg("name", "nginx")
                    .notify("restart nginx"),
            )
            .task(Task::new("boom", "assert").arg("that", "false"))
            .handler(
                Handler::new("restart nginx", "service")
                    .arg("name", "nginx")
                    .arg("state", "restarted"),
            );

        let report = executor.run_play(&play).await.unwrap();
        let recap = &report.hosts["h1"];
        assert!(recap.failed_host);
        assert_eq!(recap.first_failure.as_deref(), Some("boom"));
        // The notified handler must not have run
        let nginx_restarts = executor
            .targets()
            .handle("h1")
            .lock()
            .service("nginx")
            .map(|s| s.restarts)
            .unwrap_or(0);
        assert_eq!(nginx_restarts, 0);
    }

    #[tokio::test]
    async fn test_playbook_merges_plays() {
        let executor = Executor::new(inventory(&["h1"]));
        let playbook = Playbook::new(vec![
            Play::new("one", "all").task(Task::new("a", "package").arg("name", "curl")),
            Play::new("two", "all").task(Task::new("b", "package").arg("name", "curl")),
        ]);

        let report = executor.run_playbook(&playbook).await.unwrap();
        let recap = &report.hosts["h1"];
        // Second play finds the package converged
        assert_eq!(recap.changed, 1);
        assert_eq!(recap.ok, 1);
    }
}
