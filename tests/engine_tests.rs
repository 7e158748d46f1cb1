//! End-to-end engine tests.
//!
//! This suite exercises the reconciliation engine's observable properties:
//!
//! 1. Idempotence - applying the same desired state twice changes nothing
//!    the second time
//! 2. Handler dedup - N notifications run the handler exactly once, in
//!    first-notification order
//! 3. Conditional skip - a false condition never invokes the executor
//! 4. Loop fan-out - K items produce K ordered results
//! 5. The nginx scenario - selector scoping plus notify end to end
//! 6. Failure isolation - one host's failure never touches its siblings
//! 7. Check mode, registered results, set_fact, timeouts, unreachable
//!    targets, and cooperative cancellation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use converge::executor::task::TaskStatus;
use converge::executor::{Executor, RunOptions};
use converge::inventory::{Group, Host, Inventory};
use converge::modules::{
    Module, ModuleContext, ModuleOutput, ModuleParams, ModuleRegistry, ModuleResult,
};
use converge::playbook::{Handler, Play, Task};

// ============================================================================
// Helper Functions
// ============================================================================

/// Inventory with the classic two-tier layout: h1 in "web", h2 in "db"
fn web_db_inventory() -> Inventory {
    let mut inventory = Inventory::new();

    let mut web = Group::new("web");
    web.add_host("h1");
    inventory.add_group(web);

    let mut db = Group::new("db");
    db.add_host("h2");
    inventory.add_group(db);

    inventory.link().unwrap();
    inventory
}

fn flat_inventory(hosts: &[&str]) -> Inventory {
    let mut inventory = Inventory::new();
    for host in hosts {
        inventory.add_host(Host::new(*host));
    }
    inventory.link().unwrap();
    inventory
}

/// A module that counts its invocations, for verifying skip semantics
struct CountingModule {
    calls: Arc<AtomicUsize>,
}

impl Module for CountingModule {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn description(&self) -> &'static str {
        "Counts how many times it was applied"
    }

    fn apply(&self, _params: &ModuleParams, _ctx: &ModuleContext) -> ModuleResult<ModuleOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ModuleOutput::ok("counted"))
    }
}

// ============================================================================
// Section 1: Idempotence
// ============================================================================

#[tokio::test]
async fn test_idempotent_apply_changed_then_unchanged() {
    let executor = Executor::new(flat_inventory(&["h1"]));
    let play = Play::new("converge", "all")
        .task(Task::new("install nginx", "package").arg("name", "nginx"));

    let first = executor.run_play(&play).await.unwrap();
    assert_eq!(first.hosts["h1"].changed, 1);
    assert_eq!(first.hosts["h1"].ok, 0);

    // Same desired state against the now-converged target
    let second = executor.run_play(&play).await.unwrap();
    assert_eq!(second.hosts["h1"].changed, 0);
    assert_eq!(second.hosts["h1"].ok, 1);
}

#[tokio::test]
async fn test_idempotence_across_modules() {
    let executor = Executor::new(flat_inventory(&["h1"]));
    let play = Play::new("converge", "all")
        .task(Task::new("pkg", "package").arg("name", "nginx"))
        .task(Task::new("svc", "service").arg("name", "nginx").arg("state", "started"))
        .task(
            Task::new("motd", "copy")
                .arg("dest", "/etc/motd")
                .arg("content", "managed"),
        );

    let first = executor.run_play(&play).await.unwrap();
    assert_eq!(first.hosts["h1"].changed, 3);

    let second = executor.run_play(&play).await.unwrap();
    assert_eq!(second.hosts["h1"].changed, 0);
    assert_eq!(second.hosts["h1"].ok, 3);
}

// ============================================================================
// Section 2: Handler dedup and ordering
// ============================================================================

#[tokio::test]
async fn test_handler_runs_once_despite_many_notifications() {
    let executor = Executor::new(flat_inventory(&["h1"]));
    let play = Play::new("notify storm", "all")
        .task(
            Task::new("a", "package")
                .arg("name", "pkg-a")
                .notify("restart nginx"),
        )
        .task(
            Task::new("b", "package")
                .arg("name", "pkg-b")
                .notify("restart nginx"),
        )
        .task(
            Task::new("c", "package")
                .arg("name", "pkg-c")
                .notify("restart nginx"),
        )
        .handler(
            Handler::new("restart nginx", "service")
                .arg("name", "nginx")
                .arg("state", "restarted"),
        );

    let report = executor.run_play(&play).await.unwrap();
    assert!(report.success());

    let restarts = executor
        .targets()
        .handle("h1")
        .lock()
        .service("nginx")
        .map(|s| s.restarts)
        .unwrap_or(0);
    assert_eq!(restarts, 1);
}

#[tokio::test]
async fn test_handlers_flush_in_first_notification_order() {
    let executor = Executor::new(flat_inventory(&["h1"]));
    let play = Play::new("ordering", "all")
        .task(
            Task::new("a", "package")
                .arg("name", "pkg-a")
                .notify("second"),
        )
        .task(
            Task::new("b", "package")
                .arg("name", "pkg-b")
                .notify("first"),
        )
        .task(
            Task::new("c", "package")
                .arg("name", "pkg-c")
                .notify("second"),
        )
        .handler(Handler::new("first", "command").arg("cmd", "run-first"))
        .handler(Handler::new("second", "command").arg("cmd", "run-second"));

    let report = executor.run_play(&play).await.unwrap();
    assert!(report.success());

    let journal = executor
        .targets()
        .handle("h1")
        .lock()
        .command_journal()
        .to_vec();
    // "second" was notified before "first", so it flushes first
    assert_eq!(journal, vec!["run-second", "run-first"]);
}

#[tokio::test]
async fn test_unchanged_task_does_not_notify() {
    let executor = Executor::new(flat_inventory(&["h1"]));
    executor.targets().configure("h1", |t| {
        t.install_package("nginx");
    });

    let play = Play::new("no-op", "all")
        .task(
            Task::new("already there", "package")
                .arg("name", "nginx")
                .notify("restart nginx"),
        )
        .handler(
            Handler::new("restart nginx", "service")
                .arg("name", "nginx")
                .arg("state", "restarted"),
        );

    let report = executor.run_play(&play).await.unwrap();
    assert_eq!(report.hosts["h1"].ok, 1);
    assert!(executor.targets().handle("h1").lock().service("nginx").is_none());
}

#[tokio::test]
async fn test_changed_when_false_suppresses_notification() {
    let executor = Executor::new(flat_inventory(&["h1"]));
    let mut task = Task::new("forced unchanged", "package")
        .arg("name", "nginx")
        .notify("restart nginx");
    task.changed_when = Some("false".to_string());

    let play = Play::new("override", "all").task(task).handler(
        Handler::new("restart nginx", "service")
            .arg("name", "nginx")
            .arg("state", "restarted"),
    );

    let report = executor.run_play(&play).await.unwrap();
    assert_eq!(report.hosts["h1"].ok, 1);
    // Mutated, but the override suppressed both changed and the notify
    assert!(executor.targets().handle("h1").lock().has_package("nginx"));
    assert!(executor.targets().handle("h1").lock().service("nginx").is_none());
}

// ============================================================================
// Section 3: Conditional skip
// ============================================================================

#[tokio::test]
async fn test_false_condition_skips_without_invoking_executor() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ModuleRegistry::with_builtins();
    registry.register(Arc::new(CountingModule {
        calls: calls.clone(),
    }));

    let executor = Executor::new(flat_inventory(&["h1"])).with_registry(registry);
    let play = Play::new("gated", "all")
        .without_facts()
        .task(Task::new("never runs", "counting").when("false"))
        .task(Task::new("missing var gate", "counting").when("defined(ghost)"));

    let report = executor.run_play(&play).await.unwrap();
    assert_eq!(report.hosts["h1"].skipped, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_true_condition_runs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ModuleRegistry::with_builtins();
    registry.register(Arc::new(CountingModule {
        calls: calls.clone(),
    }));

    let executor = Executor::new(flat_inventory(&["h1"])).with_registry(registry);
    let play = Play::new("gated", "all")
        .var("enabled", true)
        .task(Task::new("runs", "counting").when("enabled"));

    let report = executor.run_play(&play).await.unwrap();
    assert_eq!(report.hosts["h1"].ok, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Section 4: Loop fan-out
// ============================================================================

#[tokio::test]
async fn test_loop_produces_k_ordered_results() {
    let executor = Executor::new(flat_inventory(&["h1"]));
    let packages = vec![json!("curl"), json!("jq"), json!("git"), json!("htop")];
    let play = Play::new("fan out", "all").task(
        Task::new("install tools", "package")
            .arg("name", "{{ item }}")
            .loop_over(packages.clone()),
    );

    let report = executor.run_play(&play).await.unwrap();
    let recap = &report.hosts["h1"];
    assert_eq!(recap.changed, 4);

    let items: Vec<_> = recap.results.iter().map(|r| r.item.clone().unwrap()).collect();
    assert_eq!(items, packages);

    let target = executor.targets().handle("h1");
    let state = target.lock();
    for pkg in ["curl", "jq", "git", "htop"] {
        assert!(state.has_package(pkg), "{pkg} must be installed");
    }
}

#[tokio::test]
async fn test_loop_item_substitution_in_nested_params() {
    let executor = Executor::new(flat_inventory(&["h1"]));
    let play = Play::new("users", "all").task(
        Task::new("write user files", "copy")
            .arg("dest", "/home/{{ item.name }}/.profile")
            .arg("content", "uid={{ item.uid }}")
            .loop_over(vec![
                json!({"name": "alice", "uid": 1001}),
                json!({"name": "bob", "uid": 1002}),
            ]),
    );

    let report = executor.run_play(&play).await.unwrap();
    assert_eq!(report.hosts["h1"].changed, 2);

    let target = executor.targets().handle("h1");
    let state = target.lock();
    assert_eq!(
        state.file("/home/alice/.profile").unwrap().content,
        "uid=1001"
    );
    assert_eq!(state.file("/home/bob/.profile").unwrap().content, "uid=1002");
}

// ============================================================================
// Section 5: The nginx scenario
// ============================================================================

#[tokio::test]
async fn test_nginx_scenario_end_to_end() {
    let executor = Executor::new(web_db_inventory());
    let play = Play::new("web tier", "web")
        .task(
            Task::new("install nginx", "package")
                .arg("name", "nginx")
                .notify("restart-nginx"),
        )
        .handler(
            Handler::new("restart-nginx", "service")
                .arg("name", "nginx")
                .arg("state", "restarted"),
        );

    let report = executor.run_play(&play).await.unwrap();

    // h1: task changed, handler executed once
    let h1 = &report.hosts["h1"];
    assert_eq!(h1.changed, 2); // install + restart
    assert!(!h1.failed_host);
    let restarts = executor
        .targets()
        .handle("h1")
        .lock()
        .service("nginx")
        .map(|s| s.restarts)
        .unwrap_or(0);
    assert_eq!(restarts, 1);

    // h2 is outside the selector: no tasks ran at all
    assert!(!report.hosts.contains_key("h2"));
    assert!(!executor.targets().handle("h2").lock().has_package("nginx"));

    // Second run: already converged, handler silent
    let second = executor.run_play(&play).await.unwrap();
    assert_eq!(second.hosts["h1"].changed, 0);
    assert_eq!(second.hosts["h1"].ok, 1);
    let restarts = executor
        .targets()
        .handle("h1")
        .lock()
        .service("nginx")
        .map(|s| s.restarts)
        .unwrap();
    assert_eq!(restarts, 1);
}

// ============================================================================
// Section 6: Failure isolation
// ============================================================================

#[tokio::test]
async fn test_failure_on_one_host_does_not_touch_siblings() {
    // Host vars gate the failure to h1 only
    let mut inventory = Inventory::new();
    inventory.add_host(Host::new("h1").with_var("should_fail", json!(true)));
    inventory.add_host(Host::new("h2").with_var("should_fail", json!(false)));
    inventory.link().unwrap();

    let executor = Executor::new(inventory);
    let play = Play::new("isolation", "all")
        .task(Task::new("maybe fail", "assert").arg("that", "not should_fail"))
        .task(Task::new("follow-up", "package").arg("name", "after"));

    let report = executor.run_play(&play).await.unwrap();

    let h1 = &report.hosts["h1"];
    assert!(h1.failed_host);
    assert_eq!(h1.first_failure.as_deref(), Some("maybe fail"));
    assert_eq!(h1.failed, 1);

    let h2 = &report.hosts["h2"];
    assert!(!h2.failed_host);
    assert_eq!(h2.ok, 1);
    assert_eq!(h2.changed, 1);

    // h1 halted before the follow-up; h2 converged it
    assert!(!executor.targets().handle("h1").lock().has_package("after"));
    assert!(executor.targets().handle("h2").lock().has_package("after"));

    assert!(!report.success());
    assert_ne!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_unreachable_host_is_isolated_too() {
    let executor = Executor::new(flat_inventory(&["down", "up"]));
    executor.targets().configure("down", |t| t.reachable = false);

    let play =
        Play::new("mixed fleet", "all").task(Task::new("install", "package").arg("name", "tool"));

    let report = executor.run_play(&play).await.unwrap();
    assert!(report.hosts["down"].unreachable_host);
    assert!(!report.hosts["up"].failed_host);
    assert!(executor.targets().handle("up").lock().has_package("tool"));
    assert_ne!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_ignored_failure_keeps_host_alive_and_flushes_handlers() {
    let executor = Executor::new(flat_inventory(&["h1"]));
    let play = Play::new("resilient", "all")
        .task(
            Task::new("flaky probe", "assert")
                .arg("that", "false")
                .ignore_errors(true),
        )
        .task(
            Task::new("install", "package")
                .arg("name", "nginx")
                .notify("restart nginx"),
        )
        .handler(
            Handler::new("restart nginx", "service")
                .arg("name", "nginx")
                .arg("state", "restarted"),
        );

    let report = executor.run_play(&play).await.unwrap();
    let recap = &report.hosts["h1"];

    assert!(!recap.failed_host);
    assert_eq!(recap.ignored, 1);
    assert_eq!(recap.changed, 2); // install + handler
    assert!(report.success());

    let restarts = executor
        .targets()
        .handle("h1")
        .lock()
        .service("nginx")
        .map(|s| s.restarts)
        .unwrap();
    assert_eq!(restarts, 1);
}

// ============================================================================
// Section 7: Check mode, register, set_fact, timeout, cancellation
// ============================================================================

#[tokio::test]
async fn test_check_mode_reports_without_converging() {
    let executor = Executor::new(flat_inventory(&["h1"])).with_options(RunOptions {
        check_mode: true,
        ..Default::default()
    });
    let play = Play::new("dry run", "all")
        .task(Task::new("install", "package").arg("name", "nginx"));

    let report = executor.run_play(&play).await.unwrap();
    assert_eq!(report.hosts["h1"].changed, 1);
    assert!(!executor.targets().handle("h1").lock().has_package("nginx"));
}

#[tokio::test]
async fn test_registered_result_drives_later_condition() {
    let executor = Executor::new(flat_inventory(&["h1"]));
    let play = Play::new("register flow", "all")
        .task(
            Task::new("probe", "command")
                .arg("cmd", "echo active")
                .register("probe_result"),
        )
        .task(Task::new("on active", "package")
            .arg("name", "responder")
            .when("probe_result.stdout == 'active'"))
        .task(Task::new("on inactive", "package")
            .arg("name", "fallback")
            .when("probe_result.stdout == 'inactive'"));

    let report = executor.run_play(&play).await.unwrap();
    let recap = &report.hosts["h1"];
    assert_eq!(recap.skipped, 1);
    assert!(executor.targets().handle("h1").lock().has_package("responder"));
    assert!(!executor.targets().handle("h1").lock().has_package("fallback"));
}

#[tokio::test]
async fn test_set_fact_visible_to_later_tasks() {
    let executor = Executor::new(flat_inventory(&["h1"]));
    let play = Play::new("facts flow", "all")
        .without_facts()
        .task(Task::new("choose color", "set_fact").arg("deploy_color", "green"))
        .task(
            Task::new("deploy green", "package")
                .arg("name", "app-green")
                .when("deploy_color == 'green'"),
        );

    let report = executor.run_play(&play).await.unwrap();
    assert_eq!(report.hosts["h1"].changed, 1);
    assert!(executor.targets().handle("h1").lock().has_package("app-green"));
}

#[tokio::test]
async fn test_gathered_facts_drive_conditions() {
    let executor = Executor::new(flat_inventory(&["h1"]));
    executor
        .targets()
        .configure("h1", |t| t.seed_fact("os_release", json!("bookworm")));

    let play = Play::new("fact gated", "all")
        .task(
            Task::new("bookworm only", "package")
                .arg("name", "bookworm-tool")
                .when("os_release == 'bookworm'"),
        )
        .task(
            Task::new("trixie only", "package")
                .arg("name", "trixie-tool")
                .when("os_release == 'trixie'"),
        );

    let report = executor.run_play(&play).await.unwrap();
    assert_eq!(report.hosts["h1"].changed, 1);
    assert_eq!(report.hosts["h1"].skipped, 1);
}

#[tokio::test]
async fn test_apply_timeout_is_reported_not_crashed() {
    let executor = Executor::new(flat_inventory(&["slow"])).with_options(RunOptions {
        apply_timeout: Duration::from_millis(20),
        ..Default::default()
    });
    executor
        .targets()
        .configure("slow", |t| t.apply_delay = Some(Duration::from_millis(250)));

    let play = Play::new("slow target", "all")
        .without_facts()
        .task(Task::new("install", "package").arg("name", "nginx"));

    let report = executor.run_play(&play).await.unwrap();
    let recap = &report.hosts["slow"];
    assert!(recap.failed_host);
    let failing = recap
        .results
        .iter()
        .find(|r| r.status == TaskStatus::Failed)
        .unwrap();
    assert!(failing.msg.as_ref().unwrap().contains("timeout"));
}

#[tokio::test]
async fn test_cancellation_retains_completed_results() {
    let executor = Executor::new(flat_inventory(&["h1"]));
    executor.cancel_token().cancel();

    let play = Play::new("aborted", "all")
        .without_facts()
        .task(Task::new("never", "package").arg("name", "nginx"));

    let report = executor.run_play(&play).await.unwrap();
    assert!(report.aborted);
    assert!(!executor.targets().handle("h1").lock().has_package("nginx"));
    // Cancellation is not a failure
    assert!(report.success());
}

// ============================================================================
// Section 8: Concurrency fan-out
// ============================================================================

#[tokio::test]
async fn test_many_hosts_bounded_fan_out() {
    let names: Vec<String> = (0..20).map(|i| format!("h{i:02}")).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();

    let executor = Executor::new(flat_inventory(&name_refs)).with_options(RunOptions {
        forks: 3,
        ..Default::default()
    });
    let play = Play::new("fleet", "all")
        .task(Task::new("install", "package").arg("name", "agent"));

    let report = executor.run_play(&play).await.unwrap();
    assert_eq!(report.hosts.len(), 20);
    assert!(report.success());
    for name in &names {
        assert!(executor.targets().handle(name).lock().has_package("agent"));
        assert_eq!(report.hosts[name].changed, 1);
    }
}
