//! Per-host task execution.
//!
//! A [`HostWorker`] owns everything private to one host for the duration of
//! a play: the resolved variable context, registered results, and the
//! handler queue. Tasks execute in strict declared order; a loop source
//! fans out into one result per element; `changed_when`/`failed_when`
//! override the module's raw signal before notification and registration.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};
use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{Error, ExecutionErrorKind};
use crate::executor::condition::{ConditionContext, ConditionEvaluator, TaskResultContext};
use crate::facts::FactStore;
use crate::handlers::HandlerQueue;
use crate::modules::{ModuleContext, ModuleError, ModuleOutput, ModuleRegistry};
use crate::playbook::{Handler, Play, Task};
use crate::target::TargetHandle;
use crate::template;
use crate::vars::VariableContext;

/// Status of a task execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task completed successfully without changes
    Ok,
    /// Task completed successfully with changes
    Changed,
    /// Task failed
    Failed,
    /// Task was skipped (condition not met)
    Skipped,
    /// Host was unreachable
    Unreachable,
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Ok
    }
}

/// Result of executing a task (or one loop iteration of it)
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TaskResult {
    /// Task display name
    pub name: String,
    /// Final status of the task
    pub status: TaskStatus,
    /// Whether something was changed (after overrides)
    pub changed: bool,
    /// Whether a failure was ignored by task policy
    pub ignored: bool,
    /// Optional message from the task
    pub msg: Option<String>,
    /// Standard output (for command modules)
    pub stdout: Option<String>,
    /// Standard error (for command modules)
    pub stderr: Option<String>,
    /// Return code (for command modules)
    pub rc: Option<i32>,
    /// The substituted loop element, when the task looped
    pub item: Option<JsonValue>,
}

impl TaskResult {
    /// Create a skipped result
    pub fn skipped(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Skipped,
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    /// Create a failed result
    pub fn failed(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Failed,
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    /// Create an unreachable result
    pub fn unreachable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Unreachable,
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    /// Build a result from a module output
    pub fn from_output(name: impl Into<String>, output: &ModuleOutput) -> Self {
        let status = if output.failed {
            TaskStatus::Failed
        } else if output.changed {
            TaskStatus::Changed
        } else {
            TaskStatus::Ok
        };
        Self {
            name: name.into(),
            status,
            changed: output.changed && !output.failed,
            ignored: false,
            msg: Some(output.msg.clone()),
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            rc: output.rc,
            item: None,
        }
    }

    /// Attach the loop element this result belongs to
    pub fn with_item(mut self, item: JsonValue) -> Self {
        self.item = Some(item);
        self
    }

    /// Whether this result counts as a failure (ignored or not)
    pub fn is_failure(&self) -> bool {
        matches!(self.status, TaskStatus::Failed | TaskStatus::Unreachable)
    }

    /// A failure that task policy did not ignore
    pub fn is_fatal(&self) -> bool {
        self.is_failure() && !self.ignored
    }

    /// Registered-variable view of this result
    fn to_registered(&self) -> JsonValue {
        json!({
            "changed": self.changed,
            "failed": self.is_failure(),
            "skipped": self.status == TaskStatus::Skipped,
            "rc": self.rc,
            "stdout": self.stdout,
            "stderr": self.stderr,
            "msg": self.msg,
        })
    }
}

/// Outcome of one host's full task sequence
#[derive(Debug, Clone, Default)]
pub struct HostRun {
    /// Every result produced, in execution order
    pub results: Vec<TaskResult>,
    /// Whether the host ended with an unignored failure
    pub failed: bool,
    /// Whether the failure was an unreachable target
    pub unreachable: bool,
    /// Name of the first fatally failing task, if any
    pub first_failure: Option<String>,
    /// False when a cancellation stopped the sequence early
    pub completed: bool,
}

/// Executes one host's tasks and handlers.
pub struct HostWorker {
    host: String,
    context: VariableContext,
    registry: Arc<ModuleRegistry>,
    fact_store: Arc<FactStore>,
    target: TargetHandle,
    check_mode: bool,
    apply_timeout: Duration,
    registered: IndexMap<String, JsonValue>,
    queue: HandlerQueue,
    evaluator: ConditionEvaluator,
}

impl HostWorker {
    /// Create a worker for one host
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: impl Into<String>,
        context: VariableContext,
        registry: Arc<ModuleRegistry>,
        fact_store: Arc<FactStore>,
        target: TargetHandle,
        check_mode: bool,
        apply_timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            context,
            registry,
            fact_store,
            target,
            check_mode,
            apply_timeout,
            registered: IndexMap::new(),
            queue: HandlerQueue::new(),
            evaluator: ConditionEvaluator::new(),
        }
    }

    /// The host this worker drives
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Number of handlers pending flush
    pub fn pending_handlers(&self) -> usize {
        self.queue.len()
    }

    /// Run the full task sequence in declared order.
    ///
    /// Stops at the first unignored failure, or cooperatively after the
    /// current task when `cancel` fires; other hosts are unaffected either
    /// way.
    #[instrument(skip(self, tasks, cancel), fields(host = %self.host))]
    pub async fn run_tasks(&mut self, tasks: &[Task], cancel: &CancellationToken) -> HostRun {
        let mut run = HostRun {
            completed: true,
            ..Default::default()
        };

        for task in tasks {
            if cancel.is_cancelled() {
                debug!("cancellation requested, stopping before next task");
                run.completed = false;
                break;
            }

            let results = self.run_task(task).await;
            let fatal = results.iter().find(|r| r.is_fatal()).cloned();
            run.results.extend(results);

            if let Some(fatal) = fatal {
                warn!(task = %task.display_name(), "host halted on failure");
                run.failed = true;
                run.unreachable = fatal.status == TaskStatus::Unreachable;
                run.first_failure = Some(task.display_name().to_string());
                break;
            }
        }
        run
    }

    /// Execute one task, fanning out over its loop source if present.
    pub async fn run_task(&mut self, task: &Task) -> Vec<TaskResult> {
        let name = task.display_name().to_string();

        // Condition gate: a false condition skips the task without ever
        // touching the module executor.
        if let Some(ref when) = task.when {
            let expr = when.to_expression();
            if !self.condition_holds(&expr, None) {
                debug!(task = %name, %expr, "condition false, skipping");
                return vec![TaskResult::skipped(
                    &name,
                    format!("condition '{}' was false", expr),
                )];
            }
        }

        let mut results = match task.loop_items {
            Some(ref items) => {
                let mut results = Vec::with_capacity(items.len());
                for item in items {
                    let loop_var = task.loop_var.as_str();
                    let result = self
                        .run_module(&name, &task.module, &task.args, Some((loop_var, item)))
                        .await;
                    let result = self.apply_overrides(task, result, Some((loop_var, item)));
                    let fatal = result.is_failure() && !task.ignore_errors;
                    results.push(result.with_item(item.clone()));
                    if fatal {
                        break;
                    }
                }
                results
            }
            None => {
                let result = self.run_module(&name, &task.module, &task.args, None).await;
                vec![self.apply_overrides(task, result, None)]
            }
        };

        // Task policy: failures may be ignored, which keeps the host going
        // but is still recorded distinctly from success.
        if task.ignore_errors {
            for result in &mut results {
                if result.is_failure() {
                    result.ignored = true;
                }
            }
        }

        // Notify handlers only from an effective change
        let any_changed = results.iter().any(|r| r.changed && !r.is_failure());
        if any_changed {
            for handler_name in &task.notify {
                if self.queue.notify(handler_name.clone()) {
                    debug!(handler = %handler_name, "handler notified");
                }
            }
        }

        if let Some(ref register) = task.register {
            self.registered
                .insert(register.clone(), registered_value(&results));
        }

        results
    }

    /// Flush notified handlers in first-notification order.
    ///
    /// The caller only invokes this when the task sequence completed
    /// successfully or with ignored failures; an aborted host's queue is
    /// discarded by [`HostWorker::discard_handlers`].
    pub async fn flush_handlers(&mut self, play: &Play) -> HostRun {
        let mut run = HostRun {
            completed: true,
            ..Default::default()
        };

        for handler_name in self.queue.drain() {
            let Some(handler) = play.find_handler(&handler_name).cloned() else {
                run.failed = true;
                run.first_failure = Some(handler_name.clone());
                run.results.push(TaskResult::failed(
                    &handler_name,
                    Error::HandlerNotFound(handler_name.clone()).to_string(),
                ));
                break;
            };

            let result = self.run_handler(&handler).await;
            let fatal = result.is_fatal();
            run.results.push(result);

            if fatal {
                run.failed = true;
                run.first_failure = Some(handler.name.clone());
                break;
            }
        }
        run
    }

    /// Drop pending notifications after an unignored failure
    pub fn discard_handlers(&mut self) {
        self.queue.clear();
    }

    async fn run_handler(&mut self, handler: &Handler) -> TaskResult {
        if let Some(ref when) = handler.when {
            let expr = when.to_expression();
            if !self.condition_holds(&expr, None) {
                return TaskResult::skipped(
                    &handler.name,
                    format!("condition '{}' was false", expr),
                );
            }
        }

        let result = self
            .run_module(&handler.name, &handler.module, &handler.args, None)
            .await;
        if result.is_failure() {
            TaskResult {
                msg: Some(
                    Error::handler_failed(
                        &handler.name,
                        &self.host,
                        result.msg.clone().unwrap_or_default(),
                    )
                    .to_string(),
                ),
                ..result
            }
        } else {
            result
        }
    }

    /// One module apply: render params, check reachability, invoke under
    /// the per-call timeout, and map malformed invocations to execution
    /// errors.
    async fn run_module(
        &self,
        name: &str,
        module: &str,
        args: &IndexMap<String, JsonValue>,
        item: Option<(&str, &JsonValue)>,
    ) -> TaskResult {
        let vars_map = self.evaluation_vars(item);

        let params = match template::render_params(args, &vars_map) {
            Ok(params) => params,
            Err(err) => return TaskResult::failed(name, err.to_string()),
        };

        let (reachable, delay) = {
            let target = self.target.lock();
            (target.reachable, target.apply_delay)
        };
        if !reachable {
            let err = Error::execution(
                ExecutionErrorKind::Unreachable,
                module,
                &self.host,
                "target did not respond",
            );
            return TaskResult::unreachable(name, err.to_string());
        }

        let module_ctx = ModuleContext {
            host: self.host.clone(),
            check_mode: self.check_mode,
            vars: vars_map,
            facts: self.fact_store.snapshot(&self.host),
            target: self.target.clone(),
            fact_store: self.fact_store.clone(),
        };

        let registry = self.registry.clone();
        let module_name = module.to_string();
        let apply = spawn_blocking(move || {
            // Applying against the target is the worker's only blocking
            // suspension point; artificial latency models a slow probe.
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            registry.apply(&module_name, &params, &module_ctx)
        });

        let output = match timeout(self.apply_timeout, apply).await {
            Err(_) => {
                let err = Error::execution(
                    ExecutionErrorKind::Timeout,
                    module,
                    &self.host,
                    format!("apply exceeded {:?}", self.apply_timeout),
                );
                return TaskResult::failed(name, err.to_string());
            }
            Ok(Err(join_err)) => {
                return TaskResult::failed(name, Error::Internal(join_err.to_string()).to_string())
            }
            Ok(Ok(result)) => result,
        };

        match output {
            Ok(output) => TaskResult::from_output(name, &output),
            Err(ModuleError::NotFound(module)) => {
                TaskResult::failed(name, Error::ModuleNotFound(module).to_string())
            }
            Err(err @ (ModuleError::MissingParameter(_) | ModuleError::InvalidParameter(_))) => {
                let err = Error::execution(
                    ExecutionErrorKind::MalformedParams,
                    module,
                    &self.host,
                    err.to_string(),
                );
                TaskResult::failed(name, err.to_string())
            }
        }
    }

    /// Apply `changed_when`/`failed_when` to a raw module result
    fn apply_overrides(
        &self,
        task: &Task,
        mut result: TaskResult,
        item: Option<(&str, &JsonValue)>,
    ) -> TaskResult {
        // Unreachable targets carry no module signal to override
        if result.status == TaskStatus::Unreachable {
            return result;
        }
        if task.changed_when.is_none() && task.failed_when.is_none() {
            return result;
        }

        let cond_ctx = ConditionContext::with_variables(self.evaluation_vars(item))
            .with_task_result(TaskResultContext {
                rc: result.rc,
                stdout: result.stdout.clone(),
                stderr: result.stderr.clone(),
                changed: result.changed,
                failed: result.is_failure(),
            });

        if let Some(ref expr) = task.changed_when {
            result.changed = self
                .evaluator
                .evaluate(expr, &cond_ctx)
                .unwrap_or(false);
        }
        if let Some(ref expr) = task.failed_when {
            let failed = self.evaluator.evaluate(expr, &cond_ctx).unwrap_or(false);
            result.status = if failed {
                TaskStatus::Failed
            } else if result.changed {
                TaskStatus::Changed
            } else {
                TaskStatus::Ok
            };
        } else if result.status != TaskStatus::Failed {
            result.status = if result.changed {
                TaskStatus::Changed
            } else {
                TaskStatus::Ok
            };
        }
        if result.status == TaskStatus::Failed {
            result.changed = false;
        }
        result
    }

    fn condition_holds(&self, expr: &str, item: Option<(&str, &JsonValue)>) -> bool {
        let cond_ctx = ConditionContext::with_variables(self.evaluation_vars(item));
        // Missing keys evaluate to false rather than aborting the run
        self.evaluator.evaluate(expr, &cond_ctx).unwrap_or(false)
    }

    /// The variable view for conditions and templates: resolved context,
    /// overlaid with facts, registered results, and the loop element.
    fn evaluation_vars(&self, item: Option<(&str, &JsonValue)>) -> IndexMap<String, JsonValue> {
        let mut vars = self.context.as_map().clone();
        for (key, value) in self.fact_store.snapshot(&self.host).all() {
            vars.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.registered {
            vars.insert(key.clone(), value.clone());
        }
        if let Some((loop_var, value)) = item {
            vars.insert(loop_var.to_string(), value.clone());
        }
        vars
    }
}

/// Registered-variable value for a task: the single result, or an
/// aggregate with per-item results for loops.
fn registered_value(results: &[TaskResult]) -> JsonValue {
    match results {
        [single] if single.item.is_none() => single.to_registered(),
        many => json!({
            "changed": many.iter().any(|r| r.changed),
            "failed": many.iter().any(|r| r.is_failure()),
            "results": many.iter().map(TaskResult::to_registered).collect::<Vec<_>>(),
        }),
    }
}
