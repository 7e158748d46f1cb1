//! Playbook parsing and representation.
//!
//! A playbook is an ordered list of plays; each play binds a host selector
//! to an ordered task list, optional handlers, and play-scoped variables.
//! Parsing raw text is delegated to a pluggable [`PlaySource`]; the engine
//! itself only ever sees the parsed entities.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::error::{Error, Result};

/// A `when` condition: a single expression or a list joined with `and`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum When {
    /// Single condition expression
    Single(String),
    /// Multiple conditions, all must hold
    Multiple(Vec<String>),
}

impl When {
    /// Collapse into one expression string
    pub fn to_expression(&self) -> String {
        match self {
            When::Single(s) => s.clone(),
            When::Multiple(v) => v.join(" and "),
        }
    }
}

/// One name or a list of names (used for `notify`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// A task to be executed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task name (displayed during execution)
    #[serde(default)]
    pub name: String,
    /// Module to execute
    pub module: String,
    /// Module arguments
    #[serde(default)]
    pub args: IndexMap<String, JsonValue>,
    /// Conditional expression evaluated against vars and facts
    #[serde(default)]
    pub when: Option<When>,
    /// Handlers to notify when the task reports changed
    #[serde(default, deserialize_with = "de_names")]
    pub notify: Vec<String>,
    /// Variable name to register the result under
    #[serde(default)]
    pub register: Option<String>,
    /// Items to loop over
    #[serde(default, rename = "loop")]
    pub loop_items: Option<Vec<JsonValue>>,
    /// Loop variable name (default: "item")
    #[serde(default = "default_loop_var")]
    pub loop_var: String,
    /// Whether a failure of this task is ignored for the host
    #[serde(default)]
    pub ignore_errors: bool,
    /// Override for the changed signal
    #[serde(default, deserialize_with = "de_expr")]
    pub changed_when: Option<String>,
    /// Override for the failed signal
    #[serde(default, deserialize_with = "de_expr")]
    pub failed_when: Option<String>,
}

fn default_loop_var() -> String {
    "item".to_string()
}

fn de_names<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<OneOrMany>::deserialize(deserializer)
        .map(|v| v.map(OneOrMany::into_vec).unwrap_or_default())
}

/// `changed_when: false` is a YAML boolean; accept both booleans and
/// expression strings.
fn de_expr<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Expr {
        Bool(bool),
        Text(String),
    }

    Option::<Expr>::deserialize(deserializer).map(|v| {
        v.map(|expr| match expr {
            Expr::Bool(b) => b.to_string(),
            Expr::Text(s) => s,
        })
    })
}

impl Default for Task {
    fn default() -> Self {
        Self {
            name: String::new(),
            module: String::new(),
            args: IndexMap::new(),
            when: None,
            notify: Vec::new(),
            register: None,
            loop_items: None,
            loop_var: default_loop_var(),
            ignore_errors: false,
            changed_when: None,
            failed_when: None,
        }
    }
}

impl Task {
    /// Create a new task with the given name and module
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            ..Default::default()
        }
    }

    /// Add an argument to the task
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Set the when condition
    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.when = Some(When::Single(condition.into()));
        self
    }

    /// Add a handler to notify
    pub fn notify(mut self, handler: impl Into<String>) -> Self {
        self.notify.push(handler.into());
        self
    }

    /// Set the register variable
    pub fn register(mut self, name: impl Into<String>) -> Self {
        self.register = Some(name.into());
        self
    }

    /// Set loop items
    pub fn loop_over(mut self, items: Vec<JsonValue>) -> Self {
        self.loop_items = Some(items);
        self
    }

    /// Set ignore_errors
    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    /// Set the changed_when override
    pub fn changed_when(mut self, expr: impl Into<String>) -> Self {
        self.changed_when = Some(expr.into());
        self
    }

    /// Set the failed_when override
    pub fn failed_when(mut self, expr: impl Into<String>) -> Self {
        self.failed_when = Some(expr.into());
        self
    }

    /// Display name, falling back to the module name
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.module
        } else {
            &self.name
        }
    }
}

/// A handler: a named reactive task run at most once per host per run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handler {
    /// Handler name (the notification target)
    pub name: String,
    /// Module to execute
    pub module: String,
    /// Module arguments
    #[serde(default)]
    pub args: IndexMap<String, JsonValue>,
    /// Optional when condition
    #[serde(default)]
    pub when: Option<When>,
}

impl Handler {
    /// Create a new handler with the given name and module
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            args: IndexMap::new(),
            when: None,
        }
    }

    /// Add an argument to the handler
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// A play: host selection bound to an ordered task list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Play {
    /// Play name
    #[serde(default)]
    pub name: String,
    /// Host selector pattern (`all`, group, host, comma-joined union)
    pub hosts: String,
    /// Whether to gather facts before running tasks
    #[serde(default = "default_true")]
    pub gather_facts: bool,
    /// Play-scoped variables
    #[serde(default)]
    pub vars: IndexMap<String, JsonValue>,
    /// Lowest-precedence defaults (role defaults)
    #[serde(default)]
    pub defaults: IndexMap<String, JsonValue>,
    /// Ordered tasks
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Handlers available for notification
    #[serde(default)]
    pub handlers: Vec<Handler>,
}

fn default_true() -> bool {
    true
}

impl Play {
    /// Create a new play targeting the given selector
    pub fn new(name: impl Into<String>, hosts: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: hosts.into(),
            gather_facts: true,
            vars: IndexMap::new(),
            defaults: IndexMap::new(),
            tasks: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Append a task
    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Append a handler
    pub fn handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Set a play variable
    pub fn var(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Disable fact gathering for this play
    pub fn without_facts(mut self) -> Self {
        self.gather_facts = false;
        self
    }

    /// Look up a handler by name
    pub fn find_handler(&self, name: &str) -> Option<&Handler> {
        self.handlers.iter().find(|h| h.name == name)
    }

    /// Check structural invariants: every notify target must resolve
    pub fn validate(&self) -> Result<()> {
        if self.hosts.trim().is_empty() {
            return Err(Error::PlaybookValidation(format!(
                "play '{}' has an empty hosts selector",
                self.name
            )));
        }
        for task in &self.tasks {
            if task.module.trim().is_empty() {
                return Err(Error::PlaybookValidation(format!(
                    "task '{}' has no module",
                    task.display_name()
                )));
            }
            for notify in &task.notify {
                if self.find_handler(notify).is_none() {
                    return Err(Error::HandlerNotFound(notify.clone()));
                }
            }
        }
        Ok(())
    }
}

/// A parsed playbook: an ordered list of plays
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Playbook {
    /// Plays in execution order
    pub plays: Vec<Play>,
}

impl Playbook {
    /// Create a playbook from plays
    pub fn new(plays: Vec<Play>) -> Self {
        Self { plays }
    }

    /// Validate every play
    pub fn validate(&self) -> Result<()> {
        for play in &self.plays {
            play.validate()?;
        }
        Ok(())
    }
}

/// Pluggable provider of parsed play definitions.
///
/// The engine never parses raw configuration text itself; a source turns
/// whatever format it owns into [`Playbook`] entities.
pub trait PlaySource: Send + Sync {
    /// Parse and return the playbook
    fn playbook(&self) -> Result<Playbook>;
}

/// YAML-backed playbook source
pub struct YamlPlaybookSource {
    text: String,
    path: Option<std::path::PathBuf>,
}

impl YamlPlaybookSource {
    /// Create a source from YAML text
    pub fn from_str(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            path: None,
        }
    }

    /// Create a source from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::playbook_parse(path, e.to_string()))?;
        Ok(Self {
            text,
            path: Some(path.to_path_buf()),
        })
    }
}

impl PlaySource for YamlPlaybookSource {
    fn playbook(&self) -> Result<Playbook> {
        let plays: Vec<Play> = serde_yaml::from_str(&self.text).map_err(|e| {
            Error::playbook_parse(
                self.path.clone().unwrap_or_else(|| "<inline>".into()),
                e.to_string(),
            )
        })?;
        let playbook = Playbook::new(plays);
        playbook.validate()?;
        Ok(playbook)
    }
}
