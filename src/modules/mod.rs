//! Module system for Converge.
//!
//! Modules are the units of idempotent desired-state enforcement. Each one
//! covers the same capability set: describe the desired state from its
//! parameters, compare it to the target's actual state, mutate only on
//! divergence, and report whether anything changed. Invoking a module twice
//! with identical parameters against a converged target must report
//! `changed=false` the second time; that idempotence contract is the central
//! correctness property of the engine.

pub mod assert;
pub mod command;
pub mod copy;
pub mod debug;
pub mod package;
pub mod service;
pub mod set_fact;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::facts::{FactStore, Facts};
use crate::target::TargetHandle;

/// Errors a module can raise for malformed invocations.
///
/// Ordinary divergence failure is reported through
/// [`ModuleOutput::failed`], never as an error.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for module operations
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Result of a module apply
#[derive(Debug, Clone)]
pub struct ModuleOutput {
    /// Whether the module changed anything
    pub changed: bool,
    /// Whether the module reported failure (ordinary divergence failure)
    pub failed: bool,
    /// Human-readable message about what happened
    pub msg: String,
    /// Standard output (for command modules)
    pub stdout: Option<String>,
    /// Standard error (for command modules)
    pub stderr: Option<String>,
    /// Return code (for command modules)
    pub rc: Option<i32>,
    /// Additional data returned by the module
    pub data: HashMap<String, JsonValue>,
}

impl ModuleOutput {
    /// Successful apply with no changes needed
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            changed: false,
            failed: false,
            msg: msg.into(),
            stdout: None,
            stderr: None,
            rc: None,
            data: HashMap::new(),
        }
    }

    /// Successful apply that mutated the target
    pub fn changed(msg: impl Into<String>) -> Self {
        Self {
            changed: true,
            ..Self::ok(msg)
        }
    }

    /// The module could not converge the target
    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            failed: true,
            ..Self::ok(msg)
        }
    }

    /// Add data to the output
    pub fn with_data(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Add stdout/stderr/rc for command outputs
    pub fn with_command_output(
        mut self,
        stdout: Option<String>,
        stderr: Option<String>,
        rc: Option<i32>,
    ) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self.rc = rc;
        self
    }
}

/// Parameters passed to a module (already rendered by the task engine)
pub type ModuleParams = IndexMap<String, JsonValue>;

/// Context for one module apply
#[derive(Clone)]
pub struct ModuleContext {
    /// The host being converged
    pub host: String,
    /// Whether to run in check mode (report without mutating)
    pub check_mode: bool,
    /// Merged variables visible to the module
    pub vars: IndexMap<String, JsonValue>,
    /// Fact snapshot for the host
    pub facts: Facts,
    /// Handle to the host's actual state
    pub target: TargetHandle,
    /// Fact store, for modules that publish facts mid-run
    pub fact_store: Arc<FactStore>,
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("host", &self.host)
            .field("check_mode", &self.check_mode)
            .field("vars", &self.vars.len())
            .finish()
    }
}

/// Trait that all modules must implement
pub trait Module: Send + Sync {
    /// Returns the name of the module
    fn name(&self) -> &'static str;

    /// Returns a description of what the module does
    fn description(&self) -> &'static str;

    /// Returns the list of required parameters
    fn required_params(&self) -> &[&'static str] {
        &[]
    }

    /// Validate the parameters before execution
    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        let _ = params;
        Ok(())
    }

    /// Apply the desired state described by `params` to the target.
    ///
    /// When `context.check_mode` is set the module must report what would
    /// change without mutating anything.
    fn apply(&self, params: &ModuleParams, context: &ModuleContext)
        -> ModuleResult<ModuleOutput>;
}

/// Helper trait for extracting parameters
pub trait ParamExt {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>>;
    fn get_string_required(&self, key: &str) -> ModuleResult<String>;
    fn get_bool(&self, key: &str) -> ModuleResult<Option<bool>>;
    fn get_bool_or(&self, key: &str, default: bool) -> bool;
    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>>;
}

impl ParamExt for ModuleParams {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>> {
        match self.get(key) {
            Some(JsonValue::String(s)) => Ok(Some(s.clone())),
            Some(JsonValue::Null) | None => Ok(None),
            Some(v) => Ok(Some(v.to_string().trim_matches('"').to_string())),
        }
    }

    fn get_string_required(&self, key: &str) -> ModuleResult<String> {
        self.get_string(key)?
            .ok_or_else(|| ModuleError::MissingParameter(key.to_string()))
    }

    fn get_bool(&self, key: &str) -> ModuleResult<Option<bool>> {
        match self.get(key) {
            Some(JsonValue::Bool(b)) => Ok(Some(*b)),
            Some(JsonValue::String(s)) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(Some(true)),
                "false" | "no" | "0" | "off" => Ok(Some(false)),
                _ => Err(ModuleError::InvalidParameter(format!(
                    "{} must be a boolean",
                    key
                ))),
            },
            Some(JsonValue::Null) | None => Ok(None),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be a boolean",
                key
            ))),
        }
    }

    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).ok().flatten().unwrap_or(default)
    }

    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>> {
        match self.get(key) {
            Some(JsonValue::Array(arr)) => {
                let mut result = Vec::new();
                for item in arr {
                    match item {
                        JsonValue::String(s) => result.push(s.clone()),
                        v => result.push(v.to_string().trim_matches('"').to_string()),
                    }
                }
                Ok(Some(result))
            }
            // A single string is a one-element list
            Some(JsonValue::String(s)) => Ok(Some(vec![s.clone()])),
            Some(JsonValue::Null) | None => Ok(None),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be a string or an array",
                key
            ))),
        }
    }
}

/// Registry for looking up modules by name
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Create a registry with all built-in modules
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(package::PackageModule));
        registry.register(Arc::new(service::ServiceModule));
        registry.register(Arc::new(command::CommandModule));
        registry.register(Arc::new(copy::CopyModule));
        registry.register(Arc::new(debug::DebugModule));
        registry.register(Arc::new(assert::AssertModule));
        registry.register(Arc::new(set_fact::SetFactModule));
        registry
    }

    /// Register a module
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Get a module by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    /// Check if a module exists
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Get all module names
    pub fn names(&self) -> Vec<&str> {
        self.modules.keys().map(|s| s.as_str()).collect()
    }

    /// Apply a module by name
    pub fn apply(
        &self,
        name: &str,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let module = self
            .get(name)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;

        for param in module.required_params() {
            if !params.contains_key(*param) {
                return Err(ModuleError::MissingParameter((*param).to_string()));
            }
        }
        module.validate_params(params)?;

        module.apply(params, context)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
