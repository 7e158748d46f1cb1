//! Error types for Converge.
//!
//! This module defines the error types used throughout Converge, providing
//! rich error information for debugging and user feedback.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Converge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies why a module apply could not run at all.
///
/// Ordinary divergence (a module reporting failure) is *not* an execution
/// error; it surfaces as a failed [`TaskResult`](crate::executor::task::TaskResult).
/// Execution errors are reserved for the cases where the apply call itself
/// could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    /// The target host could not be reached.
    Unreachable,
    /// The per-call timeout elapsed before the module returned.
    Timeout,
    /// The module parameters were missing or of the wrong shape.
    MalformedParams,
}

impl std::fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionErrorKind::Unreachable => write!(f, "unreachable"),
            ExecutionErrorKind::Timeout => write!(f, "timeout"),
            ExecutionErrorKind::MalformedParams => write!(f, "malformed parameters"),
        }
    }
}

/// The main error type for Converge.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Variable Errors
    // ========================================================================
    /// A consumer dereferenced a key absent from the merged context.
    #[error("Undefined variable: '{0}'")]
    UndefinedVariable(String),

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Module apply could not run (transport, timeout, malformed params).
    #[error("Execution error ({kind}) for module '{module}' on host '{host}': {message}")]
    Execution {
        /// What prevented the apply from running
        kind: ExecutionErrorKind,
        /// Module name
        module: String,
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// Module reported failure or `failed_when` matched.
    #[error("Task '{task}' failed on host '{host}': {message}")]
    TaskFailed {
        /// Task name
        task: String,
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// Handler execution failed after all regular tasks succeeded.
    #[error("Handler '{handler}' failed on host '{host}': {message}")]
    HandlerFailed {
        /// Handler name
        handler: String,
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Inventory Errors
    // ========================================================================
    /// Error loading inventory.
    #[error("Failed to load inventory from '{path}': {message}")]
    InventoryLoad {
        /// Path to inventory
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Host not found in inventory.
    #[error("Host '{0}' not found in inventory")]
    HostNotFound(String),

    /// Group not found in inventory.
    #[error("Group '{0}' not found in inventory")]
    GroupNotFound(String),

    /// The group hierarchy contains a cycle.
    #[error("Group hierarchy cycle detected involving '{0}'")]
    GroupCycle(String),

    // ========================================================================
    // Playbook Errors
    // ========================================================================
    /// Error parsing a playbook file.
    #[error("Failed to parse playbook '{path}': {message}")]
    PlaybookParse {
        /// Path to the playbook file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Error validating playbook structure.
    #[error("Playbook validation failed: {0}")]
    PlaybookValidation(String),

    /// A task referenced a handler that no play declares.
    #[error("Handler '{0}' not found")]
    HandlerNotFound(String),

    /// Module not found in the registry.
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    // ========================================================================
    // Template Errors
    // ========================================================================
    /// Template rendering error.
    #[error("Template rendering failed for '{template}': {message}")]
    TemplateRender {
        /// Template text or name
        template: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ========================================================================
    // Other Errors
    // ========================================================================
    /// The run was aborted by an operator request.
    #[error("Run aborted by operator")]
    Aborted,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new execution error.
    pub fn execution(
        kind: ExecutionErrorKind,
        module: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Execution {
            kind,
            module: module.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new task failed error.
    pub fn task_failed(
        task: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TaskFailed {
            task: task.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new handler failed error.
    pub fn handler_failed(
        handler: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::HandlerFailed {
            handler: handler.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new playbook parse error.
    pub fn playbook_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PlaybookParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error can be ignored by task-level policy.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            Error::Execution { .. } | Error::TaskFailed { .. } | Error::UndefinedVariable(_)
        )
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::TaskFailed { .. } | Error::HandlerFailed { .. } => 2,
            Error::Execution { .. } => 3,
            Error::PlaybookParse { .. } | Error::PlaybookValidation(_) => 4,
            Error::InventoryLoad { .. } | Error::HostNotFound(_) | Error::GroupCycle(_) => 5,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_display() {
        let err = Error::execution(
            ExecutionErrorKind::Timeout,
            "package",
            "web01",
            "apply exceeded 30s",
        );
        let msg = err.to_string();
        assert!(msg.contains("timeout"));
        assert!(msg.contains("package"));
        assert!(msg.contains("web01"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::task_failed("t", "h", "m").exit_code(), 2);
        assert_eq!(
            Error::execution(ExecutionErrorKind::Unreachable, "m", "h", "down").exit_code(),
            3
        );
        assert_eq!(Error::GroupCycle("web".into()).exit_code(), 5);
    }

    #[test]
    fn test_ignorable() {
        assert!(Error::task_failed("t", "h", "m").is_ignorable());
        assert!(!Error::GroupCycle("g".into()).is_ignorable());
    }
}
