//! # Converge - A Declarative Configuration-State Reconciliation Engine
//!
//! Converge drives a fleet of hosts toward declared desired state. It is
//! async-first and type-safe: inventory resolution, variable precedence,
//! idempotent module application, conditional and looped task execution,
//! and deferred handler flushing, with per-host failure isolation.
//!
//! ## Core Concepts
//!
//! - **Inventory**: Hosts organized into hierarchical groups with variables
//! - **Playbooks**: Plays binding a host selector to an ordered task list
//! - **Modules**: Idempotent units of desired-state enforcement
//! - **Tasks**: Individual units of execution that invoke modules
//! - **Handlers**: Deferred tasks triggered by change notifications
//! - **Facts**: Discovered runtime properties of a host
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      CLI Interface                      │
//! │                (clap-based command parsing)             │
//! └─────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Executor                          │
//! │      (per-host workers under a bounded fan-out)         │
//! └─────────────────────────────────────────────────────────┘
//!          │                  │                  │
//!          ▼                  ▼                  ▼
//! ┌───────────────┐  ┌────────────────┐  ┌────────────────┐
//! │   Inventory   │  │ Module Registry│  │ Template Engine│
//! │ (hosts+groups)│  │  (built-ins +  │  │  (minijinja)   │
//! │               │  │    custom)     │  │                │
//! └───────────────┘  └────────────────┘  └────────────────┘
//!          │                  │                  │
//!          └──────────────────┼──────────────────┘
//!                             ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Target State                        │
//! │        (per-host actual state being converged)          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use converge::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let source = YamlInventorySource::from_file("inventory.yml")?;
//!     let inventory = Inventory::from_source(&source)?;
//!
//!     let playbook = YamlPlaybookSource::from_file("site.yml")?.playbook()?;
//!
//!     let executor = Executor::new(inventory).with_options(RunOptions {
//!         forks: 10,
//!         ..Default::default()
//!     });
//!
//!     let report = executor.run_playbook(&playbook).await?;
//!     std::process::exit(report.exit_code());
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Error handling
    pub use crate::error::{Error, ExecutionErrorKind, Result};

    // Execution engine
    pub use crate::executor::task::{TaskResult, TaskStatus};
    pub use crate::executor::{Executor, HostRecap, RunOptions, RunReport};

    // Facts system
    pub use crate::facts::{FactStore, Facts};

    // Handlers
    pub use crate::handlers::HandlerQueue;

    // Inventory
    pub use crate::inventory::{Group, Host, Inventory, InventorySource, YamlInventorySource};

    // Module system
    pub use crate::modules::{
        Module, ModuleContext, ModuleOutput, ModuleParams, ModuleRegistry,
    };

    // Playbooks
    pub use crate::playbook::{
        Handler, Play, PlaySource, Playbook, Task, YamlPlaybookSource,
    };

    // Target state
    pub use crate::target::{TargetPool, TargetState};

    // Variables
    pub use crate::vars::{VarPrecedence, VarStore, VariableContext};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases for Converge operations.
///
/// This module provides the main [`Error`](error::Error) enum that covers
/// the engine's failure taxonomy: undefined variables, execution errors
/// (unreachable, timeout, malformed parameters), task and handler
/// failures, and inventory/playbook structural errors.
pub mod error;

/// Variable management and precedence handling.
///
/// Merges the six variable sources (role defaults, inventory vars, group
/// vars, host vars, play vars, extra vars) into one immutable context per
/// host, last writer winning per key.
pub mod vars;

// ============================================================================
// Playbook Components
// ============================================================================

/// Handler notification queue.
///
/// Handlers are deferred tasks that only run when notified by a changed
/// task. Notifications are deduplicated per host per run and flushed in
/// first-notification order after the regular tasks finish.
pub mod handlers;

/// Playbook parsing and representation.
///
/// Plays, tasks, and handlers, plus the pluggable [`PlaySource`](playbook::PlaySource)
/// collaborator that turns declarative text into those entities.
pub mod playbook;

// ============================================================================
// Infrastructure
// ============================================================================

/// Fact gathering and per-run storage.
///
/// Facts are gathered at most once per run per host and queried read-only
/// through dotted paths with a Missing sentinel.
pub mod facts;

/// Host and group inventory management.
///
/// Hierarchical groups with cycle validation, pattern-based host
/// selection, and the pluggable [`InventorySource`](inventory::InventorySource)
/// collaborator.
pub mod inventory;

/// Simulated per-host target state.
///
/// The actual state the modules converge: packages, services, files, and a
/// command journal, plus reachability and latency knobs.
pub mod target;

// ============================================================================
// Execution Engine
// ============================================================================

/// Core reconciliation engine.
///
/// The [`Executor`](executor::Executor) selects hosts, resolves variables,
/// gathers facts, runs each host's task sequence on its own worker under a
/// bounded fan-out, flushes handlers, and aggregates a
/// [`RunReport`](executor::RunReport). Failures stay scoped to their host.
pub mod executor;

// ============================================================================
// Modules (Built-in task implementations)
// ============================================================================

/// Built-in module implementations.
///
/// - **State management**: `package`, `service`, `copy`
/// - **Command execution**: `command`
/// - **Logic/utility**: `debug`, `assert`, `set_fact`
///
/// Custom modules implement the [`Module`](modules::Module) trait and are
/// registered into a [`ModuleRegistry`](modules::ModuleRegistry).
pub mod modules;

// ============================================================================
// Templating
// ============================================================================

/// Template rendering collaborator (minijinja-backed).
///
/// The engine treats rendering as a pure function over the merged variable
/// map; parameter values and loop elements are substituted through it.
pub mod template;

// ============================================================================
// Reporting and Output
// ============================================================================

/// Output formatting for run reports.
pub mod output;

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of Converge.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
