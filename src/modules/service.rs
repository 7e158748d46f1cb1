//! Service module - service state management.
//!
//! Converges a service toward started/stopped and optionally toggles its
//! boot enablement. `restarted` is inherently non-idempotent and always
//! reports changed.

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

/// Desired state for a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredServiceState {
    Started,
    Stopped,
    Restarted,
}

impl DesiredServiceState {
    pub fn from_str(s: &str) -> ModuleResult<Self> {
        match s.to_lowercase().as_str() {
            "started" | "running" => Ok(DesiredServiceState::Started),
            "stopped" => Ok(DesiredServiceState::Stopped),
            "restarted" => Ok(DesiredServiceState::Restarted),
            _ => Err(ModuleError::InvalidParameter(format!(
                "Invalid state '{}'. Valid states: started, stopped, restarted",
                s
            ))),
        }
    }
}

/// Module for service management
pub struct ServiceModule;

impl Module for ServiceModule {
    fn name(&self) -> &'static str {
        "service"
    }

    fn description(&self) -> &'static str {
        "Manage service run state and boot enablement"
    }

    fn required_params(&self) -> &[&'static str] {
        &["name"]
    }

    fn apply(&self, params: &ModuleParams, context: &ModuleContext) -> ModuleResult<ModuleOutput> {
        let name = params.get_string_required("name")?;
        let state = params
            .get_string("state")?
            .map(|s| DesiredServiceState::from_str(&s))
            .transpose()?;
        let enabled = params.get_bool("enabled")?;

        if state.is_none() && enabled.is_none() {
            return Err(ModuleError::InvalidParameter(
                "service requires at least one of 'state' or 'enabled'".to_string(),
            ));
        }

        let mut target = context.target.lock();
        let mut changes = Vec::new();

        if let Some(state) = state {
            let running = target.service(&name).map(|s| s.running).unwrap_or(false);
            match state {
                DesiredServiceState::Started if !running => {
                    if !context.check_mode {
                        let svc = target.service_mut(&name);
                        svc.running = true;
                        svc.restarts += 1;
                    }
                    changes.push("started");
                }
                DesiredServiceState::Stopped if running => {
                    if !context.check_mode {
                        target.service_mut(&name).running = false;
                    }
                    changes.push("stopped");
                }
                DesiredServiceState::Restarted => {
                    if !context.check_mode {
                        let svc = target.service_mut(&name);
                        svc.running = true;
                        svc.restarts += 1;
                    }
                    changes.push("restarted");
                }
                _ => {}
            }
        }

        if let Some(enabled) = enabled {
            let current = target.service(&name).map(|s| s.enabled).unwrap_or(false);
            if current != enabled {
                if !context.check_mode {
                    target.service_mut(&name).enabled = enabled;
                }
                changes.push(if enabled { "enabled" } else { "disabled" });
            }
        }

        if changes.is_empty() {
            Ok(ModuleOutput::ok(format!("{} already in desired state", name)))
        } else {
            Ok(ModuleOutput::changed(format!("{} {}", name, changes.join(", "))))
        }
    }
}
