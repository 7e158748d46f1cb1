//! Package module - package state management.
//!
//! Converges the set of installed packages on the target toward the desired
//! state. Already-converged packages report no change.

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

/// Desired state for a package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    Present,
    Absent,
}

impl PackageState {
    pub fn from_str(s: &str) -> ModuleResult<Self> {
        match s.to_lowercase().as_str() {
            "present" | "installed" => Ok(PackageState::Present),
            "absent" | "removed" => Ok(PackageState::Absent),
            _ => Err(ModuleError::InvalidParameter(format!(
                "Invalid state '{}'. Valid states: present, absent",
                s
            ))),
        }
    }
}

/// Module for package management
pub struct PackageModule;

impl Module for PackageModule {
    fn name(&self) -> &'static str {
        "package"
    }

    fn description(&self) -> &'static str {
        "Manage the set of installed packages"
    }

    fn required_params(&self) -> &[&'static str] {
        &["name"]
    }

    fn apply(&self, params: &ModuleParams, context: &ModuleContext) -> ModuleResult<ModuleOutput> {
        let names = params
            .get_vec_string("name")?
            .ok_or_else(|| ModuleError::MissingParameter("name".to_string()))?;
        let state = match params.get_string("state")? {
            Some(s) => PackageState::from_str(&s)?,
            None => PackageState::Present,
        };

        let mut target = context.target.lock();
        let mut converged = Vec::new();

        for name in &names {
            let divergent = match state {
                PackageState::Present => !target.has_package(name),
                PackageState::Absent => target.has_package(name),
            };
            if !divergent {
                continue;
            }
            if !context.check_mode {
                match state {
                    PackageState::Present => target.install_package(name),
                    PackageState::Absent => target.remove_package(name),
                };
            }
            converged.push(name.clone());
        }

        if converged.is_empty() {
            let verb = match state {
                PackageState::Present => "installed",
                PackageState::Absent => "absent",
            };
            return Ok(ModuleOutput::ok(format!(
                "{} already {}",
                names.join(", "),
                verb
            )));
        }

        let verb = match (state, context.check_mode) {
            (PackageState::Present, false) => "installed",
            (PackageState::Present, true) => "would install",
            (PackageState::Absent, false) => "removed",
            (PackageState::Absent, true) => "would remove",
        };
        Ok(ModuleOutput::changed(format!("{} {}", verb, converged.join(", ")))
            .with_data("packages", serde_json::json!(converged)))
    }
}
