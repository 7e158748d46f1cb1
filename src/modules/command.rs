//! Command module - raw command execution.
//!
//! Commands are not idempotent by themselves; every run is recorded in the
//! target's journal and reported as changed. The `creates` parameter opts a
//! command into change detection: when the named file already exists on the
//! target, the command is not run.

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

/// Module for command execution
pub struct CommandModule;

impl Module for CommandModule {
    fn name(&self) -> &'static str {
        "command"
    }

    fn description(&self) -> &'static str {
        "Run a command on the target"
    }

    fn required_params(&self) -> &[&'static str] {
        &["cmd"]
    }

    fn apply(&self, params: &ModuleParams, context: &ModuleContext) -> ModuleResult<ModuleOutput> {
        let cmd = params.get_string_required("cmd")?;
        let creates = params.get_string("creates")?;

        let mut target = context.target.lock();

        if let Some(ref marker) = creates {
            if target.file(marker).is_some() {
                return Ok(ModuleOutput::ok(format!(
                    "skipped, {} already exists",
                    marker
                ))
                .with_command_output(None, None, Some(0)));
            }
        }

        if context.check_mode {
            return Ok(ModuleOutput::ok(format!("would run: {}", cmd)));
        }

        target.record_command(&cmd);
        if let Some(marker) = creates {
            target.write_file(&marker, "", None);
        }

        // The simulated shell understands just enough for registered output
        let stdout = cmd
            .strip_prefix("echo ")
            .map(|rest| rest.trim_matches('"').to_string())
            .unwrap_or_default();

        Ok(ModuleOutput::changed(format!("ran: {}", cmd)).with_command_output(
            Some(stdout),
            Some(String::new()),
            Some(0),
        ))
    }
}
