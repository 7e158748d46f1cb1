//! Debug module - print a message or a variable.
//!
//! Purely informational; never changes the target and never fails unless
//! asked to print an undefined variable.

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};
use crate::vars;

/// Module for printing debug output
pub struct DebugModule;

impl Module for DebugModule {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn description(&self) -> &'static str {
        "Print a message or variable value during execution"
    }

    fn apply(&self, params: &ModuleParams, context: &ModuleContext) -> ModuleResult<ModuleOutput> {
        if let Some(var) = params.get_string("var")? {
            let value = vars::lookup_path(&context.vars, &var)
                .cloned()
                .or_else(|| context.facts.lookup_path(&var).cloned());
            return Ok(match value {
                Some(value) => ModuleOutput::ok(format!("{} = {}", var, value))
                    .with_data(var, value),
                None => ModuleOutput::ok(format!("{} is not defined", var)),
            });
        }

        let msg = params
            .get_string("msg")?
            .unwrap_or_else(|| "Hello world!".to_string());
        Ok(ModuleOutput::ok(msg))
    }
}
