//! Assert module - verify expectations about the run.
//!
//! Evaluates one or more condition expressions against the host's merged
//! variables and facts; the first false expression fails the task with its
//! text (or a custom message).

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt};
use crate::executor::condition::{ConditionContext, ConditionEvaluator};

/// Module for asserting conditions
pub struct AssertModule;

impl Module for AssertModule {
    fn name(&self) -> &'static str {
        "assert"
    }

    fn description(&self) -> &'static str {
        "Fail the task unless all given expressions hold"
    }

    fn required_params(&self) -> &[&'static str] {
        &["that"]
    }

    fn apply(&self, params: &ModuleParams, context: &ModuleContext) -> ModuleResult<ModuleOutput> {
        let expressions = params
            .get_vec_string("that")?
            .ok_or_else(|| ModuleError::MissingParameter("that".to_string()))?;
        let custom_msg = params.get_string("msg")?;

        let mut variables = context.vars.clone();
        for (key, value) in context.facts.all() {
            variables.insert(key.clone(), value.clone());
        }
        let cond_ctx = ConditionContext::with_variables(variables);
        let evaluator = ConditionEvaluator::new();

        for expr in &expressions {
            let holds = evaluator
                .evaluate(expr, &cond_ctx)
                .map_err(ModuleError::InvalidParameter)?;
            if !holds {
                let msg = custom_msg
                    .clone()
                    .unwrap_or_else(|| format!("assertion failed: {}", expr));
                return Ok(ModuleOutput::failed(msg));
            }
        }

        Ok(ModuleOutput::ok(format!(
            "all {} assertion(s) passed",
            expressions.len()
        )))
    }
}
