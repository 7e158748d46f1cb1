//! Set-fact module - publish host facts mid-run.
//!
//! Every parameter becomes a fact on the executing host's snapshot,
//! visible to later tasks' conditions and templates. Facts set this way
//! overlay gathered facts.

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult};

/// Module for setting facts
pub struct SetFactModule;

impl Module for SetFactModule {
    fn name(&self) -> &'static str {
        "set_fact"
    }

    fn description(&self) -> &'static str {
        "Set host facts for the remainder of the run"
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        if params.is_empty() {
            return Err(ModuleError::MissingParameter(
                "set_fact requires at least one key".to_string(),
            ));
        }
        Ok(())
    }

    fn apply(&self, params: &ModuleParams, context: &ModuleContext) -> ModuleResult<ModuleOutput> {
        for (key, value) in params {
            context
                .fact_store
                .set_fact(&context.host, key.clone(), value.clone());
        }
        Ok(ModuleOutput::ok(format!("set {} fact(s)", params.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_support;
    use serde_json::json;

    #[test]
    fn test_set_fact_lands_in_store() {
        let (ctx, _pool) = test_support::context("h1");
        let mut p = ModuleParams::new();
        p.insert("deploy_color".to_string(), json!("green"));

        let out = SetFactModule.apply(&p, &ctx).unwrap();
        assert!(!out.changed);
        assert_eq!(
            ctx.fact_store.get("h1", "deploy_color"),
            Some(json!("green"))
        );
    }

    #[test]
    fn test_empty_params_rejected() {
        let err = SetFactModule.validate_params(&ModuleParams::new()).unwrap_err();
        assert!(matches!(err, ModuleError::MissingParameter(_)));
    }
}
