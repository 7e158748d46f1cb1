//! Condition evaluation for `when`, `changed_when`, and `failed_when`.
//!
//! Expressions are deliberately small: boolean literals, variable and fact
//! references (dotted paths), `defined()`/`undefined()`, `not`, `==`/`!=`
//! comparisons, and flat `and`/`or` chains. A reference to a missing key
//! evaluates to false rather than erroring, so a play with fact gathering
//! disabled still runs deterministically.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::vars;

/// Task result fields exposed to `changed_when`/`failed_when` expressions
#[derive(Debug, Clone, Default)]
pub struct TaskResultContext {
    /// Return code of the command (if applicable)
    pub rc: Option<i32>,
    /// Standard output
    pub stdout: Option<String>,
    /// Standard error
    pub stderr: Option<String>,
    /// Whether the task reported a change
    pub changed: bool,
    /// Whether the task failed
    pub failed: bool,
}

/// Context for condition evaluation.
#[derive(Debug, Clone, Default)]
pub struct ConditionContext {
    /// Variables (merged context, facts, registered results) for lookups
    pub variables: IndexMap<String, JsonValue>,
    /// The result of the current task (if available)
    pub task_result: Option<TaskResultContext>,
}

impl ConditionContext {
    /// Create a new empty condition context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with variables
    pub fn with_variables(variables: IndexMap<String, JsonValue>) -> Self {
        Self {
            variables,
            task_result: None,
        }
    }

    /// Set task result context
    pub fn with_task_result(mut self, result: TaskResultContext) -> Self {
        self.task_result = Some(result);
        self
    }

    /// Resolve a dotted path; task-result fields shadow variables when a
    /// task result is present.
    pub fn get(&self, path: &str) -> Option<JsonValue> {
        if let Some(ref result) = self.task_result {
            match path {
                "rc" => return result.rc.map(|rc| JsonValue::from(rc)),
                "stdout" => return result.stdout.clone().map(JsonValue::from),
                "stderr" => return result.stderr.clone().map(JsonValue::from),
                "changed" => return Some(JsonValue::from(result.changed)),
                "failed" => return Some(JsonValue::from(result.failed)),
                _ => {}
            }
        }
        vars::lookup_path(&self.variables, path).cloned()
    }

    /// Check if a path resolves to a value
    pub fn is_defined(&self, path: &str) -> bool {
        self.get(path).is_some()
    }
}

/// Evaluator for condition expressions.
#[derive(Debug, Default)]
pub struct ConditionEvaluator {
    /// Fail on unresolvable expressions instead of treating them as false
    pub strict_mode: bool,
}

impl ConditionEvaluator {
    /// Create a new condition evaluator
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an evaluator with strict mode enabled
    pub fn strict() -> Self {
        Self { strict_mode: true }
    }

    /// Evaluate an expression against the given context
    pub fn evaluate(&self, expr: &str, ctx: &ConditionContext) -> Result<bool, String> {
        let expr = expr.trim();

        // Empty condition means unconditional
        if expr.is_empty() {
            return Ok(true);
        }

        // Flat boolean connectives, no parenthesis grouping
        if expr.contains(" or ") {
            for part in expr.split(" or ") {
                if self.evaluate(part, ctx)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        if expr.contains(" and ") {
            for part in expr.split(" and ") {
                if !self.evaluate(part, ctx)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }

        if let Some(inner) = expr.strip_prefix("not ") {
            return self.evaluate(inner.trim(), ctx).map(|v| !v);
        }

        match expr.to_lowercase().as_str() {
            "true" | "yes" => return Ok(true),
            "false" | "no" => return Ok(false),
            _ => {}
        }

        // Comparisons
        for op in ["==", "!="] {
            if let Some((lhs, rhs)) = expr.split_once(op) {
                let lhs = self.term(lhs.trim(), ctx);
                let rhs = self.term(rhs.trim(), ctx);
                let equal = match (lhs, rhs) {
                    (Some(a), Some(b)) => values_equal(&a, &b),
                    _ => {
                        if self.strict_mode {
                            return Err(format!("unresolvable comparison: {}", expr));
                        }
                        // Missing operand: == is false, != is true
                        return Ok(op == "!=");
                    }
                };
                return Ok(if op == "==" { equal } else { !equal });
            }
        }

        // defined() / undefined() checks
        if let Some(inner) = expr.strip_prefix("defined(").and_then(|s| s.strip_suffix(')')) {
            return Ok(ctx.is_defined(inner.trim()));
        }
        if let Some(inner) = expr
            .strip_prefix("undefined(")
            .and_then(|s| s.strip_suffix(')'))
        {
            return Ok(!ctx.is_defined(inner.trim()));
        }

        // Bare reference: truthiness of the value, Missing is false
        if let Some(value) = ctx.get(expr) {
            return Ok(is_truthy(&value));
        }

        if self.strict_mode {
            Err(format!("unable to evaluate expression: {}", expr))
        } else {
            Ok(false)
        }
    }

    /// Parse one comparison operand: a literal or a path lookup
    fn term(&self, raw: &str, ctx: &ConditionContext) -> Option<JsonValue> {
        if (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
            || (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
        {
            return Some(JsonValue::from(raw[1..raw.len() - 1].to_string()));
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Some(JsonValue::from(n));
        }
        if let Ok(f) = raw.parse::<f64>() {
            return Some(JsonValue::from(f));
        }
        match raw {
            "true" => return Some(JsonValue::from(true)),
            "false" => return Some(JsonValue::from(false)),
            _ => {}
        }
        ctx.get(raw)
    }
}

/// Compare two JSON values, coercing numbers to f64 so `8080 == 8080.0`
fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Check if a JSON value is truthy
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        JsonValue::String(s) => !s.is_empty() && s.to_lowercase() != "false" && s != "0",
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ConditionContext {
        let mut vars = IndexMap::new();
        vars.insert("env".to_string(), json!("production"));
        vars.insert("port".to_string(), json!(8080));
        vars.insert("features".to_string(), json!({"tls": true, "spdy": false}));
        ConditionContext::with_variables(vars)
    }

    #[test]
    fn test_literals() {
        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate("true", &ctx()).unwrap());
        assert!(!eval.evaluate("false", &ctx()).unwrap());
        assert!(eval.evaluate("", &ctx()).unwrap());
    }

    #[test]
    fn test_bare_reference_truthiness() {
        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate("env", &ctx()).unwrap());
        assert!(eval.evaluate("features.tls", &ctx()).unwrap());
        assert!(!eval.evaluate("features.spdy", &ctx()).unwrap());
    }

    #[test]
    fn test_missing_is_false_not_error() {
        let eval = ConditionEvaluator::new();
        assert!(!eval.evaluate("ghost", &ctx()).unwrap());
        assert!(!eval.evaluate("features.h3", &ctx()).unwrap());
    }

    #[test]
    fn test_strict_mode_errors_on_missing() {
        let eval = ConditionEvaluator::strict();
        assert!(eval.evaluate("ghost", &ctx()).is_err());
    }

    #[test]
    fn test_comparisons() {
        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate("env == 'production'", &ctx()).unwrap());
        assert!(eval.evaluate("env != 'staging'", &ctx()).unwrap());
        assert!(eval.evaluate("port == 8080", &ctx()).unwrap());
        assert!(!eval.evaluate("port == 80", &ctx()).unwrap());
        // Missing operand: equality is false, inequality true
        assert!(!eval.evaluate("ghost == 'x'", &ctx()).unwrap());
        assert!(eval.evaluate("ghost != 'x'", &ctx()).unwrap());
    }

    #[test]
    fn test_defined_checks() {
        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate("defined(env)", &ctx()).unwrap());
        assert!(!eval.evaluate("defined(ghost)", &ctx()).unwrap());
        assert!(eval.evaluate("undefined(ghost)", &ctx()).unwrap());
    }

    #[test]
    fn test_connectives() {
        let eval = ConditionEvaluator::new();
        assert!(eval
            .evaluate("env == 'production' and port == 8080", &ctx())
            .unwrap());
        assert!(!eval
            .evaluate("env == 'production' and port == 80", &ctx())
            .unwrap());
        assert!(eval
            .evaluate("port == 80 or env == 'production'", &ctx())
            .unwrap());
        assert!(eval.evaluate("not features.spdy", &ctx()).unwrap());
    }

    #[test]
    fn test_task_result_fields() {
        let eval = ConditionEvaluator::new();
        let ctx = ctx().with_task_result(TaskResultContext {
            rc: Some(2),
            stdout: Some("WARN".to_string()),
            changed: true,
            ..Default::default()
        });

        assert!(eval.evaluate("rc == 2", &ctx).unwrap());
        assert!(eval.evaluate("rc != 0", &ctx).unwrap());
        assert!(eval.evaluate("stdout == 'WARN'", &ctx).unwrap());
        assert!(eval.evaluate("changed", &ctx).unwrap());
        assert!(!eval.evaluate("failed", &ctx).unwrap());
    }
}
