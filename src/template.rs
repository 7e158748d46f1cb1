//! Template rendering collaborator.
//!
//! The engine treats rendering as an external pure function: text plus a
//! variable map in, text out. Backed by minijinja with strict undefined
//! behavior, so dereferencing a variable absent from the merged context
//! surfaces as [`Error::UndefinedVariable`] unless the template supplies a
//! default (`{{ port | default(80) }}`).

use indexmap::IndexMap;
use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::vars;

/// Render template text against a variable map.
pub fn render_str(text: &str, variables: &IndexMap<String, JsonValue>) -> Result<String> {
    // Plain text needs no environment at all
    if !text.contains("{{") && !text.contains("{%") {
        return Ok(text.to_string());
    }

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    let ctx = minijinja::Value::from_serialize(variables);
    env.render_str(text, ctx).map_err(|err| {
        if err.kind() == minijinja::ErrorKind::UndefinedError {
            Error::UndefinedVariable(
                err.detail().map(String::from).unwrap_or_else(|| text.to_string()),
            )
        } else {
            Error::TemplateRender {
                template: text.to_string(),
                message: err.to_string(),
            }
        }
    })
}

/// Render every string inside a JSON value tree.
///
/// A string that is exactly one `{{ path }}` expression resolves to the
/// referenced value itself, preserving its type; anything else renders to a
/// string.
pub fn render_value(value: &JsonValue, variables: &IndexMap<String, JsonValue>) -> Result<JsonValue> {
    match value {
        JsonValue::String(text) => {
            if let Some(path) = sole_expression(text) {
                if let Some(resolved) = vars::lookup_path(variables, path) {
                    return Ok(resolved.clone());
                }
            }
            Ok(JsonValue::String(render_str(text, variables)?))
        }
        JsonValue::Array(items) => Ok(JsonValue::Array(
            items
                .iter()
                .map(|item| render_value(item, variables))
                .collect::<Result<Vec<_>>>()?,
        )),
        JsonValue::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                rendered.insert(key.clone(), render_value(item, variables)?);
            }
            Ok(JsonValue::Object(rendered))
        }
        _ => Ok(value.clone()),
    }
}

/// Render all values of a parameter map.
pub fn render_params(
    params: &IndexMap<String, JsonValue>,
    variables: &IndexMap<String, JsonValue>,
) -> Result<IndexMap<String, JsonValue>> {
    let mut rendered = IndexMap::with_capacity(params.len());
    for (key, value) in params {
        rendered.insert(key.clone(), render_value(value, variables)?);
    }
    Ok(rendered)
}

/// If `text` is exactly one `{{ path }}` expression over a dotted
/// identifier, return the path.
fn sole_expression(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?.trim();
    let is_path = !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    is_path.then_some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx() -> IndexMap<String, JsonValue> {
        let mut vars = IndexMap::new();
        vars.insert("pkg".to_string(), json!("nginx"));
        vars.insert("port".to_string(), json!(8080));
        vars.insert("item".to_string(), json!({"name": "alice", "uid": 1001}));
        vars
    }

    #[test]
    fn test_render_plain_passthrough() {
        assert_eq!(render_str("no templates here", &ctx()).unwrap(), "no templates here");
    }

    #[test]
    fn test_render_interpolation() {
        assert_eq!(
            render_str("install {{ pkg }} on :{{ port }}", &ctx()).unwrap(),
            "install nginx on :8080"
        );
    }

    #[test]
    fn test_undefined_variable_errors() {
        let err = render_str("{{ missing }}", &ctx()).unwrap_err();
        assert!(matches!(err, Error::UndefinedVariable(_)));
    }

    #[test]
    fn test_default_filter_recovers() {
        assert_eq!(
            render_str("{{ missing | default('fallback') }}", &ctx()).unwrap(),
            "fallback"
        );
    }

    #[test]
    fn test_sole_expression_preserves_type() {
        let rendered = render_value(&json!("{{ port }}"), &ctx()).unwrap();
        assert_eq!(rendered, json!(8080));

        let rendered = render_value(&json!("{{ item.uid }}"), &ctx()).unwrap();
        assert_eq!(rendered, json!(1001));
    }

    #[test]
    fn test_render_params_nested() {
        let mut params = IndexMap::new();
        params.insert("name".to_string(), json!("{{ item.name }}"));
        params.insert("labels".to_string(), json!(["{{ pkg }}", "static"]));

        let rendered = render_params(&params, &ctx()).unwrap();
        assert_eq!(rendered.get("name"), Some(&json!("alice")));
        assert_eq!(rendered.get("labels"), Some(&json!(["nginx", "static"])));
    }
}
