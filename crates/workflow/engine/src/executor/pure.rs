//! Expression-only executors: condition, loop and data transform
//!
//! These never perform I/O and never suspend.

use super::{StepContext, StepOutcome};
use serde_json::{Map, Value};
use workflow_dsl::truthy;
use workflow_types::{StepError, Transform};

fn eval(ctx: &StepContext, source: &str, scope: &Value) -> StepOutcome {
    ctx.graph
        .evaluate(source, scope)
        .map_err(|e| StepError::expression(format!("{}: {}", source, e)))
}

/// Evaluate a boolean expression; the output is the boolean
pub fn condition(expression: &str, ctx: &StepContext) -> StepOutcome {
    let value = eval(ctx, expression, &ctx.scope)?;
    Ok(Value::Bool(truthy(&value)))
}

/// Map each element of `items` through `map`, with `item` and `index` in scope
pub fn map_items(items: &str, map: Option<&str>, ctx: &StepContext) -> StepOutcome {
    let list = match eval(ctx, items, &ctx.scope)? {
        Value::Array(list) => list,
        Value::Null => Vec::new(),
        other => {
            return Err(StepError::expression(format!(
                "loop items must be an array, got {}",
                other
            )))
        }
    };

    let Some(map) = map else {
        return Ok(Value::Array(list));
    };

    list.into_iter()
        .enumerate()
        .map(|(index, item)| {
            let scope = ctx.scope_with([("item", item), ("index", Value::from(index))]);
            eval(ctx, map, &scope)
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

/// Reshape data already in the context
pub fn transform(transform: &Transform, ctx: &StepContext) -> StepOutcome {
    match transform {
        Transform::Identity => Ok(ctx.input.clone()),
        Transform::Expression { expression } => eval(ctx, expression, &ctx.scope),
        Transform::Collect { from } => {
            let outputs = ctx.scope.get("steps");
            let collected: Map<String, Value> = from
                .iter()
                .map(|id| {
                    let value = outputs
                        .and_then(|o| o.get(id.as_str()))
                        .cloned()
                        .unwrap_or(Value::Null);
                    (id.0.clone(), value)
                })
                .collect();
            Ok(Value::Object(collected))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::context;
    use serde_json::json;
    use workflow_types::{ErrorKind, StepId, StepKind, StepSpec};

    #[test]
    fn test_condition() {
        let step = StepSpec::condition("check", "input.score > 5");
        let ctx = context(&step, json!(null), json!({"input": {"score": 7}}));
        assert_eq!(condition("input.score > 5", &ctx).unwrap(), json!(true));
    }

    #[test]
    fn test_loop_maps_items() {
        let step = StepSpec::new(
            "double",
            StepKind::Loop {
                items: "numbers".into(),
                map: Some("item * 2 + index".into()),
            },
        );
        let ctx = context(&step, json!(null), json!({"numbers": [1, 2, 3]}));
        assert_eq!(
            map_items("numbers", Some("item * 2 + index"), &ctx).unwrap(),
            json!([2, 5, 8])
        );
    }

    #[test]
    fn test_loop_rejects_non_array() {
        let step = StepSpec::new(
            "each",
            StepKind::Loop {
                items: "name".into(),
                map: None,
            },
        );
        let ctx = context(&step, json!(null), json!({"name": "x"}));
        let err = map_items("name", None, &ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Expression);
    }

    #[test]
    fn test_collect_transform() {
        let transform = Transform::Collect {
            from: vec![StepId::new("a"), StepId::new("missing")],
        };
        let step = StepSpec::transform("join", transform.clone());
        let ctx = context(&step, json!(null), json!({"steps": {"a": 1, "b": 2}}));
        assert_eq!(
            super::transform(&transform, &ctx).unwrap(),
            json!({"a": 1, "missing": null})
        );
    }

    #[test]
    fn test_expression_error_is_not_retryable() {
        let step = StepSpec::condition("check", "unknown_var > 1");
        let ctx = context(&step, json!(null), json!({}));
        let err = condition("unknown_var > 1", &ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Expression);
        assert!(!err.is_retryable());
    }
}
