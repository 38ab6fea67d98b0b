//! Evaluator: reduces a syntax tree against a JSON scope
//!
//! Identifiers resolve against the top-level keys of the scope object.
//! Member access and indexing on missing keys yield `null` rather than an
//! error, so guards like `output.accepted == true` work on partial data.

use crate::errors::{DslError, DslResult};
use crate::parser::{BinaryOp, Expr, UnaryOp};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

/// Evaluate `expr` with identifiers bound from `scope`
pub fn evaluate(expr: &Expr, scope: &Value) -> DslResult<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| DslError::UnknownIdentifier(name.clone())),
        Expr::Member(target, name) => {
            let target = evaluate(target, scope)?;
            Ok(member(&target, name))
        }
        Expr::Index(target, index) => {
            let target = evaluate(target, scope)?;
            let index = evaluate(index, scope)?;
            match index {
                Value::String(key) => Ok(member(&target, &key)),
                Value::Number(n) => Ok(n
                    .as_u64()
                    .and_then(|i| target.get(i as usize))
                    .cloned()
                    .unwrap_or(Value::Null)),
                other => Err(DslError::TypeError(format!(
                    "cannot index with {}",
                    type_name(&other)
                ))),
            }
        }
        Expr::Call(name, args) => call(name, args, scope),
        Expr::Unary(UnaryOp::Not, operand) => Ok(Value::Bool(!truthy(&evaluate(operand, scope)?))),
        Expr::Unary(UnaryOp::Neg, operand) => match evaluate(operand, scope)? {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(i
                    .checked_neg()
                    .map(Value::from)
                    .unwrap_or_else(|| float(-(i as f64)).unwrap_or(Value::Null))),
                None => float(-n.as_f64().unwrap_or(0.0)),
            },
            other => Err(DslError::TypeError(format!(
                "cannot negate {}",
                type_name(&other)
            ))),
        },
        Expr::Binary(BinaryOp::And, left, right) => {
            if !truthy(&evaluate(left, scope)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&evaluate(right, scope)?)))
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            if truthy(&evaluate(left, scope)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&evaluate(right, scope)?)))
        }
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, scope)?;
            let right = evaluate(right, scope)?;
            binary(*op, &left, &right)
        }
        Expr::Array(items) => items
            .iter()
            .map(|item| evaluate(item, scope))
            .collect::<DslResult<Vec<_>>>()
            .map(Value::Array),
        Expr::Object(fields) => {
            let mut map = Map::new();
            for (key, value) in fields {
                map.insert(key.clone(), evaluate(value, scope)?);
            }
            Ok(Value::Object(map))
        }
    }
}

/// Truthiness used by guards: null, false, zero and empty values are false
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn member(target: &Value, name: &str) -> Value {
    match target {
        Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
        Value::Array(items) => name
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> DslResult<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(left, right))),
        BinaryOp::NotEq => Ok(Value::Bool(!loose_eq(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = compare(left, right)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinaryOp::Add => match (left, right) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            (Value::Array(a), Value::Array(b)) => {
                Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
            }
            (Value::Number(a), Value::Number(b)) => arithmetic(op, a, b),
            _ => Err(mismatch("+", left, right)),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => match (left, right) {
            (Value::Number(a), Value::Number(b)) => arithmetic(op, a, b),
            _ => Err(mismatch(symbol(op), left, right)),
        },
        BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(match op {
            BinaryOp::And => truthy(left) && truthy(right),
            _ => truthy(left) || truthy(right),
        })),
    }
}

fn arithmetic(op: BinaryOp, a: &Number, b: &Number) -> DslResult<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Div if y == 0 => return Err(DslError::DivisionByZero),
            BinaryOp::Div if x.checked_rem(y) == Some(0) => x.checked_div(y),
            BinaryOp::Rem if y == 0 => return Err(DslError::DivisionByZero),
            BinaryOp::Rem => x.checked_rem(y),
            _ => None,
        };
        if let Some(v) = exact {
            return Ok(Value::from(v));
        }
    }

    let x = a.as_f64().unwrap_or(0.0);
    let y = b.as_f64().unwrap_or(0.0);
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div | BinaryOp::Rem if y == 0.0 => return Err(DslError::DivisionByZero),
        BinaryOp::Div => x / y,
        BinaryOp::Rem => x % y,
        _ => return Err(DslError::TypeError(format!("'{}' is not arithmetic", symbol(op)))),
    };
    float(result)
}

fn float(f: f64) -> DslResult<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| DslError::TypeError("arithmetic produced a non-finite number".into()))
}

/// Equality that treats `1` and `1.0` as equal
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> DslResult<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                return Ok(x.cmp(&y));
            }
            let x = a.as_f64().unwrap_or(0.0);
            let y = b.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y)
                .ok_or_else(|| DslError::TypeError("numbers are not comparable".into()))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(mismatch("compare", left, right)),
    }
}

// ── Functions ────────────────────────────────────────────────────────

fn call(name: &str, args: &[Expr], scope: &Value) -> DslResult<Value> {
    let arity = |expected: usize| -> DslResult<()> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(DslError::Arity {
                function: name.to_string(),
                expected,
                found: args.len(),
            })
        }
    };

    match name {
        "len" => {
            arity(1)?;
            let len = match evaluate(&args[0], scope)? {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                other => {
                    return Err(DslError::TypeError(format!(
                        "len() of {}",
                        type_name(&other)
                    )))
                }
            };
            Ok(Value::from(len as u64))
        }
        "contains" => {
            arity(2)?;
            let haystack = evaluate(&args[0], scope)?;
            let needle = evaluate(&args[1], scope)?;
            let found = match (&haystack, &needle) {
                (Value::String(h), Value::String(n)) => h.contains(n.as_str()),
                (Value::Array(items), _) => items.iter().any(|i| loose_eq(i, &needle)),
                (Value::Object(map), Value::String(key)) => map.contains_key(key),
                (Value::Null, _) => false,
                _ => return Err(mismatch("contains", &haystack, &needle)),
            };
            Ok(Value::Bool(found))
        }
        "exists" => {
            arity(1)?;
            // An unknown top-level name counts as absent here
            let value = match evaluate(&args[0], scope) {
                Err(DslError::UnknownIdentifier(_)) => Value::Null,
                other => other?,
            };
            Ok(Value::Bool(!value.is_null()))
        }
        "default" => {
            arity(2)?;
            let value = match evaluate(&args[0], scope) {
                Err(DslError::UnknownIdentifier(_)) => Value::Null,
                other => other?,
            };
            if value.is_null() {
                evaluate(&args[1], scope)
            } else {
                Ok(value)
            }
        }
        "lower" | "upper" => {
            arity(1)?;
            match evaluate(&args[0], scope)? {
                Value::String(s) if name == "lower" => Ok(Value::String(s.to_lowercase())),
                Value::String(s) => Ok(Value::String(s.to_uppercase())),
                other => Err(DslError::TypeError(format!(
                    "{}() of {}",
                    name,
                    type_name(&other)
                ))),
            }
        }
        "keys" => {
            arity(1)?;
            match evaluate(&args[0], scope)? {
                Value::Object(map) => Ok(Value::Array(
                    map.keys().map(|k| Value::String(k.clone())).collect(),
                )),
                other => Err(DslError::TypeError(format!(
                    "keys() of {}",
                    type_name(&other)
                ))),
            }
        }
        _ => Err(DslError::UnknownFunction(name.to_string())),
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Or => "or",
        BinaryOp::And => "and",
        BinaryOp::Eq => "==",
        BinaryOp::NotEq => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
    }
}

fn mismatch(op: &str, left: &Value, right: &Value) -> DslError {
    DslError::TypeError(format!(
        "cannot apply '{}' to {} and {}",
        op,
        type_name(left),
        type_name(right)
    ))
}
