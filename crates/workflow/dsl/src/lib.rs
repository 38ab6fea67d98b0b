//! Workflow expression language
//!
//! Guards on conditional and loop-back edges, quality gates, input
//! bindings and data transforms are all written in one small expression
//! language evaluated over a JSON scope.
//!
//! # Syntax
//!
//! - literals: `1`, `2.5`, `'text'`, `"text"`, `true`, `false`, `null`,
//!   `[a, b]`, `{key: value}`
//! - paths: `steps.review.score`, `items[0]`, `output['label']`
//! - operators: `+ - * / %`, `== != < <= > >=`, `and`/`&&`, `or`/`||`,
//!   `not`/`!`
//! - functions: `len`, `contains`, `exists`, `default`, `lower`, `upper`,
//!   `keys`
//!
//! # Example
//!
//! ```rust
//! use workflow_dsl::Expression;
//! use serde_json::json;
//!
//! let gate = Expression::parse("output.score >= 0.8 and not output.flagged").unwrap();
//! let scope = json!({"output": {"score": 0.92, "flagged": false}});
//! assert!(gate.evaluate_bool(&scope).unwrap());
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use errors::{DslError, DslResult};
pub use eval::{evaluate, truthy};
pub use parser::{BinaryOp, Expr, Parser, UnaryOp};

use serde_json::Value;

/// A parsed expression together with its source text
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// Parse expression source
    pub fn parse(source: impl Into<String>) -> DslResult<Self> {
        let source = source.into();
        let ast = Parser::parse(&source)?;
        Ok(Self { source, ast })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Evaluate against a scope object
    pub fn evaluate(&self, scope: &Value) -> DslResult<Value> {
        eval::evaluate(&self.ast, scope)
    }

    /// Evaluate and reduce to a truth value
    pub fn evaluate_bool(&self, scope: &Value) -> DslResult<bool> {
        self.evaluate(scope).map(|v| truthy(&v))
    }
}

impl std::str::FromStr for Expression {
    type Err = DslError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_expression_roundtrip_source() {
        let expr: Expression = "len(items) > 0".parse().unwrap();
        assert_eq!(expr.source(), "len(items) > 0");
        assert_eq!(expr.to_string(), "len(items) > 0");
        assert!(expr.evaluate_bool(&json!({"items": [1]})).unwrap());
    }

    #[test]
    fn test_parse_error_surfaces() {
        let err = Expression::parse("a ==").unwrap_err();
        assert!(matches!(err, DslError::UnexpectedEof(_)));
    }

    proptest! {
        /// Integer addition matches native arithmetic and stays integral.
        #[test]
        fn integer_addition_matches_native(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
            let expr = Expression::parse("a + b").unwrap();
            let out = expr.evaluate(&json!({"a": a, "b": b})).unwrap();
            prop_assert_eq!(out, json!(a + b));
        }

        /// Comparison and its negation never agree.
        #[test]
        fn comparison_negation_is_exclusive(a in -1000i64..1000, b in -1000i64..1000) {
            let scope = json!({"a": a, "b": b});
            let lt = Expression::parse("a < b").unwrap().evaluate_bool(&scope).unwrap();
            let not_lt = Expression::parse("not (a < b)").unwrap().evaluate_bool(&scope).unwrap();
            prop_assert_ne!(lt, not_lt);
        }

        /// Parsing is deterministic.
        #[test]
        fn parse_is_deterministic(name in "[a-z][a-z0-9_]{0,8}", n in 0u32..1000) {
            prop_assume!(!["and", "or", "not", "true", "false", "null"].contains(&name.as_str()));
            let src = format!("{}.value >= {}", name, n);
            prop_assert_eq!(Expression::parse(src.clone()).unwrap(), Expression::parse(src).unwrap());
        }
    }
}
