//! Expression Engine (spec.md §4.4).
//!
//! Evaluates arithmetic/boolean expressions over a named-parameter
//! environment plus a fixed function set, with a compiled-form cache
//! keyed by expression hash.

mod ast;
mod cache;
mod lexer;
mod parser;

pub use ast::{Expr, TRUTHY_EPSILON};
pub use cache::ExpressionCache;

use std::collections::HashMap;

use crate::error::MemprocError;

/// Validates and evaluates `expr` once against `env`, without caching.
/// Useful for one-off validation (e.g. the configuration-time `test`
/// operation from spec.md §4.4).
pub fn test(expr: &str, env: &HashMap<String, f64>) -> Result<f64, MemprocError> {
    parser::parse(expr)?.eval(env)
}

/// Validates `expr` is syntactically well-formed without evaluating it.
pub fn validate(expr: &str) -> Result<(), MemprocError> {
    parser::parse(expr).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_returns_numeric_truthiness() {
        let env = HashMap::new();
        assert_eq!(test("iff(1, 10, 20)", &env).unwrap(), 10.0);
    }

    #[test]
    fn validate_accepts_well_formed_expression() {
        assert!(validate("avg(a, b, c)").is_ok());
    }
}
