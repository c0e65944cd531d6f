//! Expression AST and evaluator.

use std::collections::HashMap;

use crate::error::MemprocError;

/// Truthiness convention shared by `iff` and (if a caller treats a whole
/// expression as a predicate) `test`: `|x| > 1e-10` is true.
pub const TRUTHY_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    NotEq,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Var(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    pub fn eval(&self, env: &HashMap<String, f64>) -> Result<f64, MemprocError> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Var(name) => env
                .get(name)
                .copied()
                .ok_or_else(|| MemprocError::Evaluation(format!("unbound variable '{name}'"))),
            Expr::Neg(inner) => Ok(-inner.eval(env)?),
            Expr::Not(inner) => Ok(as_bool_f64(inner.eval(env)?.abs() <= TRUTHY_EPSILON)),
            Expr::Bin(op, lhs, rhs) => eval_bin(op, lhs.eval(env)?, rhs.eval(env)?),
            Expr::Call(name, args) => {
                let values = args
                    .iter()
                    .map(|a| a.eval(env))
                    .collect::<Result<Vec<_>, _>>()?;
                eval_call(name, &values)
            }
        }
    }
}

fn as_bool_f64(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn is_truthy(x: f64) -> bool {
    x.abs() > TRUTHY_EPSILON
}

fn eval_bin(op: &BinOp, lhs: f64, rhs: f64) -> Result<f64, MemprocError> {
    Ok(match op {
        BinOp::Add => lhs + rhs,
        BinOp::Sub => lhs - rhs,
        BinOp::Mul => lhs * rhs,
        BinOp::Div => {
            if rhs == 0.0 {
                return Err(MemprocError::Evaluation("division by zero".to_string()));
            }
            lhs / rhs
        }
        BinOp::Mod => {
            if rhs == 0.0 {
                return Err(MemprocError::Evaluation("modulo by zero".to_string()));
            }
            lhs % rhs
        }
        BinOp::Lt => as_bool_f64(lhs < rhs),
        BinOp::Le => as_bool_f64(lhs <= rhs),
        BinOp::Gt => as_bool_f64(lhs > rhs),
        BinOp::Ge => as_bool_f64(lhs >= rhs),
        BinOp::Eq => as_bool_f64((lhs - rhs).abs() <= TRUTHY_EPSILON),
        BinOp::NotEq => as_bool_f64((lhs - rhs).abs() > TRUTHY_EPSILON),
        BinOp::And => as_bool_f64(is_truthy(lhs) && is_truthy(rhs)),
        BinOp::Or => as_bool_f64(is_truthy(lhs) || is_truthy(rhs)),
    })
}

fn eval_call(name: &str, args: &[f64]) -> Result<f64, MemprocError> {
    match name {
        "avg" => {
            require_arity(name, args.len(), 1, usize::MAX)?;
            Ok(args.iter().sum::<f64>() / args.len() as f64)
        }
        "min" => {
            require_arity(name, args.len(), 1, usize::MAX)?;
            Ok(args.iter().cloned().fold(f64::INFINITY, f64::min))
        }
        "max" => {
            require_arity(name, args.len(), 1, usize::MAX)?;
            Ok(args.iter().cloned().fold(f64::NEG_INFINITY, f64::max))
        }
        "clamp" => {
            require_arity(name, args.len(), 3, 3)?;
            let (x, lo, hi) = (args[0], args[1], args[2]);
            Ok(x.max(lo).min(hi))
        }
        "scale" => {
            require_arity(name, args.len(), 5, 5)?;
            let (x, in_lo, in_hi, out_lo, out_hi) = (args[0], args[1], args[2], args[3], args[4]);
            if (in_hi - in_lo).abs() <= f64::EPSILON {
                return Ok(out_lo);
            }
            Ok(out_lo + (x - in_lo) * (out_hi - out_lo) / (in_hi - in_lo))
        }
        "deadband" => {
            require_arity(name, args.len(), 3, 3)?;
            let (x, center, band) = (args[0], args[1], args[2]);
            if (x - center).abs() <= band / 2.0 {
                Ok(center)
            } else {
                Ok(x)
            }
        }
        "iff" => {
            require_arity(name, args.len(), 3, 3)?;
            Ok(if is_truthy(args[0]) { args[1] } else { args[2] })
        }
        other => Err(MemprocError::Evaluation(format!("unknown function '{other}'"))),
    }
}

fn require_arity(name: &str, got: usize, min: usize, max: usize) -> Result<(), MemprocError> {
    if got < min || got > max {
        return Err(MemprocError::Evaluation(format!(
            "function '{name}' called with {got} argument(s), expected {}",
            if min == max {
                format!("{min}")
            } else if max == usize::MAX {
                format!("at least {min}")
            } else {
                format!("{min}..={max}")
            }
        )));
    }
    Ok(())
}
