//! Recursive-descent / precedence-climbing parser for the Expression
//! Engine. Grounded on the teacher's query-builder modules (one
//! small-surface function per syntactic concern) rather than a
//! parser-combinator crate, since none appears anywhere in the retrieval
//! pack for this niche.

use super::ast::{BinOp, Expr};
use super::lexer::{Token, tokenize};
use crate::error::MemprocError;

const MAX_EXPRESSION_LEN: usize = 2_000;

/// Returns `(name, (min_arity, max_arity))` for every recognized function.
fn function_arity(name: &str) -> Option<(usize, usize)> {
    match name {
        "avg" | "min" | "max" => Some((1, usize::MAX)),
        "clamp" => Some((3, 3)),
        "scale" => Some((5, 5)),
        "deadband" => Some((3, 3)),
        "iff" => Some((3, 3)),
        _ => None,
    }
}

/// Parses and validates an expression, per spec.md §4.4: rejects empty
/// expressions, over-length expressions, syntax errors, and any function
/// call with the wrong arity.
pub fn parse(src: &str) -> Result<Expr, MemprocError> {
    if src.trim().is_empty() {
        return Err(MemprocError::Configuration("expression is empty".to_string()));
    }
    if src.len() > MAX_EXPRESSION_LEN {
        return Err(MemprocError::Configuration(format!(
            "expression exceeds maximum length of {MAX_EXPRESSION_LEN} characters"
        )));
    }

    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(MemprocError::Parse(format!(
            "unexpected trailing tokens at position {}",
            parser.pos
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<(), MemprocError> {
        match self.advance() {
            Some(ref t) if t == expected => Ok(()),
            Some(t) => Err(MemprocError::Parse(format!("expected {expected:?}, found {t:?}"))),
            None => Err(MemprocError::Parse(format!("expected {expected:?}, found end of expression"))),
        }
    }

    // or -> and (|| and)*
    fn parse_or(&mut self) -> Result<Expr, MemprocError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::OrOr)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Bin(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // and -> comparison (&& comparison)*
    fn parse_and(&mut self) -> Result<Expr, MemprocError> {
        let mut lhs = self.parse_comparison()?;
        while matches!(self.peek(), Some(Token::AndAnd)) {
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Bin(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // comparison -> additive ((< | <= | > | >= | == | !=) additive)?
    fn parse_comparison(&mut self) -> Result<Expr, MemprocError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            Some(Token::EqEq) => BinOp::Eq,
            Some(Token::NotEq) => BinOp::NotEq,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        Ok(Expr::Bin(op, Box::new(lhs), Box::new(rhs)))
    }

    // additive -> term ((+|-) term)*
    fn parse_additive(&mut self) -> Result<Expr, MemprocError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // term -> unary ((*|/|%) unary)*
    fn parse_term(&mut self) -> Result<Expr, MemprocError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // unary -> ('-' | '!')? primary
    fn parse_unary(&mut self) -> Result<Expr, MemprocError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Some(Token::Not) => {
                self.advance();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    // primary -> number | ident ('(' args ')')? | '(' or ')'
    fn parse_primary(&mut self) -> Result<Expr, MemprocError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance();
                    let args = self.parse_args()?;
                    self.expect(&Token::RParen)?;
                    if let Some((min, max)) = function_arity(&name) {
                        if args.len() < min || args.len() > max {
                            return Err(MemprocError::Configuration(format!(
                                "function '{name}' called with {} argument(s), expected {}",
                                args.len(),
                                if min == max { format!("{min}") } else { format!("at least {min}") }
                            )));
                        }
                    } else {
                        return Err(MemprocError::Configuration(format!("unknown function '{name}'")));
                    }
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(other) => Err(MemprocError::Parse(format!("unexpected token {other:?}"))),
            None => Err(MemprocError::Parse("unexpected end of expression".to_string())),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, MemprocError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            return Ok(args);
        }
        args.push(self.parse_or()?);
        while matches!(self.peek(), Some(Token::Comma)) {
            self.advance();
            args.push(self.parse_or()?);
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn evaluates_arithmetic() {
        let expr = parse("x + 1").unwrap();
        assert_eq!(expr.eval(&env(&[("x", 10.0)])).unwrap(), 11.0);
    }

    #[test]
    fn evaluates_functions() {
        assert_eq!(parse("clamp(15, 0, 10)").unwrap().eval(&env(&[])).unwrap(), 10.0);
        assert_eq!(parse("avg(1, 2, 3)").unwrap().eval(&env(&[])).unwrap(), 2.0);
        assert_eq!(parse("scale(5, 0, 10, 0, 100)").unwrap().eval(&env(&[])).unwrap(), 50.0);
        assert_eq!(parse("deadband(10, 10.2, 1)").unwrap().eval(&env(&[])).unwrap(), 10.2);
        assert_eq!(parse("iff(1, 2, 3)").unwrap().eval(&env(&[])).unwrap(), 2.0);
        assert_eq!(parse("iff(0, 2, 3)").unwrap().eval(&env(&[])).unwrap(), 3.0);
    }

    #[test]
    fn degenerate_scale_range_returns_out_lo() {
        assert_eq!(parse("scale(5, 3, 3, 10, 20)").unwrap().eval(&env(&[])).unwrap(), 10.0);
    }

    #[test]
    fn rejects_empty_and_over_length() {
        assert!(parse("").is_err());
        let long = "1+".repeat(2000);
        assert!(parse(&long).is_err());
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(parse("clamp(1, 2)").is_err());
        assert!(parse("iff(1, 2, 3, 4)").is_err());
    }

    #[test]
    fn rejects_syntax_errors() {
        assert!(parse("1 +").is_err());
        assert!(parse("(1 + 2").is_err());
    }

    #[test]
    fn operator_precedence() {
        assert_eq!(parse("2 + 3 * 4").unwrap().eval(&env(&[])).unwrap(), 14.0);
        assert_eq!(parse("(2 + 3) * 4").unwrap().eval(&env(&[])).unwrap(), 20.0);
    }
}
