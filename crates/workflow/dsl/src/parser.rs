//! Parser: recursive descent parser for expressions
//!
//! Precedence, loosest first:
//!
//! ```text
//! or  ->  and  ->  not  ->  comparison  ->  + -  ->  * / %  ->  unary -  ->  postfix
//! ```
//!
//! Postfix forms are member access (`a.b`), indexing (`a[0]`, `a['k']`)
//! and calls on bare names (`len(a)`).

use crate::errors::{DslError, DslResult};
use crate::lexer::{Lexer, Token, TokenKind};
use serde_json::Value;

/// Unary operators
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Binary operators
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Expression syntax tree
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
}

/// Parser for expression source
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Parse expression source into a syntax tree
    pub fn parse(input: &str) -> DslResult<Expr> {
        let mut lexer = Lexer::new(input);
        let tokens = lexer.tokenize()?;
        let mut parser = Self { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        parser.expect(TokenKind::Eof)?;
        Ok(expr)
    }

    fn parse_or(&mut self) -> DslResult<Expr> {
        let mut left = self.parse_and()?;
        while self.check(TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> DslResult<Expr> {
        let mut left = self.parse_not()?;
        while self.check(TokenKind::And) {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> DslResult<Expr> {
        if self.check(TokenKind::Not) || self.check(TokenKind::Bang) {
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> DslResult<Expr> {
        let left = self.parse_additive()?;
        let op = match self.peek_kind() {
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::NotEq,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_additive(&mut self) -> DslResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> DslResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> DslResult<Expr> {
        if self.check(TokenKind::Minus) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> DslResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_member_name()?;
                    expr = Expr::Member(Box::new(expr), name);
                }
                TokenKind::OpenBracket => {
                    self.advance();
                    let index = self.parse_or()?;
                    self.expect(TokenKind::CloseBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                TokenKind::OpenParen => {
                    let name = match expr {
                        Expr::Ident(name) => name,
                        _ => {
                            let tok = self.peek();
                            return Err(DslError::ParseError {
                                line: tok.line,
                                col: tok.col,
                                message: "Only named functions can be called".into(),
                            });
                        }
                    };
                    self.advance();
                    let args = self.parse_list(TokenKind::CloseParen)?;
                    expr = Expr::Call(name, args);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> DslResult<Expr> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::NumberLiteral => {
                self.advance();
                Ok(Expr::Literal(parse_number(&tok)?))
            }
            TokenKind::StringLiteral => {
                self.advance();
                Ok(Expr::Literal(Value::String(tok.text)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr::Ident(tok.text))
            }
            TokenKind::OpenParen => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(inner)
            }
            TokenKind::OpenBracket => {
                self.advance();
                Ok(Expr::Array(self.parse_list(TokenKind::CloseBracket)?))
            }
            TokenKind::OpenBrace => {
                self.advance();
                self.parse_object()
            }
            TokenKind::Eof => Err(DslError::UnexpectedEof("expression".into())),
            _ => Err(DslError::UnexpectedToken {
                expected: "expression".into(),
                found: tok.text,
            }),
        }
    }

    /// Comma-separated expressions up to `close`; the opening token is already consumed
    fn parse_list(&mut self, close: TokenKind) -> DslResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(self.parse_or()?);
            if !self.check(close) {
                self.expect(TokenKind::Comma)?;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn parse_object(&mut self) -> DslResult<Expr> {
        let mut fields = Vec::new();
        while !self.check(TokenKind::CloseBrace) {
            let key = match self.peek_kind() {
                TokenKind::Identifier | TokenKind::StringLiteral => self.advance().text.clone(),
                TokenKind::Eof => return Err(DslError::UnexpectedEof("object key".into())),
                _ => {
                    return Err(DslError::UnexpectedToken {
                        expected: "object key".into(),
                        found: self.peek().text.clone(),
                    })
                }
            };
            self.expect(TokenKind::Colon)?;
            let value = self.parse_or()?;
            fields.push((key, value));
            if !self.check(TokenKind::CloseBrace) {
                self.expect(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::CloseBrace)?;
        Ok(Expr::Object(fields))
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> &Token {
        let idx = self.pos.min(self.tokens.len() - 1);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        &self.tokens[idx]
    }

    fn expect(&mut self, kind: TokenKind) -> DslResult<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else if self.check(TokenKind::Eof) {
            Err(DslError::UnexpectedEof(format!("{}", kind)))
        } else {
            let tok = self.peek();
            Err(DslError::UnexpectedToken {
                expected: format!("{}", kind),
                found: tok.text.clone(),
            })
        }
    }

    /// Member names may be identifiers, keywords or array positions (`a.0`)
    fn expect_member_name(&mut self) -> DslResult<String> {
        match self.peek_kind() {
            TokenKind::Identifier
            | TokenKind::NumberLiteral
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Null
            | TokenKind::And
            | TokenKind::Or
            | TokenKind::Not => Ok(self.advance().text.clone()),
            _ => {
                let tok = self.expect(TokenKind::Identifier)?;
                Ok(tok.text.clone())
            }
        }
    }
}

fn parse_number(tok: &Token) -> DslResult<Value> {
    if let Ok(i) = tok.text.parse::<i64>() {
        return Ok(Value::from(i));
    }
    tok.text
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| DslError::ParseError {
            line: tok.line,
            col: tok.col,
            message: format!("'{}' is not a valid number", tok.text),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.into()))
    }

    fn lit(v: Value) -> Box<Expr> {
        Box::new(Expr::Literal(v))
    }

    #[test]
    fn test_parse_member_comparison() {
        let expr = Parser::parse("output.score > 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Gt,
                Box::new(Expr::Member(ident("output"), "score".into())),
                lit(json!(3)),
            )
        );
    }

    #[test]
    fn test_precedence() {
        // a or b and not c  ==  a or (b and (not c))
        let expr = Parser::parse("a or b and not c").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Or,
                ident("a"),
                Box::new(Expr::Binary(
                    BinaryOp::And,
                    ident("b"),
                    Box::new(Expr::Unary(UnaryOp::Not, ident("c"))),
                )),
            )
        );

        // 1 + 2 * 3  ==  1 + (2 * 3)
        let arith = Parser::parse("1 + 2 * 3").unwrap();
        assert_eq!(
            arith,
            Expr::Binary(
                BinaryOp::Add,
                lit(json!(1)),
                Box::new(Expr::Binary(BinaryOp::Mul, lit(json!(2)), lit(json!(3)))),
            )
        );
    }

    #[test]
    fn test_parse_call_and_index() {
        let expr = Parser::parse("len(items[0].tags)").unwrap();
        assert!(matches!(expr, Expr::Call(ref name, ref args) if name == "len" && args.len() == 1));
    }

    #[test]
    fn test_parse_object_literal() {
        let expr = Parser::parse("{from: 'a', 'output': steps.a}").unwrap();
        match expr {
            Expr::Object(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].0, "from");
                assert_eq!(fields[1].0, "output");
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_array_trailing_comma() {
        let expr = Parser::parse("[1, 2,]").unwrap();
        assert_eq!(
            expr,
            Expr::Array(vec![Expr::Literal(json!(1)), Expr::Literal(json!(2))])
        );
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(Parser::parse("0.5").unwrap(), Expr::Literal(json!(0.5)));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let result = Parser::parse("a b");
        assert!(matches!(result, Err(DslError::UnexpectedToken { .. })));
    }

    #[test]
    fn test_unexpected_eof() {
        assert!(matches!(
            Parser::parse("a >"),
            Err(DslError::UnexpectedEof(_))
        ));
        assert!(matches!(Parser::parse(""), Err(DslError::UnexpectedEof(_))));
    }

    #[test]
    fn test_call_on_non_name_rejected() {
        assert!(Parser::parse("a.b(1)").is_err());
    }

    #[test]
    fn test_keyword_member_name() {
        let expr = Parser::parse("output.not").unwrap();
        assert_eq!(expr, Expr::Member(ident("output"), "not".into()));
    }
}
