//! Lexer: tokenizes expression source
//!
//! Produces a stream of tokens that the parser consumes.
//! Handles identifiers, keywords (`and`, `or`, `not`, `true`, `false`,
//! `null`), single- or double-quoted strings, numbers and operators.

use crate::errors::{DslError, DslResult};

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The raw text of the token (unescaped for strings)
    pub text: String,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub col: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            col,
        }
    }
}

/// Token types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    True,
    False,
    Null,
    And,
    Or,
    Not,

    // Identifiers and literals
    Identifier,
    StringLiteral,
    NumberLiteral,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Bang,

    // Structural
    Dot,
    Comma,
    Colon,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    OpenBrace,
    CloseBrace,

    // End of input
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Null => write!(f, "null"),
            Self::And => write!(f, "and"),
            Self::Or => write!(f, "or"),
            Self::Not => write!(f, "not"),
            Self::Identifier => write!(f, "identifier"),
            Self::StringLiteral => write!(f, "string literal"),
            Self::NumberLiteral => write!(f, "number"),
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Star => write!(f, "*"),
            Self::Slash => write!(f, "/"),
            Self::Percent => write!(f, "%"),
            Self::EqEq => write!(f, "=="),
            Self::NotEq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
            Self::Bang => write!(f, "!"),
            Self::Dot => write!(f, "."),
            Self::Comma => write!(f, ","),
            Self::Colon => write!(f, ":"),
            Self::OpenParen => write!(f, "("),
            Self::CloseParen => write!(f, ")"),
            Self::OpenBracket => write!(f, "["),
            Self::CloseBracket => write!(f, "]"),
            Self::OpenBrace => write!(f, "{{"),
            Self::CloseBrace => write!(f, "}}"),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

/// Lexer for expression source
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    /// Create a new lexer from input text
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> DslResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            if self.pos >= self.input.len() {
                tokens.push(Token::new(TokenKind::Eof, "", self.line, self.col));
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> DslResult<Token> {
        let ch = self.input[self.pos];
        let line = self.line;
        let col = self.col;

        let single = |kind: TokenKind| Some((kind, 1usize));
        let two_char = match (ch, self.peek_at(1)) {
            ('=', Some('=')) => Some((TokenKind::EqEq, 2)),
            ('!', Some('=')) => Some((TokenKind::NotEq, 2)),
            ('<', Some('=')) => Some((TokenKind::Le, 2)),
            ('>', Some('=')) => Some((TokenKind::Ge, 2)),
            ('&', Some('&')) => Some((TokenKind::And, 2)),
            ('|', Some('|')) => Some((TokenKind::Or, 2)),
            _ => None,
        };

        let op = two_char.or(match ch {
            '+' => single(TokenKind::Plus),
            '-' => single(TokenKind::Minus),
            '*' => single(TokenKind::Star),
            '/' => single(TokenKind::Slash),
            '%' => single(TokenKind::Percent),
            '<' => single(TokenKind::Lt),
            '>' => single(TokenKind::Gt),
            '!' => single(TokenKind::Bang),
            '.' => single(TokenKind::Dot),
            ',' => single(TokenKind::Comma),
            ':' => single(TokenKind::Colon),
            '(' => single(TokenKind::OpenParen),
            ')' => single(TokenKind::CloseParen),
            '[' => single(TokenKind::OpenBracket),
            ']' => single(TokenKind::CloseBracket),
            '{' => single(TokenKind::OpenBrace),
            '}' => single(TokenKind::CloseBrace),
            _ => None,
        });

        if let Some((kind, len)) = op {
            let text: String = self.input[self.pos..self.pos + len].iter().collect();
            for _ in 0..len {
                self.advance();
            }
            return Ok(Token::new(kind, text, line, col));
        }

        match ch {
            '"' | '\'' => self.read_string_literal(ch),
            c if c.is_ascii_digit() => self.read_number(),
            c if c.is_ascii_alphabetic() || c == '_' => Ok(self.read_identifier_or_keyword()),
            _ => Err(DslError::ParseError {
                line,
                col,
                message: format!("Unexpected character: '{}'", ch),
            }),
        }
    }

    fn read_string_literal(&mut self, quote: char) -> DslResult<Token> {
        let line = self.line;
        let col = self.col;
        self.advance(); // skip opening quote

        let mut text = String::new();
        while self.pos < self.input.len() && self.input[self.pos] != quote {
            if self.input[self.pos] == '\\' {
                let escaped = match self.peek_at(1) {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some(c @ ('\\' | '"' | '\'')) => c,
                    _ => {
                        return Err(DslError::ParseError {
                            line: self.line,
                            col: self.col,
                            message: "Invalid escape sequence".into(),
                        })
                    }
                };
                self.advance();
                text.push(escaped);
            } else {
                text.push(self.input[self.pos]);
            }
            self.advance();
        }

        if self.pos >= self.input.len() {
            return Err(DslError::ParseError {
                line,
                col,
                message: "Unterminated string literal".into(),
            });
        }

        self.advance(); // skip closing quote
        Ok(Token::new(TokenKind::StringLiteral, text, line, col))
    }

    fn read_number(&mut self) -> DslResult<Token> {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();

        while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
            text.push(self.input[self.pos]);
            self.advance();
        }

        // A fraction needs a digit after the dot; `a.0` style member access stays intact
        if self.pos < self.input.len()
            && self.input[self.pos] == '.'
            && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
        {
            text.push('.');
            self.advance();
            while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
                text.push(self.input[self.pos]);
                self.advance();
            }
        }

        if self
            .peek_at(0)
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        {
            return Err(DslError::ParseError {
                line,
                col,
                message: format!("Malformed number: '{}'", text),
            });
        }

        Ok(Token::new(TokenKind::NumberLiteral, text, line, col))
    }

    fn read_identifier_or_keyword(&mut self) -> Token {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();

        while self.pos < self.input.len()
            && (self.input[self.pos].is_ascii_alphanumeric() || self.input[self.pos] == '_')
        {
            text.push(self.input[self.pos]);
            self.advance();
        }

        let kind = match text.as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            _ => TokenKind::Identifier,
        };

        Token::new(kind, text, line, col)
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_whitespace() {
            self.advance();
        }
    }

    fn advance(&mut self) {
        if self.pos < self.input.len() {
            if self.input[self.pos] == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.pos += 1;
        }
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }
}
