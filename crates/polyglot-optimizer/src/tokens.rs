//! Token types and tokenization for SQL parsing
//!
//! The tokenizer covers the generic SQL surface the fixture reader accepts.
//! Keywords are not distinguished from identifiers here; the parser compares
//! word tokens case-insensitively.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a position in the source SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    /// Starting byte offset
    pub start: usize,
    /// Ending byte offset (exclusive)
    pub end: usize,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub column: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    Word,
    QuotedIdentifier,
    String,
    Number,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Star,
    Plus,
    Dash,
    Slash,
    Percent,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    NullSafeEq,
    DPipe,
    DColon,
    Semicolon,
    Eof,
}

/// A lexical token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The type of token
    pub token_type: TokenType,
    /// The token text; quotes are stripped from strings and quoted identifiers
    pub text: String,
    /// Position information
    pub span: Span,
}

impl Token {
    pub fn new(token_type: TokenType, text: impl Into<String>, span: Span) -> Self {
        Self {
            token_type,
            text: text.into(),
            span,
        }
    }

    /// Whether this is the given keyword (case-insensitive)
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.token_type == TokenType::Word && self.text.eq_ignore_ascii_case(keyword)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.token_type {
            TokenType::Eof => write!(f, "end of input"),
            _ => write!(f, "'{}'", self.text),
        }
    }
}

/// SQL tokenizer
#[derive(Debug, Default)]
pub struct Tokenizer;

impl Tokenizer {
    pub fn new() -> Self {
        Self
    }

    /// Split `sql` into tokens, ending with an [`TokenType::Eof`] token
    pub fn tokenize(&self, sql: &str) -> Result<Vec<Token>> {
        let mut state = State {
            chars: sql.char_indices().collect(),
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
        };
        state.run()?;
        Ok(state.tokens)
    }
}

struct State {
    chars: Vec<(usize, char)>,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl State {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.pos).map(|(i, _)| *i).unwrap_or_else(|| {
            self.chars
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0)
        })
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, token_type: TokenType, text: String, start: usize, line: usize, column: usize) {
        let span = Span::new(start, self.offset(), line, column);
        self.tokens.push(Token::new(token_type, text, span));
    }

    fn run(&mut self) -> Result<()> {
        while let Some(c) = self.peek(0) {
            let (start, line, column) = (self.offset(), self.line, self.column);
            if c.is_whitespace() {
                self.advance();
                continue;
            }
            if c == '-' && self.peek(1) == Some('-') {
                while self.peek(0).is_some_and(|c| c != '\n') {
                    self.advance();
                }
                continue;
            }
            if c == '/' && self.peek(1) == Some('*') {
                self.advance();
                self.advance();
                loop {
                    match self.advance() {
                        Some('*') if self.peek(0) == Some('/') => {
                            self.advance();
                            break;
                        }
                        Some(_) => {}
                        None => return Err(Error::tokenize("Unterminated comment", line, column)),
                    }
                }
                continue;
            }
            if c.is_ascii_alphabetic() || c == '_' {
                let mut word = String::new();
                while let Some(c) = self.peek(0) {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                        word.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.push(TokenType::Word, word, start, line, column);
                continue;
            }
            if c.is_ascii_digit() || (c == '.' && self.peek(1).is_some_and(|d| d.is_ascii_digit())) {
                let number = self.read_number();
                self.push(TokenType::Number, number, start, line, column);
                continue;
            }
            if c == '\'' {
                let text = self.read_quoted('\'', line, column)?;
                self.push(TokenType::String, text, start, line, column);
                continue;
            }
            if c == '"' || c == '`' {
                let text = self.read_quoted(c, line, column)?;
                self.push(TokenType::QuotedIdentifier, text, start, line, column);
                continue;
            }

            let two: String = [Some(c), self.peek(1)].iter().flatten().collect();
            let three: String = [Some(c), self.peek(1), self.peek(2)].iter().flatten().collect();
            let (token_type, width) = if three == "<=>" {
                (TokenType::NullSafeEq, 3)
            } else {
                match two.as_str() {
                    "<>" | "!=" => (TokenType::Neq, 2),
                    "<=" => (TokenType::Lte, 2),
                    ">=" => (TokenType::Gte, 2),
                    "||" => (TokenType::DPipe, 2),
                    "::" => (TokenType::DColon, 2),
                    "==" => (TokenType::Eq, 2),
                    _ => match c {
                        '(' => (TokenType::LParen, 1),
                        ')' => (TokenType::RParen, 1),
                        '[' => (TokenType::LBracket, 1),
                        ']' => (TokenType::RBracket, 1),
                        ',' => (TokenType::Comma, 1),
                        '.' => (TokenType::Dot, 1),
                        '*' => (TokenType::Star, 1),
                        '+' => (TokenType::Plus, 1),
                        '-' => (TokenType::Dash, 1),
                        '/' => (TokenType::Slash, 1),
                        '%' => (TokenType::Percent, 1),
                        '=' => (TokenType::Eq, 1),
                        '<' => (TokenType::Lt, 1),
                        '>' => (TokenType::Gt, 1),
                        ';' => (TokenType::Semicolon, 1),
                        other => {
                            return Err(Error::tokenize(
                                format!("Unexpected character '{other}'"),
                                line,
                                column,
                            ))
                        }
                    },
                }
            };
            let mut text = String::new();
            for _ in 0..width {
                if let Some(c) = self.advance() {
                    text.push(c);
                }
            }
            self.push(token_type, text, start, line, column);
        }
        let end = self.offset();
        self.tokens.push(Token::new(
            TokenType::Eof,
            "",
            Span::new(end, end, self.line, self.column),
        ));
        Ok(())
    }

    fn read_number(&mut self) -> String {
        let mut number = String::new();
        let mut seen_dot = false;
        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() {
                number.push(c);
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                number.push(c);
            } else if (c == 'e' || c == 'E')
                && self
                    .peek(1)
                    .is_some_and(|n| n.is_ascii_digit() || n == '-' || n == '+')
            {
                number.push(c);
                self.advance();
                if let Some(sign) = self.peek(0) {
                    number.push(sign);
                }
                seen_dot = true;
            } else {
                break;
            }
            self.advance();
        }
        number
    }

    fn read_quoted(&mut self, quote: char, line: usize, column: usize) -> Result<String> {
        self.advance();
        let mut text = String::new();
        loop {
            match self.advance() {
                Some(c) if c == quote => {
                    if self.peek(0) == Some(quote) {
                        self.advance();
                        text.push(quote);
                    } else {
                        return Ok(text);
                    }
                }
                Some(c) => text.push(c),
                None => {
                    return Err(Error::tokenize(
                        format!("Missing closing {quote}"),
                        line,
                        column,
                    ))
                }
            }
        }
    }
}
