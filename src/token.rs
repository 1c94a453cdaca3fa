//! The token definition for the search query language.

use std::fmt;

/// A token is a single unit of the language, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Unescaped text of the token. Empty for `Eof`.
    pub value: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            value: value.into(),
            span,
        }
    }

    /// Byte offset of the first character of the token.
    pub fn position(&self) -> usize {
        self.span.start
    }

    /// Length of the token in the source text, quotes and escapes included.
    pub fn length(&self) -> usize {
        self.span.end - self.span.start
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }

    /// True for a `Logical` token carrying the given keyword (case-insensitive).
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Logical && self.value.eq_ignore_ascii_case(keyword)
    }
}

/// The kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Words
    Field,       // source_ip, severity, high
    Value,       // 42, 2024-01-01, 10.0.0.1
    QuotedValue, // "..." or '...'
    Wildcard,    // 192.168.*, *laptop*

    // Operators and keywords
    Operator, // > >= < <= !=
    Logical,  // AND OR NOT
    To,       // TO

    // Punctuation
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    Colon,    // :

    // Special
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Field => "FIELD",
            TokenKind::Value => "VALUE",
            TokenKind::QuotedValue => "QUOTED_VALUE",
            TokenKind::Wildcard => "WILDCARD",
            TokenKind::Operator => "OPERATOR",
            TokenKind::Logical => "LOGICAL",
            TokenKind::To => "TO",
            TokenKind::LParen => "LPAREN",
            TokenKind::RParen => "RPAREN",
            TokenKind::LBracket => "LBRACKET",
            TokenKind::RBracket => "RBRACKET",
            TokenKind::Colon => "COLON",
            TokenKind::Eof => "EOF",
        };
        f.write_str(name)
    }
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}
