//! Lexer for the search query language.
//!
//! Turns a raw query into a token stream that always ends with `Eof`. Lexical
//! errors are fatal: the first one aborts tokenization.

use crate::error::LexError;
use crate::token::{Span, Token, TokenKind};

pub struct Lexer<'a> {
    input: &'a str,
    /// Current byte offset into the input.
    position: usize,
}

/// Tokenize a query in one call.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(input).tokenize()
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input, position: 0 }
    }

    /// Collect every token up to and including `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    /// Character at the current position, without advancing.
    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    /// Advance one character and return it.
    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn single(&self, kind: TokenKind, start: usize) -> Token {
        Token::new(kind, &self.input[start..self.position], Span::new(start, self.position))
    }

    /// Read a quoted string. The opening quote has already been consumed.
    /// A backslash escapes whatever character follows it.
    fn read_quoted(&mut self, quote: char, start: usize) -> Result<Token, LexError> {
        let mut content = String::new();
        loop {
            match self.bump() {
                None => return Err(LexError::UnterminatedString { position: start }),
                Some('\\') => match self.bump() {
                    Some(escaped) => content.push(escaped),
                    None => return Err(LexError::UnterminatedString { position: start }),
                },
                Some(c) if c == quote => break,
                Some(c) => content.push(c),
            }
        }
        Ok(Token::new(
            TokenKind::QuotedValue,
            content,
            Span::new(start, self.position),
        ))
    }

    /// Read an identifier, number or wildcard run.
    ///
    /// Words start with a letter, `_`, digit, `*`, `?`, `.` or `-` and then
    /// absorb any of those plus `/`, which keeps CIDR blocks, relative
    /// durations (`24h`) and wildcard patterns like `*laptop*` in one token.
    fn read_word(&mut self, start: usize) -> Token {
        while let Some(c) = self.peek() {
            if is_word_continue(c) {
                self.bump();
            } else {
                break;
            }
        }
        let literal = &self.input[start..self.position];
        let span = Span::new(start, self.position);

        if literal.contains(['*', '?']) {
            return Token::new(TokenKind::Wildcard, literal, span);
        }

        let first = literal.chars().next().unwrap_or_default();
        let kind = if first.is_ascii_alphabetic() || first == '_' {
            match_keyword(literal)
        } else {
            TokenKind::Value
        };
        Token::new(kind, literal, span)
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();
        let start = self.position;

        let Some(c) = self.bump() else {
            return Ok(Token::new(TokenKind::Eof, "", Span::new(start, start)));
        };

        let token = match c {
            '(' => self.single(TokenKind::LParen, start),
            ')' => self.single(TokenKind::RParen, start),
            '[' => self.single(TokenKind::LBracket, start),
            ']' => self.single(TokenKind::RBracket, start),
            ':' => self.single(TokenKind::Colon, start),
            '"' | '\'' => self.read_quoted(c, start)?,
            '>' | '<' => {
                if self.peek() == Some('=') {
                    self.bump();
                }
                self.single(TokenKind::Operator, start)
            }
            '=' => self.single(TokenKind::Operator, start),
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    self.single(TokenKind::Operator, start)
                } else {
                    return Err(LexError::UnexpectedCharacter { ch: c, position: start });
                }
            }
            c if is_word_start(c) => self.read_word(start),
            _ => return Err(LexError::UnexpectedCharacter { ch: c, position: start }),
        };
        Ok(token)
    }
}

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '*' | '?' | '.' | '-')
}

fn is_word_continue(c: char) -> bool {
    is_word_start(c) || c == '/'
}

fn match_keyword(s: &str) -> TokenKind {
    match s.to_ascii_uppercase().as_str() {
        "AND" | "OR" | "NOT" => TokenKind::Logical,
        "TO" => TokenKind::To,
        _ => TokenKind::Field,
    }
}
