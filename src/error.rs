//! Error types shared across the compiler stages.

use thiserror::Error;

/// Fatal lexical errors. Positions are byte offsets into the query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Unterminated quoted string starting at position {position}")]
    UnterminatedString { position: usize },

    #[error("Unexpected character '{ch}' at position {position}")]
    UnexpectedCharacter { ch: char, position: usize },
}

impl LexError {
    pub fn position(&self) -> usize {
        match self {
            LexError::UnterminatedString { position } => *position,
            LexError::UnexpectedCharacter { position, .. } => *position,
        }
    }
}

/// Errors raised while compiling an AST node into filter output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("Invalid relative time '{value}': amount must be between 0 and 1000000")]
    InvalidDuration { value: String },

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Filter '{filter}' cannot handle {node}")]
    Unsupported { filter: &'static str, node: String },
}

/// Errors loading compiler configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file does not exist: {0}")]
    NotFound(String),

    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse config file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Crate-level error for callers that want a single type.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Unknown entity type '{0}'")]
    UnknownEntity(String),
}

pub type Result<T> = std::result::Result<T, Error>;
