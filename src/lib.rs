//! Search query compiler for network-security records.
//!
//! Queries such as `severity:high AND (type:1 OR type:2)` are tokenized,
//! parsed into a [`QueryNode`] tree, validated against the fields of an
//! [`EntityType`], and compiled into backend API parameters plus in-memory
//! post-processing stages.
//!
//! ```no_run
//! use search_compiler::{EntityType, QueryCompiler};
//!
//! let compiled = QueryCompiler::default().compile("severity:high AND timestamp:>=24h", EntityType::Alarms);
//! if compiled.is_valid() {
//!     println!("{}", serde_json::to_string_pretty(&compiled.summary()).unwrap());
//! }
//! ```

pub mod ast;
pub mod boolean;
pub mod compiler;
pub mod config;
pub mod error;
pub mod filters;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod schema;
pub mod token;
pub mod validator;

pub use ast::{ComparisonOperator, FieldOperator, LogicalQuery, QueryNode, QueryValue};
pub use boolean::{BooleanEncoding, BooleanFieldTranslator};
pub use compiler::{CompiledQuery, CompiledSummary, QueryCompiler};
pub use config::CompilerConfig;
pub use error::{ConfigError, Error, FilterError, LexError, Result};
pub use filters::{Filter, FilterContext, FilterFactory, FilterResult, PipelineTrace, PostProcessing, Stage};
pub use optimizer::{parse_components, validate_query, ParsedQuery};
pub use parser::{parse, QueryValidation};
pub use schema::{EntityType, Record};
