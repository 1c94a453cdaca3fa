//! Recursive-descent parser for the search query language.
//!
//! ## Grammar
//!
//! ```text
//! Expression := AndExpr (OR AndExpr)*
//! AndExpr    := NotExpr ((AND)? NotExpr)*
//! NotExpr    := NOT NotExpr | Primary
//! Primary    := '(' Expression ')' | FieldQuery | '*'
//! FieldQuery := FIELD ':' ( Operator Value | '[' RangeBody ']' | Wildcard | Value )
//! RangeBody  := Value? TO Value?
//! ```
//!
//! ## Precedence (high to low)
//!
//! 1. **Grouping** `(expression)`
//! 2. **NOT** `NOT expression`
//! 3. **AND** `expr1 AND expr2`, or two clauses side by side
//! 4. **OR** `expr1 OR expr2`
//!
//! ## Examples
//!
//! ```text
//! severity:high
//! severity:high AND (type:1 OR type:2)
//! bytes:[1000 TO 50000] NOT blocked:1
//! timestamp:>=24h AND source_ip:192.168.*
//! *
//! ```
//!
//! Syntax errors do not stop the parse. The parser records the diagnostic,
//! skips ahead to the next `AND`, `OR`, `)` or end of input, and carries on,
//! so one pass can report several problems.

use serde::Serialize;

use crate::ast::{ComparisonOperator, FieldOperator, QueryNode, QueryValue};
use crate::lexer::tokenize;
use crate::schema::EntityType;
use crate::token::{Span, Token, TokenKind};
use crate::validator;

/// Deepest nesting of groups and NOT operators accepted.
pub const MAX_DEPTH: usize = 64;

/// Most leaf clauses one query may hold. AND/OR chains nest one level per
/// clause, so this also bounds the depth of the tree.
pub const MAX_CLAUSES: usize = 512;

pub struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
    depth: usize,
    clauses: usize,
    exhausted: bool,
    errors: Vec<ParseError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Option<Span>,
}

impl ParseError {
    fn new(message: String, span: Option<Span>) -> Self {
        Self { message, span }
    }

    fn at_position(message: String, span: Span) -> Self {
        Self {
            message,
            span: Some(span),
        }
    }
}

/// Result of parsing (and optionally field-validating) a query.
///
/// `ast` is only present when parsing and field validation both succeeded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ast: Option<QueryNode>,
}

impl QueryValidation {
    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
            warnings: Vec::new(),
            suggestions: Vec::new(),
            ast: None,
        }
    }
}

/// Parse `query`, validating fields against `entity` when one is given.
/// Never fails: every problem is reported through the returned value.
pub fn parse(query: &str, entity: Option<EntityType>) -> QueryValidation {
    if query.trim().is_empty() {
        let mut result = QueryValidation::invalid(vec!["Empty query".to_string()]);
        result.suggestions.push("Use '*' to match every record".to_string());
        return result;
    }

    let tokens = match tokenize(query) {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::debug!(error = %e, "query rejected by lexer");
            let mut result = QueryValidation::invalid(vec![e.to_string()]);
            result.suggestions = validator::suggestions(query, &result.errors, &[], entity);
            return result;
        }
    };

    let mut parser = Parser::new(&tokens);
    let parsed = parser.parse();

    let mut errors: Vec<String> = Vec::new();
    let mut invalid_fields = Vec::new();
    let mut warnings = Vec::new();
    let ast = match parsed {
        Ok(ast) => {
            if let Some(entity) = entity {
                let fields = validator::validate_fields(&ast, entity);
                errors.extend(fields.errors);
                invalid_fields = fields.invalid_fields;
            }
            if !ast.is_match_all() && contains_match_all(&ast) {
                warnings.push("'*' combined with other clauses matches every record".to_string());
            }
            Some(ast)
        }
        Err(parse_errors) => {
            errors.extend(parse_errors.into_iter().map(|e| e.message));
            None
        }
    };

    let suggestions = validator::suggestions(query, &errors, &invalid_fields, entity);
    let is_valid = errors.is_empty();
    QueryValidation {
        is_valid,
        errors,
        warnings,
        suggestions,
        ast: if is_valid { ast } else { None },
    }
}

fn contains_match_all(node: &QueryNode) -> bool {
    use crate::ast::LogicalQuery;
    match node {
        QueryNode::Logical(LogicalQuery::And { left, right })
        | QueryNode::Logical(LogicalQuery::Or { left, right }) => {
            contains_match_all(left) || contains_match_all(right)
        }
        QueryNode::Logical(LogicalQuery::Not { operand }) => contains_match_all(operand),
        QueryNode::Group { query } => contains_match_all(query),
        leaf => leaf.is_match_all(),
    }
}

impl<'a> Parser<'a> {
    /// `tokens` must end with an `Eof` token, as produced by the lexer.
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            position: 0,
            depth: 0,
            clauses: 0,
            exhausted: false,
            errors: Vec::new(),
        }
    }

    /// Current token, without advancing. Past the end this is the final `Eof`.
    fn peek(&self) -> Option<&'a Token> {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().map(|t| t.kind).unwrap_or(TokenKind::Eof)
    }

    /// Current token, advancing past it.
    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.position);
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn match_keyword(&self, keyword: &str) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(keyword))
    }

    fn at_end(&self) -> bool {
        self.peek_kind() == TokenKind::Eof
    }

    /// Whether the current token can begin a clause, for implicit AND.
    fn starts_clause(&self) -> bool {
        match self.peek() {
            Some(token) => match token.kind {
                TokenKind::Field | TokenKind::LParen => true,
                TokenKind::Logical => token.is_keyword("NOT"),
                TokenKind::Wildcard => token.value == "*",
                _ => false,
            },
            None => false,
        }
    }

    fn unexpected(&self, token: &Token) -> ParseError {
        let shown = if token.kind == TokenKind::Eof {
            "end of query".to_string()
        } else {
            token.value.clone()
        };
        ParseError::at_position(
            format!("Unexpected token '{}' at position {}", shown, token.position()),
            token.span,
        )
    }

    /// Parse the whole token stream. All accumulated errors are returned on failure.
    pub fn parse(&mut self) -> Result<QueryNode, Vec<ParseError>> {
        let mut root: Option<QueryNode> = None;

        while !self.at_end() {
            match self.parse_expression() {
                Ok(node) => {
                    root = Some(match root.take() {
                        Some(previous) => QueryNode::and(previous, node),
                        None => node,
                    });
                }
                Err(e) => {
                    self.errors.push(e);
                    if self.exhausted {
                        break;
                    }
                    self.synchronize();
                }
            }

            // Whatever the expression could not consume
            if let Some(token) = self.peek() {
                match token.kind {
                    TokenKind::Eof => {}
                    TokenKind::Logical if !token.is_keyword("NOT") => {
                        // Resume after a failed clause: `a: AND b:1`
                        self.advance();
                        if self.at_end() {
                            self.errors.push(ParseError::at_position(
                                format!("Expected expression after {} operator", token.value.to_ascii_uppercase()),
                                token.span,
                            ));
                        }
                    }
                    _ => {
                        let error = self.unexpected(token);
                        self.errors.push(error);
                        self.advance();
                    }
                }
            }
        }

        if !self.errors.is_empty() {
            return Err(std::mem::take(&mut self.errors));
        }
        root.ok_or_else(|| vec![ParseError::new("Empty query".to_string(), None)])
    }

    /// Count one more leaf clause against [`MAX_CLAUSES`].
    fn count_clause(&mut self, span: Span) -> Result<(), ParseError> {
        self.clauses += 1;
        if self.clauses > MAX_CLAUSES {
            self.exhausted = true;
            return Err(ParseError::at_position(
                format!("Query exceeds maximum of {} clauses", MAX_CLAUSES),
                span,
            ));
        }
        Ok(())
    }

    /// Skip to the next AND, OR, `)` or end of input.
    fn synchronize(&mut self) {
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::Eof | TokenKind::RParen => return,
                TokenKind::Logical if !token.is_keyword("NOT") => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Entry point of the precedence chain: OR → AND → NOT → PRIMARY.
    fn parse_expression(&mut self) -> Result<QueryNode, ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            self.depth -= 1;
            let span = self.peek().map(|t| t.span);
            return Err(ParseError::new(
                format!("Query nesting exceeds maximum depth of {}", MAX_DEPTH),
                span,
            ));
        }
        let result = self.parse_or_expression();
        self.depth -= 1;
        result
    }

    /// `and_expr (OR and_expr)*`
    fn parse_or_expression(&mut self) -> Result<QueryNode, ParseError> {
        let mut left = self.parse_and_expression()?;

        while self.match_keyword("OR") {
            let operator = self.advance();
            if self.at_end() {
                let span = operator.map(|t| t.span).unwrap_or_default();
                return Err(ParseError::at_position(
                    "Expected expression after OR operator".to_string(),
                    span,
                ));
            }
            let right = self.parse_and_expression()?;
            left = QueryNode::or(left, right);
        }

        Ok(left)
    }

    /// `not_expr ((AND)? not_expr)*`. Adjacent clauses are an implicit AND.
    fn parse_and_expression(&mut self) -> Result<QueryNode, ParseError> {
        let mut left = self.parse_not_expression()?;

        loop {
            if self.match_keyword("AND") {
                let operator = self.advance();
                if self.at_end() {
                    let span = operator.map(|t| t.span).unwrap_or_default();
                    return Err(ParseError::at_position(
                        "Expected expression after AND operator".to_string(),
                        span,
                    ));
                }
            } else if !self.starts_clause() {
                break;
            }
            let right = self.parse_not_expression()?;
            left = QueryNode::and(left, right);
        }

        Ok(left)
    }

    /// `NOT not_expr | primary`
    fn parse_not_expression(&mut self) -> Result<QueryNode, ParseError> {
        if !self.match_keyword("NOT") {
            return self.parse_primary_expression();
        }
        let not_span = self.advance().map(|t| t.span).unwrap_or_default();

        let dangling = match self.peek() {
            None => true,
            Some(token) => match token.kind {
                TokenKind::Eof | TokenKind::RParen => true,
                TokenKind::Logical => !token.is_keyword("NOT"),
                _ => false,
            },
        };
        if dangling {
            return Err(ParseError::at_position(
                "Expected expression after NOT operator".to_string(),
                not_span,
            ));
        }

        self.depth += 1;
        if self.depth > MAX_DEPTH {
            self.depth -= 1;
            return Err(ParseError::at_position(
                format!("Query nesting exceeds maximum depth of {}", MAX_DEPTH),
                not_span,
            ));
        }
        let operand = self.parse_not_expression();
        self.depth -= 1;
        Ok(QueryNode::not(operand?))
    }

    /// `( expression )`, `*` or a field query.
    fn parse_primary_expression(&mut self) -> Result<QueryNode, ParseError> {
        let Some(token) = self.peek() else {
            return Err(ParseError::new("Unexpected end of query".to_string(), None));
        };

        match token.kind {
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                match self.peek() {
                    Some(t) if t.kind == TokenKind::RParen => {
                        self.advance();
                        Ok(QueryNode::group(inner))
                    }
                    other => Err(ParseError::new(
                        "Expected closing parenthesis".to_string(),
                        other.map(|t| t.span),
                    )),
                }
            }
            TokenKind::Wildcard if token.value == "*" => {
                self.count_clause(token.span)?;
                self.advance();
                Ok(QueryNode::match_all())
            }
            TokenKind::Field => {
                self.count_clause(token.span)?;
                self.parse_field_query()
            }
            TokenKind::Eof => Err(ParseError::at_position(
                "Unexpected end of query".to_string(),
                token.span,
            )),
            _ => Err(self.unexpected(token)),
        }
    }

    /// `FIELD ':' ( Operator Value | '[' RangeBody ']' | Wildcard | Value )`
    fn parse_field_query(&mut self) -> Result<QueryNode, ParseError> {
        let field_token = self.advance().ok_or_else(|| {
            ParseError::new("Expected field name".to_string(), None)
        })?;
        let field = field_token.value.clone();

        match self.peek() {
            Some(t) if t.kind == TokenKind::Colon => {
                self.advance();
            }
            _ => {
                return Err(ParseError::at_position(
                    format!("Expected ':' after field '{}'", field),
                    field_token.span,
                ));
            }
        }

        let missing_value = || {
            ParseError::at_position(
                format!("Expected value after field '{}:'", field),
                field_token.span,
            )
        };

        let Some(token) = self.peek() else {
            return Err(missing_value());
        };

        match token.kind {
            TokenKind::Operator => {
                self.advance();
                let value = self.parse_value().ok_or_else(|| {
                    ParseError::at_position(
                        format!("Expected value after operator '{}' for field '{}'", token.value, field),
                        token.span,
                    )
                })?;
                Ok(match token.value.as_str() {
                    "=" => QueryNode::Field {
                        field,
                        value,
                        operator: Some(FieldOperator::Eq),
                    },
                    "!=" => QueryNode::Field {
                        field,
                        value,
                        operator: Some(FieldOperator::NotEq),
                    },
                    symbol => match ComparisonOperator::from_symbol(symbol) {
                        Some(operator) => QueryNode::Comparison {
                            field,
                            operator,
                            value,
                        },
                        None => return Err(self.unexpected(token)),
                    },
                })
            }
            TokenKind::LBracket => {
                self.advance();
                self.parse_range_body(field)
            }
            TokenKind::Wildcard => {
                self.advance();
                Ok(QueryNode::Wildcard {
                    field,
                    pattern: token.value.clone(),
                })
            }
            _ => match self.parse_value() {
                Some(value) => Ok(QueryNode::Field {
                    field,
                    value,
                    operator: None,
                }),
                None => Err(missing_value()),
            },
        }
    }

    /// `Value? TO Value? ]`. The opening bracket has been consumed.
    fn parse_range_body(&mut self, field: String) -> Result<QueryNode, ParseError> {
        let min = self.parse_range_bound();

        match self.peek() {
            Some(t) if t.kind == TokenKind::To => {
                self.advance();
            }
            other => {
                return Err(ParseError::new(
                    format!("Expected 'TO' in range query for field '{}'", field),
                    other.map(|t| t.span),
                ));
            }
        }

        let max = self.parse_range_bound();

        match self.peek() {
            Some(t) if t.kind == TokenKind::RBracket => {
                self.advance();
            }
            other => {
                return Err(ParseError::new(
                    format!("Expected ']' to close range query for field '{}'", field),
                    other.map(|t| t.span),
                ));
            }
        }

        Ok(QueryNode::Range {
            field,
            min,
            max,
            inclusive: true,
        })
    }

    /// An optional range bound; `*` stands for an open bound.
    fn parse_range_bound(&mut self) -> Option<QueryValue> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Wildcard && t.value == "*" => {
                self.advance();
                None
            }
            _ => self.parse_value(),
        }
    }

    /// Consume a literal value token if one is next.
    fn parse_value(&mut self) -> Option<QueryValue> {
        let token = self.peek()?;
        let value = match token.kind {
            TokenKind::Value => QueryValue::from_literal(&token.value),
            TokenKind::QuotedValue | TokenKind::Field | TokenKind::Wildcard => {
                QueryValue::String(token.value.clone())
            }
            _ => return None,
        };
        self.advance();
        Some(value)
    }
}
