//! Lightweight component parser and complexity scorer.
//!
//! This is a flat dialect, separate from the full parser: the query is split
//! on whitespace (quotes and range brackets stay intact), `AND`/`OR`/`NOT`
//! attach to the component that follows them and grouping parentheses are
//! dropped. It is cheap enough to run before the full parse as an admission
//! gate, and it produces a normalized query with the cheapest conditions
//! first.

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

/// Default admission ceiling.
pub const DEFAULT_MAX_COMPLEXITY: f64 = 10.0;

/// Extra weight carried by each logical operator.
pub const LOGICAL_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Connective {
    And,
    Or,
    Not,
}

impl Connective {
    fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "AND" => Some(Connective::And),
            "OR" => Some(Connective::Or),
            "NOT" => Some(Connective::Not),
            _ => None,
        }
    }
}

impl fmt::Display for Connective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connective::And => write!(f, "AND"),
            Connective::Or => write!(f, "OR"),
            Connective::Not => write!(f, "NOT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
    StartsWith,
    EndsWith,
    Range,
    Regex,
}

impl ComponentOperator {
    pub fn weight(&self) -> f64 {
        match self {
            Self::Eq | Self::Ne => 1.0,
            Self::Gt | Self::Gte | Self::Lt | Self::Lte => 1.2,
            Self::In => 1.5,
            Self::Contains | Self::StartsWith | Self::EndsWith => 2.0,
            Self::Range => 2.5,
            Self::Regex => 3.0,
        }
    }
}

/// One condition of a flat query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryComponent {
    /// `None` for free text
    pub field: Option<String>,
    pub operator: ComponentOperator,
    pub value: Value,
    /// Connectives written before this component, in order
    pub logical: Vec<Connective>,
    /// Component text as written, without connectives
    pub text: String,
}

impl QueryComponent {
    /// Operator weight plus the weight of attached connectives.
    pub fn complexity(&self) -> f64 {
        self.operator.weight() + LOGICAL_WEIGHT * self.logical.len() as f64
    }
}

impl fmt::Display for QueryComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for connective in &self.logical {
            write!(f, "{} ", connective)?;
        }
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedQuery {
    pub components: Vec<QueryComponent>,
    /// Distinct field names in order of first use
    pub filters: Vec<String>,
    pub optimized: String,
    pub complexity: f64,
    pub warnings: Vec<String>,
}

/// Outcome of [`validate_query`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplexityValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub parsed: ParsedQuery,
}

/// Split on whitespace outside quotes and `[...]`.
fn split_words(query: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut depth = 0usize;

    for c in query.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// `true`/`false`, integers and floats become JSON scalars, the rest stays text.
fn coerce(text: &str) -> Value {
    let text = text.trim();
    match text.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return json!(n);
    }
    if let Ok(f) = text.parse::<f64>() {
        if f.is_finite() {
            return json!(f);
        }
    }
    Value::String(text.to_string())
}

fn unquote(text: &str) -> Option<String> {
    let mut chars = text.chars();
    let first = chars.next()?;
    if !(first == '"' || first == '\'') || text.len() < 2 || !text.ends_with(first) {
        return None;
    }
    let inner = &text[1..text.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for c in inner.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// Anchored regex source for a `*`/`?` glob.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

fn is_wildcard(text: &str) -> bool {
    text.contains(['*', '?'])
}

/// Operator and value for the part after `field:`.
fn classify_value(raw: &str) -> (ComponentOperator, Value) {
    if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        let parts: Vec<&str> = inner.split_whitespace().collect();
        if let Some(to) = parts.iter().position(|p| p.eq_ignore_ascii_case("TO")) {
            let min = parts[..to].join(" ");
            let max = parts[to + 1..].join(" ");
            return (
                ComponentOperator::Range,
                json!({ "min": coerce(&min), "max": coerce(&max) }),
            );
        }
    }

    for (symbol, operator) in [
        (">=", ComponentOperator::Gte),
        ("<=", ComponentOperator::Lte),
        ("!=", ComponentOperator::Ne),
        (">", ComponentOperator::Gt),
        ("<", ComponentOperator::Lt),
        ("=", ComponentOperator::Eq),
    ] {
        if let Some(rest) = raw.strip_prefix(symbol) {
            let value = unquote(rest).map(Value::String).unwrap_or_else(|| coerce(rest));
            return (operator, value);
        }
    }

    if raw.len() >= 2 && raw.starts_with('/') && raw.ends_with('/') {
        return (ComponentOperator::Regex, Value::String(raw[1..raw.len() - 1].to_string()));
    }

    if let Some(literal) = unquote(raw) {
        return (ComponentOperator::Eq, Value::String(literal));
    }

    if raw.contains(',') {
        let items: Vec<Value> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(coerce)
            .collect();
        return (ComponentOperator::In, Value::Array(items));
    }

    if is_wildcard(raw) {
        let inner = raw.strip_prefix('*').and_then(|r| r.strip_suffix('*'));
        if let Some(inner) = inner.filter(|i| !i.is_empty() && !is_wildcard(i)) {
            return (ComponentOperator::Contains, Value::String(inner.to_string()));
        }
        if let Some(prefix) = raw.strip_suffix('*').filter(|p| !p.is_empty() && !is_wildcard(p)) {
            return (ComponentOperator::StartsWith, Value::String(prefix.to_string()));
        }
        if let Some(suffix) = raw.strip_prefix('*').filter(|s| !s.is_empty() && !is_wildcard(s)) {
            return (ComponentOperator::EndsWith, Value::String(suffix.to_string()));
        }
        return (ComponentOperator::Regex, Value::String(glob_to_regex(raw)));
    }

    (ComponentOperator::Eq, coerce(raw))
}

/// Index of the first `:` outside quotes.
fn field_separator(text: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == ':' => return Some(i),
            None => {}
        }
    }
    None
}

fn classify(text: &str, logical: Vec<Connective>) -> QueryComponent {
    let (field, operator, value) = match field_separator(text) {
        Some(i) if i > 0 => {
            let (operator, value) = classify_value(&text[i + 1..]);
            (Some(text[..i].to_string()), operator, value)
        }
        _ => {
            let literal = unquote(text).unwrap_or_else(|| text.to_string());
            (None, ComponentOperator::Contains, Value::String(literal))
        }
    };
    QueryComponent {
        field,
        operator,
        value,
        logical,
        text: text.to_string(),
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Split a query into scored components.
pub fn parse_components(query: &str) -> ParsedQuery {
    let mut components = Vec::new();
    let mut warnings = Vec::new();
    let mut pending: Vec<Connective> = Vec::new();
    let mut stripped_parens = false;

    for word in split_words(query) {
        if let Some(connective) = Connective::from_word(&word) {
            pending.push(connective);
            continue;
        }

        let trimmed = word.trim_start_matches('(');
        let trimmed = if trimmed.starts_with(['"', '\'']) && unquote(trimmed).is_some() {
            trimmed
        } else {
            trimmed.trim_end_matches(')')
        };
        if trimmed.len() != word.len() {
            stripped_parens = true;
        }
        if trimmed.is_empty() {
            continue;
        }
        // `(NOT` and friends
        if let Some(connective) = Connective::from_word(trimmed) {
            pending.push(connective);
            continue;
        }

        components.push(classify(trimmed, std::mem::take(&mut pending)));
    }

    if stripped_parens {
        warnings.push("Grouping parentheses are ignored when scoring query components".to_string());
    }
    for connective in &pending {
        warnings.push(format!("Dangling logical operator '{}' ignored", connective));
    }

    let dangling = LOGICAL_WEIGHT * pending.len() as f64;
    let complexity = round2(components.iter().map(QueryComponent::complexity).sum::<f64>() + dangling);

    let mut filters: Vec<String> = Vec::new();
    for field in components.iter().filter_map(|c| c.field.as_ref()) {
        if !filters.contains(field) {
            filters.push(field.clone());
        }
    }

    let mut ordered: Vec<&QueryComponent> = components.iter().collect();
    ordered.sort_by(|a, b| a.operator.weight().total_cmp(&b.operator.weight()));
    let optimized = ordered
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ");

    ParsedQuery {
        components,
        filters,
        optimized,
        complexity,
        warnings,
    }
}

/// Admission check: complexity ceiling and regex well-formedness.
pub fn validate_query(query: &str, max_complexity: f64) -> ComplexityValidation {
    let parsed = parse_components(query);
    let mut errors = Vec::new();

    if parsed.complexity > max_complexity {
        tracing::warn!(complexity = parsed.complexity, max_complexity, "query rejected as too complex");
        errors.push(format!(
            "Query complexity {} exceeds maximum allowed {}",
            parsed.complexity, max_complexity
        ));
    }

    for component in parsed
        .components
        .iter()
        .filter(|c| c.operator == ComponentOperator::Regex)
    {
        let pattern = component.value.as_str().unwrap_or_default();
        if let Err(e) = Regex::new(pattern) {
            errors.push(format!("Invalid regex pattern '{}': {}", pattern, e));
        }
    }

    ComplexityValidation {
        is_valid: errors.is_empty(),
        errors,
        parsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operators(query: &str) -> Vec<ComponentOperator> {
        parse_components(query).components.iter().map(|c| c.operator).collect()
    }

    #[test]
    fn test_classification() {
        use ComponentOperator::*;
        assert_eq!(
            operators(r#"a:1 b:>=2 c:<3 d:!=x e:=y f:[1 TO 5] g:x,y,3 h:"quoted, text" i:/ab+c/"#),
            vec![Eq, Gte, Lt, Ne, Eq, Range, In, Eq, Regex]
        );
        assert_eq!(
            operators("n:*laptop* n:laptop* n:*laptop n:lap*top n:l?p free"),
            vec![Contains, StartsWith, EndsWith, Regex, Regex, Contains]
        );
    }

    #[test]
    fn test_values_are_coerced() {
        let parsed = parse_components("a:true b:42 c:1.5 d:high e:1,two,false f:[10 TO 20]");
        let values: Vec<&Value> = parsed.components.iter().map(|c| &c.value).collect();
        assert_eq!(values[0], &json!(true));
        assert_eq!(values[1], &json!(42));
        assert_eq!(values[2], &json!(1.5));
        assert_eq!(values[3], &json!("high"));
        assert_eq!(values[4], &json!([1, "two", false]));
        assert_eq!(values[5], &json!({ "min": 10, "max": 20 }));
    }

    #[test]
    fn test_wildcard_regex_is_anchored() {
        let parsed = parse_components("name:lap*top.?");
        assert_eq!(parsed.components[0].value, json!(r"^lap.*top\..$"));
    }

    #[test]
    fn test_complexity_and_filters() {
        let parsed = parse_components("severity:high AND bytes:>100 OR name:*x*");
        // 1 + (1.2 + 0.5) + (2 + 0.5)
        assert_eq!(parsed.complexity, 5.2);
        assert_eq!(parsed.filters, vec!["severity", "bytes", "name"]);

        let parsed = parse_components("type:1 type:2 free");
        assert_eq!(parsed.filters, vec!["type"]);
    }

    #[test]
    fn test_optimized_puts_cheap_components_first() {
        let parsed = parse_components("ts:[1 TO 2] AND name:*x* AND severity:high");
        assert_eq!(parsed.optimized, "AND severity:high AND name:*x* ts:[1 TO 2]");
    }

    #[test]
    fn test_round_trip_preserves_components_and_score() {
        for query in [
            "severity:high AND (type:1 OR type:2)",
            "ts:[1 TO 2] AND NOT name:*x* OR bytes:>=10 message:\"a b\"",
            "a:/x+/ b:1,2,3 c:!=4",
        ] {
            let first = parse_components(query);
            let second = parse_components(&first.optimized);
            assert_eq!(first.components.len(), second.components.len(), "{}", query);
            assert_eq!(first.complexity, second.complexity, "{}", query);
        }
    }

    #[test]
    fn test_adding_a_clause_never_lowers_complexity() {
        let mut query = String::from("severity:high");
        let mut previous = parse_components(&query).complexity;
        for clause in ["type:1", "bytes:>10", "name:*a*", "ts:[1 TO 2]", "x:/y/"] {
            query = format!("{} AND {}", query, clause);
            let next = parse_components(&query).complexity;
            assert!(next >= previous);
            previous = next;
        }
    }

    #[test]
    fn test_parentheses_are_stripped_with_warning() {
        let parsed = parse_components("severity:high AND (type:1 OR type:2)");
        assert_eq!(parsed.components[1].text, "type:1");
        assert_eq!(parsed.components[2].text, "type:2");
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.complexity, 4.0);
    }

    #[test]
    fn test_dangling_connectives_still_score() {
        let parsed = parse_components("severity:high AND");
        assert_eq!(parsed.components.len(), 1);
        assert_eq!(parsed.warnings, vec!["Dangling logical operator 'AND' ignored".to_string()]);
        assert_eq!(parsed.complexity, 1.5);

        assert_eq!(parse_components("severity:high AND NOT").complexity, 2.0);
        assert!(parse_components("a:1 OR").complexity > parse_components("a:1").complexity);
    }

    #[test]
    fn test_twelve_clauses_exceed_the_default_ceiling() {
        let query = (1..=12)
            .map(|i| format!("field{}:value", i))
            .collect::<Vec<_>>()
            .join(" AND ");
        let result = validate_query(&query, DEFAULT_MAX_COMPLEXITY);

        assert!(!result.is_valid);
        assert_eq!(result.parsed.complexity, 17.5);
        assert_eq!(result.errors, vec!["Query complexity 17.5 exceeds maximum allowed 10".to_string()]);
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let result = validate_query("name:/(unclosed/", DEFAULT_MAX_COMPLEXITY);
        assert!(!result.is_valid);
        assert!(result.errors[0].starts_with("Invalid regex pattern '(unclosed':"));

        assert!(validate_query("name:/ok+/ AND severity:high", DEFAULT_MAX_COMPLEXITY).is_valid);
    }
}
