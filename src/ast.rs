//! AST for the search query language.

use serde::Serialize;
use std::fmt;

/// Field name reserved for the match-all query `*`.
pub const MATCH_ALL: &str = "*";

/// Largest integer that round-trips through an f64 without loss.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// A node of the parsed query tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryNode {
    /// `field:value`, `field:=value`, `field:!=value`
    Field {
        field: String,
        value: QueryValue,
        operator: Option<FieldOperator>,
    },
    /// AND / OR / NOT
    Logical(LogicalQuery),
    /// A parenthesised sub-query
    Group { query: Box<QueryNode> },
    /// `field:pattern` where the pattern contains `*` or `?`
    Wildcard { field: String, pattern: String },
    /// `field:[min TO max]`
    Range {
        field: String,
        min: Option<QueryValue>,
        max: Option<QueryValue>,
        inclusive: bool,
    },
    /// `field:>=value` and friends
    Comparison {
        field: String,
        operator: ComparisonOperator,
        value: QueryValue,
    },
}

impl QueryNode {
    pub fn field(field: impl Into<String>, value: QueryValue) -> Self {
        QueryNode::Field {
            field: field.into(),
            value,
            operator: None,
        }
    }

    /// The `*` query, matching every record.
    pub fn match_all() -> Self {
        QueryNode::Field {
            field: MATCH_ALL.to_string(),
            value: QueryValue::String(MATCH_ALL.to_string()),
            operator: None,
        }
    }

    pub fn and(left: QueryNode, right: QueryNode) -> Self {
        QueryNode::Logical(LogicalQuery::And {
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn or(left: QueryNode, right: QueryNode) -> Self {
        QueryNode::Logical(LogicalQuery::Or {
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn not(operand: QueryNode) -> Self {
        QueryNode::Logical(LogicalQuery::Not {
            operand: Box::new(operand),
        })
    }

    pub fn group(query: QueryNode) -> Self {
        QueryNode::Group {
            query: Box::new(query),
        }
    }

    /// Field name for leaf nodes, `None` for logical and group nodes.
    pub fn field_name(&self) -> Option<&str> {
        match self {
            QueryNode::Field { field, .. }
            | QueryNode::Wildcard { field, .. }
            | QueryNode::Range { field, .. }
            | QueryNode::Comparison { field, .. } => Some(field),
            QueryNode::Logical(_) | QueryNode::Group { .. } => None,
        }
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, QueryNode::Field { field, .. } if field == MATCH_ALL)
    }

    pub fn is_leaf(&self) -> bool {
        self.field_name().is_some()
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryNode::Field { field, .. } if field == MATCH_ALL => write!(f, "*"),
            QueryNode::Field { field, value, operator } => match operator {
                Some(FieldOperator::Eq) | None => write!(f, "{}:{}", field, value),
                Some(op) => write!(f, "{}:{}{}", field, op, value),
            },
            QueryNode::Logical(LogicalQuery::And { left, right }) => write!(f, "{} AND {}", left, right),
            QueryNode::Logical(LogicalQuery::Or { left, right }) => write!(f, "{} OR {}", left, right),
            QueryNode::Logical(LogicalQuery::Not { operand }) => write!(f, "NOT {}", operand),
            QueryNode::Group { query } => write!(f, "({})", query),
            QueryNode::Wildcard { field, pattern } => write!(f, "{}:{}", field, pattern),
            QueryNode::Range { field, min, max, .. } => {
                let bound = |v: &Option<QueryValue>| v.as_ref().map_or_else(|| MATCH_ALL.to_string(), |v| v.to_string());
                write!(f, "{}:[{} TO {}]", field, bound(min), bound(max))
            }
            QueryNode::Comparison { field, operator, value } => {
                write!(f, "{}:{}{}", field, operator, value)
            }
        }
    }
}

/// Logical composition. The shape of each variant is fixed: NOT has a
/// single operand, AND/OR have both sides.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operator", rename_all = "UPPERCASE")]
pub enum LogicalQuery {
    And {
        left: Box<QueryNode>,
        right: Box<QueryNode>,
    },
    Or {
        left: Box<QueryNode>,
        right: Box<QueryNode>,
    },
    Not {
        operand: Box<QueryNode>,
    },
}

/// Operators carried by a plain field query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    /// Approximate (case-insensitive substring) match.
    #[serde(rename = "~")]
    Approx,
}

impl fmt::Display for FieldOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldOperator::Eq => write!(f, "="),
            FieldOperator::NotEq => write!(f, "!="),
            FieldOperator::Approx => write!(f, "~"),
        }
    }
}

/// Ordering comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComparisonOperator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
}

impl ComparisonOperator {
    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Gte),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            _ => None,
        }
    }

    pub fn compare_f64(&self, a: f64, b: f64) -> bool {
        match self {
            Self::Gt => a > b,
            Self::Gte => a >= b,
            Self::Lt => a < b,
            Self::Lte => a <= b,
        }
    }

    pub fn compare_str(&self, a: &str, b: &str) -> bool {
        match self {
            Self::Gt => a > b,
            Self::Gte => a >= b,
            Self::Lt => a < b,
            Self::Lte => a <= b,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
        }
    }
}

/// Literal value of a leaf node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    Integer(i64),
    Float(f64),
    String(String),
}

impl QueryValue {
    /// Normalize an unquoted literal: safe integers, then decimals, else text.
    pub fn from_literal(text: &str) -> Self {
        if let Ok(n) = text.parse::<i64>() {
            if n.unsigned_abs() <= MAX_SAFE_INTEGER as u64 {
                return QueryValue::Integer(n);
            }
        }
        if looks_decimal(text) {
            if let Ok(f) = text.parse::<f64>() {
                if f.is_finite() {
                    return QueryValue::Float(f);
                }
            }
        }
        QueryValue::String(text.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            QueryValue::Integer(n) => Some(*n as f64),
            QueryValue::Float(f) => Some(*f),
            QueryValue::String(s) => s.parse().ok(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            QueryValue::Integer(n) => serde_json::Value::from(*n),
            QueryValue::Float(f) => serde_json::Value::from(*f),
            QueryValue::String(s) => serde_json::Value::from(s.as_str()),
        }
    }
}

/// `1.5`, `-2.25`, `.5`: digits with exactly one dot. Keeps IPs and dates text.
fn looks_decimal(text: &str) -> bool {
    let body = text.strip_prefix('-').unwrap_or(text);
    body.matches('.').count() == 1
        && body.chars().all(|c| c.is_ascii_digit() || c == '.')
        && body.chars().any(|c| c.is_ascii_digit())
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValue::Integer(n) => write!(f, "{}", n),
            QueryValue::Float(x) => write!(f, "{}", x),
            QueryValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(s: &str) -> Self {
        QueryValue::String(s.to_string())
    }
}

impl From<i64> for QueryValue {
    fn from(n: i64) -> Self {
        QueryValue::Integer(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_normalization() {
        assert_eq!(QueryValue::from_literal("42"), QueryValue::Integer(42));
        assert_eq!(QueryValue::from_literal("-7"), QueryValue::Integer(-7));
        assert_eq!(QueryValue::from_literal("3.5"), QueryValue::Float(3.5));
        assert_eq!(
            QueryValue::from_literal("192.168.1.1"),
            QueryValue::String("192.168.1.1".to_string())
        );
        assert_eq!(
            QueryValue::from_literal("2024-01-01"),
            QueryValue::String("2024-01-01".to_string())
        );
        // Beyond the safe integer range stays text
        assert_eq!(
            QueryValue::from_literal("9007199254740993"),
            QueryValue::String("9007199254740993".to_string())
        );
    }

    #[test]
    fn test_display_round_trips_syntax() {
        let node = QueryNode::and(
            QueryNode::field("severity", "high".into()),
            QueryNode::group(QueryNode::or(
                QueryNode::field("type", 1.into()),
                QueryNode::not(QueryNode::Comparison {
                    field: "bytes".to_string(),
                    operator: ComparisonOperator::Gte,
                    value: 100.into(),
                }),
            )),
        );
        assert_eq!(
            node.to_string(),
            "severity:high AND (type:1 OR NOT bytes:>=100)"
        );
    }

    #[test]
    fn test_match_all_sentinel() {
        let node = QueryNode::match_all();
        assert!(node.is_match_all());
        assert_eq!(node.field_name(), Some("*"));
        assert_eq!(node.to_string(), "*");
    }

    #[test]
    fn test_comparison_operators() {
        assert!(ComparisonOperator::Gt.compare_f64(6.0, 5.0));
        assert!(!ComparisonOperator::Gt.compare_f64(5.0, 5.0));
        assert!(ComparisonOperator::Gte.compare_f64(5.0, 5.0));
        assert!(ComparisonOperator::Lt.compare_f64(4.0, 5.0));
        assert!(ComparisonOperator::Lte.compare_f64(5.0, 5.0));
        assert_eq!(ComparisonOperator::from_symbol(">="), Some(ComparisonOperator::Gte));
        assert_eq!(ComparisonOperator::from_symbol("!="), None);
    }
}
