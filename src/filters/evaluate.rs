//! Record evaluator: compiles any query node into a record predicate.
//!
//! Used for the parts of a query that no filter can push to the backend.
//! Field values are read through the entity schema, so a field that is
//! missing from a record never matches a positive condition.

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::cmp::Ordering;
use std::net::IpAddr;
use std::sync::Arc;

use super::ip::IpPattern;
use super::time_range::{record_timestamp, TimeRangeFilter};
use super::{FilterContext, Predicate};
use crate::ast::{ComparisonOperator, FieldOperator, LogicalQuery, QueryNode, QueryValue};
use crate::error::FilterError;
use crate::schema::{severity_rank, FieldKind, Record};

/// Build a predicate equivalent to `node` for records of `context.entity`.
pub fn compile_predicate(node: &QueryNode, context: &FilterContext) -> Result<Predicate, FilterError> {
    if node.is_match_all() {
        return Ok(Arc::new(|_: &Record| true));
    }

    let kind = node
        .field_name()
        .and_then(|field| context.entity.field(field))
        .map(|spec| spec.kind);

    match node {
        QueryNode::Logical(LogicalQuery::And { left, right }) => {
            let (left, right) = (compile_predicate(left, context)?, compile_predicate(right, context)?);
            Ok(Arc::new(move |r: &Record| left(r) && right(r)))
        }
        QueryNode::Logical(LogicalQuery::Or { left, right }) => {
            let (left, right) = (compile_predicate(left, context)?, compile_predicate(right, context)?);
            Ok(Arc::new(move |r: &Record| left(r) || right(r)))
        }
        QueryNode::Logical(LogicalQuery::Not { operand }) => {
            let operand = compile_predicate(operand, context)?;
            Ok(Arc::new(move |r: &Record| !operand(r)))
        }
        QueryNode::Group { query } => compile_predicate(query, context),

        QueryNode::Field { field, value, operator } => {
            let field = field.clone();
            match (kind, operator) {
                (_, Some(FieldOperator::Approx)) => {
                    let needle = value.to_string().to_lowercase();
                    Ok(Arc::new(move |r: &Record| {
                        r.get_text(&field)
                            .is_some_and(|text| text.to_lowercase().contains(&needle))
                    }))
                }
                (Some(FieldKind::Ip), _) => {
                    let negate = matches!(operator, Some(FieldOperator::NotEq));
                    let pattern = IpPattern::parse(&value.to_string());
                    Ok(Arc::new(move |r: &Record| {
                        r.get_text(&field).is_some_and(|ip| pattern.matches(&ip)) != negate
                    }))
                }
                (Some(FieldKind::Timestamp), _) => {
                    let negate = matches!(operator, Some(FieldOperator::NotEq));
                    let bounds = TimeRangeFilter::new().bounds(node, context)?;
                    Ok(Arc::new(move |r: &Record| {
                        r.get(&field)
                            .and_then(record_timestamp)
                            .is_some_and(|ts| bounds.contains(ts))
                            != negate
                    }))
                }
                (_, Some(FieldOperator::NotEq)) => {
                    let expected = value.clone();
                    Ok(Arc::new(move |r: &Record| {
                        !r.get(&field).is_some_and(|actual| value_equals(actual, &expected))
                    }))
                }
                _ => {
                    let expected = value.clone();
                    Ok(Arc::new(move |r: &Record| {
                        r.get(&field).is_some_and(|actual| value_equals(actual, &expected))
                    }))
                }
            }
        }

        QueryNode::Wildcard { field, pattern } => {
            let field = field.clone();
            if kind == Some(FieldKind::Ip) {
                let pattern = IpPattern::parse(pattern);
                return Ok(Arc::new(move |r: &Record| {
                    r.get_text(&field).is_some_and(|ip| pattern.matches(&ip))
                }));
            }
            let re = wildcard_regex(pattern)?;
            Ok(Arc::new(move |r: &Record| {
                r.get_text(&field).is_some_and(|text| re.is_match(&text))
            }))
        }

        QueryNode::Range { field, min, max, inclusive } => {
            let field = field.clone();
            if kind == Some(FieldKind::Timestamp) {
                let bounds = TimeRangeFilter::new().bounds(node, context)?;
                return Ok(Arc::new(move |r: &Record| {
                    r.get(&field).and_then(record_timestamp).is_some_and(|ts| bounds.contains(ts))
                }));
            }
            let (min, max, inclusive) = (min.clone(), max.clone(), *inclusive);
            Ok(Arc::new(move |r: &Record| {
                let Some(actual) = r.get(&field) else {
                    return false;
                };
                let above = min.as_ref().is_none_or(|min| match compare(actual, min, kind) {
                    Some(Ordering::Greater) => true,
                    Some(Ordering::Equal) => inclusive,
                    _ => false,
                });
                let below = max.as_ref().is_none_or(|max| match compare(actual, max, kind) {
                    Some(Ordering::Less) => true,
                    Some(Ordering::Equal) => inclusive,
                    _ => false,
                });
                above && below
            }))
        }

        QueryNode::Comparison { field, operator, value } => {
            let field = field.clone();
            if kind == Some(FieldKind::Timestamp) {
                let bounds = TimeRangeFilter::new().bounds(node, context)?;
                return Ok(Arc::new(move |r: &Record| {
                    r.get(&field).and_then(record_timestamp).is_some_and(|ts| bounds.contains(ts))
                }));
            }
            let (operator, expected) = (*operator, value.clone());
            Ok(Arc::new(move |r: &Record| {
                r.get(&field)
                    .and_then(|actual| compare(actual, &expected, kind))
                    .is_some_and(|ordering| ordering_satisfies(operator, ordering))
            }))
        }
    }
}

fn ordering_satisfies(operator: ComparisonOperator, ordering: Ordering) -> bool {
    match operator {
        ComparisonOperator::Gt => ordering == Ordering::Greater,
        ComparisonOperator::Gte => ordering != Ordering::Less,
        ComparisonOperator::Lt => ordering == Ordering::Less,
        ComparisonOperator::Lte => ordering != Ordering::Greater,
    }
}

/// Anchored, case-insensitive regex for a `*`/`?` glob.
pub fn wildcard_regex(pattern: &str) -> Result<Regex, FilterError> {
    let mut source = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            c => source.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .map_err(|e| FilterError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric when both sides are numbers, else case-insensitive text equality.
/// Booleans accept `true`/`1` and `false`/`0`.
fn value_equals(actual: &Value, expected: &QueryValue) -> bool {
    if let Value::Bool(b) = actual {
        let text = expected.to_string().to_ascii_lowercase();
        return match text.as_str() {
            "true" | "1" | "yes" | "on" => *b,
            "false" | "0" | "no" | "off" => !*b,
            _ => false,
        };
    }
    if let (Some(a), Some(e)) = (as_number(actual), expected.as_f64()) {
        return a == e;
    }
    as_text(actual).is_some_and(|text| text.eq_ignore_ascii_case(&expected.to_string()))
}

/// Ordering of a record value against a query literal. Severity levels
/// compare by rank and IP addresses by address; both are unordered against
/// anything else. Other fields compare numerically when both sides are
/// numeric, else lexicographically.
fn compare(actual: &Value, expected: &QueryValue, kind: Option<FieldKind>) -> Option<Ordering> {
    match kind {
        Some(FieldKind::Severity) => {
            if let Some(e) = severity_rank(&expected.to_string()) {
                let a = severity_rank(&as_text(actual)?)?;
                return Some(a.cmp(&e));
            }
        }
        Some(FieldKind::Ip) => {
            let a: IpAddr = as_text(actual)?.trim().parse().ok()?;
            let e: IpAddr = expected.to_string().trim().parse().ok()?;
            return match (a, e) {
                (IpAddr::V4(a), IpAddr::V4(e)) => Some(u32::from(a).cmp(&u32::from(e))),
                (IpAddr::V6(a), IpAddr::V6(e)) => Some(a.cmp(&e)),
                _ => None,
            };
        }
        _ => {}
    }
    if let (Some(a), Some(e)) = (as_number(actual), expected.as_f64()) {
        return a.partial_cmp(&e);
    }
    let text = as_text(actual)?;
    Some(text.as_str().cmp(expected.to_string().as_str()))
}
