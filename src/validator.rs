//! Field validation against entity schemas, and user-facing suggestions.

use crate::ast::{LogicalQuery, QueryNode};
use crate::schema::EntityType;

/// Outcome of walking an AST against one entity's field table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldValidation {
    pub errors: Vec<String>,
    /// Offending field names, in the order they were found
    pub invalid_fields: Vec<String>,
}

impl FieldValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check every field-bearing leaf of `ast` against the fields of `entity`.
/// The match-all sentinel is exempt.
pub fn validate_fields(ast: &QueryNode, entity: EntityType) -> FieldValidation {
    let mut result = FieldValidation::default();
    walk(ast, entity, &mut result);
    result
}

fn walk(node: &QueryNode, entity: EntityType, result: &mut FieldValidation) {
    match node {
        QueryNode::Logical(LogicalQuery::And { left, right })
        | QueryNode::Logical(LogicalQuery::Or { left, right }) => {
            walk(left, entity, result);
            walk(right, entity, result);
        }
        QueryNode::Logical(LogicalQuery::Not { operand }) => walk(operand, entity, result),
        QueryNode::Group { query } => walk(query, entity, result),
        QueryNode::Field { .. }
        | QueryNode::Wildcard { .. }
        | QueryNode::Range { .. }
        | QueryNode::Comparison { .. } => {
            if node.is_match_all() {
                return;
            }
            let Some(field) = node.field_name() else {
                return;
            };
            if !entity.has_field(field) {
                result.errors.push(format!(
                    "Field '{}' is not valid for {}. Valid fields: {}",
                    field,
                    entity,
                    entity.field_names().join(", ")
                ));
                result.invalid_fields.push(field.to_string());
            }
        }
    }
}

/// Build human-readable hints from the raw query text and the errors it produced.
pub fn suggestions(
    query: &str,
    errors: &[String],
    invalid_fields: &[String],
    entity: Option<EntityType>,
) -> Vec<String> {
    let mut suggestions = Vec::new();

    if let Some(entity) = entity {
        if errors.iter().any(|e| e.contains("is not valid for")) {
            for field in invalid_fields {
                if let Some(close) = closest_field(field, entity) {
                    suggestions.push(format!("Did you mean '{}' instead of '{}'?", close, field));
                }
            }
            suggestions.push(format!(
                "Valid fields for {}: {}",
                entity,
                entity.field_names().join(", ")
            ));
        }
    }

    let (parens, brackets) = bracket_balance(query);
    if parens != 0 {
        suggestions.push("Check that all parentheses are balanced".to_string());
    }
    if brackets != 0 {
        suggestions.push("Check that range brackets are balanced, e.g. field:[min TO max]".to_string());
    }
    if has_empty_field_segment(query) {
        suggestions.push("Every field needs a value, e.g. severity:high".to_string());
    }

    suggestions
}

/// The query's characters with every quoted string, quotes included,
/// replaced by `_`.
fn outside_quotes(query: &str) -> Vec<char> {
    let mut chars = Vec::with_capacity(query.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in query.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            chars.push('_');
            continue;
        }
        if c == '"' || c == '\'' {
            quote = Some(c);
            chars.push('_');
        } else {
            chars.push(c);
        }
    }
    chars
}

/// Net count of unclosed `(` and `[` outside quoted strings.
fn bracket_balance(query: &str) -> (i32, i32) {
    let mut parens = 0;
    let mut brackets = 0;
    for c in outside_quotes(query) {
        match c {
            '(' => parens += 1,
            ')' => parens -= 1,
            '[' => brackets += 1,
            ']' => brackets -= 1,
            _ => {}
        }
    }
    (parens, brackets)
}

/// `field:` with nothing after it, or a `:` with no field before it.
/// Colons inside quoted values do not count.
fn has_empty_field_segment(query: &str) -> bool {
    let chars = outside_quotes(query);
    if chars.iter().find(|c| !c.is_whitespace()) == Some(&':') {
        return true;
    }
    chars.iter().enumerate().any(|(i, &c)| {
        c == ':'
            && match chars.get(i + 1) {
                None => true,
                Some(next) => next.is_whitespace() || *next == ')',
            }
    })
}

fn closest_field(field: &str, entity: EntityType) -> Option<&'static str> {
    let field = field.to_ascii_lowercase();
    entity
        .field_names()
        .into_iter()
        .map(|candidate| (candidate, edit_distance(&field, candidate)))
        .filter(|(candidate, distance)| *distance <= 2 || candidate.contains(field.as_str()))
        .min_by_key(|(_, distance)| *distance)
        .map(|(candidate, _)| candidate)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                diagonal
            } else {
                1 + diagonal.min(above).min(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}
