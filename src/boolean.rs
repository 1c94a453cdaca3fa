//! Raw-text rewriting of boolean field conditions.
//!
//! The backend only understands one spelling for boolean values, so before
//! parsing `blocked:true`, `blocked=false` and a bare `blocked` are rewritten
//! to `blocked:1`, `blocked:0` and `blocked:1`. Quoted text is never touched.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::schema::{EntityType, FieldKind};

/// How boolean values are spelled after translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BooleanEncoding {
    /// `1` / `0`
    #[default]
    Numeric,
    /// `true` / `false`
    Literal,
}

impl BooleanEncoding {
    fn spelling(&self) -> (&'static str, &'static str) {
        match self {
            BooleanEncoding::Numeric => ("1", "0"),
            BooleanEncoding::Literal => ("true", "false"),
        }
    }
}

/// Spellings tried, in order, when the backend rejects the primary one.
pub const ALTERNATIVE_SPELLINGS: [(&str, &str); 4] =
    [("true", "false"), ("True", "False"), ("yes", "no"), ("on", "off")];

/// `field:value` / `field=value` for each entity's boolean fields.
static ASSIGNMENTS: LazyLock<Vec<(EntityType, Regex)>> = LazyLock::new(|| {
    EntityType::ALL
        .iter()
        .filter_map(|entity| {
            let fields: Vec<String> = entity
                .fields_of_kind(FieldKind::Boolean)
                .map(regex::escape)
                .collect();
            if fields.is_empty() {
                return None;
            }
            let pattern = format!(
                r"\b({})\s*[:=]\s*(?i:(true|false|yes|no|on|off|1|0))\b",
                fields.join("|")
            );
            Some((*entity, Regex::new(&pattern).expect("boolean field pattern")))
        })
        .collect()
});

fn assignment_pattern(entity: EntityType) -> Option<&'static Regex> {
    ASSIGNMENTS
        .iter()
        .find(|(e, _)| *e == entity)
        .map(|(_, re)| re)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "yes" | "on" | "1")
}

/// Split a query into `(quoted, text)` segments. Quotes keep their delimiters.
fn segments(query: &str) -> Vec<(bool, &str)> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in query.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    out.push((true, &query[start..i + c.len_utf8()]));
                    start = i + c.len_utf8();
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' => {
                if start < i {
                    out.push((false, &query[start..i]));
                }
                start = i;
                quote = Some(c);
            }
            None => {}
        }
    }
    if start < query.len() {
        out.push((quote.is_some(), &query[start..]));
    }
    out
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '*' | '?')
}

/// Rewrite standalone boolean field names to `field:<truthy>`.
fn expand_bare_fields(text: &str, entity: EntityType, truthy: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    // Last non-whitespace character, `None` for a word
    let mut previous: Option<char> = None;

    while let Some((start, c)) = chars.next() {
        if !is_word_char(c) {
            out.push(c);
            if !c.is_whitespace() {
                previous = Some(c);
            }
            continue;
        }

        let mut end = start + c.len_utf8();
        while let Some(&(i, next)) = chars.peek() {
            if !is_word_char(next) {
                break;
            }
            end = i + next.len_utf8();
            chars.next();
        }
        let word = &text[start..end];
        let followed_by_operator = text[end..].starts_with([':', '=', '!', '<', '>']);
        let in_value_position = previous.is_some_and(|p| matches!(p, ':' | '=' | '<' | '>' | '!'));

        out.push_str(word);
        if !followed_by_operator
            && !in_value_position
            && entity.is_field_of_kind(word, FieldKind::Boolean)
        {
            out.push(':');
            out.push_str(truthy);
        }
        previous = None;
    }
    out
}

/// Rewrites boolean field conditions in raw query text.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanFieldTranslator {
    encoding: BooleanEncoding,
}

impl BooleanFieldTranslator {
    pub fn new(encoding: BooleanEncoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> BooleanEncoding {
        self.encoding
    }

    /// Whether the query mentions any boolean field of `entity` outside quotes.
    pub fn needs_translation(&self, query: &str, entity: EntityType) -> bool {
        let mut fields = entity.fields_of_kind(FieldKind::Boolean).peekable();
        if fields.peek().is_none() {
            return false;
        }
        let fields: Vec<&str> = fields.collect();
        segments(query)
            .into_iter()
            .filter(|(quoted, _)| !quoted)
            .flat_map(|(_, text)| text.split(|c: char| !is_word_char(c)))
            .any(|word| fields.contains(&word))
    }

    /// Rewrite with the configured encoding.
    pub fn translate(&self, query: &str, entity: EntityType) -> String {
        let (truthy, falsy) = self.encoding.spelling();
        rewrite(query, entity, truthy, falsy)
    }

    /// The query spelled with each of [`ALTERNATIVE_SPELLINGS`], without duplicates.
    pub fn alternative_encodings(&self, query: &str, entity: EntityType) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for (truthy, falsy) in ALTERNATIVE_SPELLINGS {
            let candidate = rewrite(query, entity, truthy, falsy);
            if !out.contains(&candidate) {
                out.push(candidate);
            }
        }
        out
    }
}

fn rewrite(query: &str, entity: EntityType, truthy: &str, falsy: &str) -> String {
    let Some(pattern) = assignment_pattern(entity) else {
        return query.to_string();
    };

    let mut out = String::with_capacity(query.len());
    for (quoted, text) in segments(query) {
        if quoted {
            out.push_str(text);
            continue;
        }
        let assigned = pattern.replace_all(text, |caps: &regex::Captures| {
            let spelled = if is_truthy(&caps[2]) { truthy } else { falsy };
            format!("{}:{}", &caps[1], spelled)
        });
        out.push_str(&expand_bare_fields(&assigned, entity, truthy));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric() -> BooleanFieldTranslator {
        BooleanFieldTranslator::new(BooleanEncoding::Numeric)
    }

    #[test]
    fn test_translates_explicit_values() {
        let t = numeric();
        assert_eq!(t.translate("blocked:true", EntityType::Flows), "blocked:1");
        assert_eq!(t.translate("blocked=false", EntityType::Flows), "blocked:0");
        assert_eq!(t.translate("blocked:TRUE AND protocol:tcp", EntityType::Flows), "blocked:1 AND protocol:tcp");
        assert_eq!(
            t.translate("resolved:false AND archived:yes", EntityType::Alarms),
            "resolved:0 AND archived:1"
        );
    }

    #[test]
    fn test_translates_bare_fields() {
        let t = numeric();
        assert_eq!(t.translate("online", EntityType::Devices), "online:1");
        assert_eq!(
            t.translate("NOT online AND (ip_reserved OR name:x)", EntityType::Devices),
            "NOT online:1 AND (ip_reserved:1 OR name:x)"
        );
        // a boolean field name used as a value is left alone
        assert_eq!(t.translate("name:online", EntityType::Devices), "name:online");
        assert_eq!(t.translate("online*", EntityType::Devices), "online*");
    }

    #[test]
    fn test_quoted_text_is_untouched() {
        let t = numeric();
        assert_eq!(
            t.translate(r#"message:"blocked:true" AND blocked:true"#, EntityType::Flows),
            r#"message:"blocked:true" AND blocked:1"#
        );
        assert_eq!(t.translate("name:'online'", EntityType::Devices), "name:'online'");
    }

    #[test]
    fn test_translation_is_idempotent() {
        let t = numeric();
        for query in ["blocked:true", "online AND ip_reserved:false", "disabled=on", "*"] {
            let entity = if query.starts_with("blocked") {
                EntityType::Flows
            } else if query.starts_with("disabled") {
                EntityType::Rules
            } else {
                EntityType::Devices
            };
            let once = t.translate(query, entity);
            assert_eq!(t.translate(&once, entity), once);
        }
    }

    #[test]
    fn test_other_fields_and_entities_unchanged() {
        let t = numeric();
        assert_eq!(t.translate("blocked:true", EntityType::Alarms), "blocked:true");
        assert_eq!(t.translate("name:true", EntityType::TargetLists), "name:true");
        assert_eq!(t.translate("count:10", EntityType::Flows), "count:10");
    }

    #[test]
    fn test_literal_encoding() {
        let t = BooleanFieldTranslator::new(BooleanEncoding::Literal);
        assert_eq!(t.translate("blocked:1", EntityType::Flows), "blocked:true");
        assert_eq!(t.translate("blocked", EntityType::Flows), "blocked:true");
    }

    #[test]
    fn test_needs_translation() {
        let t = numeric();
        assert!(t.needs_translation("blocked:true", EntityType::Flows));
        assert!(!t.needs_translation("protocol:tcp", EntityType::Flows));
        assert!(!t.needs_translation(r#"message:"blocked""#, EntityType::Flows));
        assert!(!t.needs_translation("name:x", EntityType::TargetLists));
    }

    #[test]
    fn test_alternative_encodings() {
        let t = numeric();
        assert_eq!(
            t.alternative_encodings("blocked:1 AND protocol:tcp", EntityType::Flows),
            vec![
                "blocked:true AND protocol:tcp".to_string(),
                "blocked:True AND protocol:tcp".to_string(),
                "blocked:yes AND protocol:tcp".to_string(),
                "blocked:on AND protocol:tcp".to_string(),
            ]
        );
        assert_eq!(
            t.alternative_encodings("protocol:tcp", EntityType::Flows),
            vec!["protocol:tcp".to_string()]
        );
    }
}
