//! IP address filter: exact, CIDR and wildcard matching on IP fields.
//!
//! The backend has no IP search, so this filter only ever produces a
//! post-processing stage.

use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use super::{Filter, FilterContext, FilterResult, Stage};
use crate::ast::{FieldOperator, QueryNode};
use crate::error::FilterError;
use crate::schema::{EntityType, FieldKind, Record};

static IPV6: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[0-9a-fA-F]{0,4}:){2,7}[0-9a-fA-F]{0,4}$").expect("ipv6 pattern")
});

/// Four dot-separated decimal octets, each 0-255.
pub fn is_valid_ipv4(text: &str) -> bool {
    parse_ipv4(text).is_some()
}

/// Loose IPv6 shape check: hex groups separated by colons.
pub fn is_valid_ipv6(text: &str) -> bool {
    IPV6.is_match(text)
}

fn parse_ipv4(text: &str) -> Option<u32> {
    let parts: Vec<&str> = text.split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut octets = [0u8; 4];
    for (slot, part) in octets.iter_mut().zip(&parts) {
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = part.parse().ok()?;
    }
    Some(u32::from(Ipv4Addr::from(octets)))
}

/// A compiled IP match pattern.
#[derive(Debug, Clone)]
pub enum IpPattern {
    Exact(String),
    Cidr { network: u32, mask: u32 },
    Wildcard(Regex),
    /// Unparseable literal; matches nothing.
    Invalid(String),
}

impl IpPattern {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim();

        if pattern.contains(['*', '?']) {
            return match Regex::new(&wildcard_regex(pattern)) {
                Ok(re) => IpPattern::Wildcard(re),
                Err(_) => IpPattern::Invalid(pattern.to_string()),
            };
        }

        if let Some((address, bits)) = pattern.split_once('/') {
            let Some(address) = parse_ipv4(address) else {
                return IpPattern::Invalid(pattern.to_string());
            };
            return match bits.parse::<u32>() {
                Ok(bits) if bits <= 32 => {
                    let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
                    IpPattern::Cidr {
                        network: address & mask,
                        mask,
                    }
                }
                _ => IpPattern::Invalid(pattern.to_string()),
            };
        }

        if is_valid_ipv4(pattern) || is_valid_ipv6(pattern) {
            IpPattern::Exact(pattern.to_ascii_lowercase())
        } else {
            IpPattern::Invalid(pattern.to_string())
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, IpPattern::Invalid(_))
    }

    pub fn matches(&self, address: &str) -> bool {
        let address = address.trim();
        match self {
            IpPattern::Exact(expected) => address.eq_ignore_ascii_case(expected),
            IpPattern::Cidr { network, mask } => {
                parse_ipv4(address).is_some_and(|ip| ip & mask == *network)
            }
            IpPattern::Wildcard(re) => re.is_match(address),
            IpPattern::Invalid(_) => false,
        }
    }
}

/// Four-part patterns get per-octet classes so `*` never crosses a dot.
fn wildcard_regex(pattern: &str) -> String {
    let parts: Vec<&str> = pattern.split('.').collect();
    if parts.len() == 4 {
        let octets: Vec<String> = parts
            .iter()
            .map(|part| match *part {
                "*" => r"\d{1,3}".to_string(),
                _ => glob_to_regex(part, r"\d*", r"\d"),
            })
            .collect();
        return format!("^{}$", octets.join(r"\."));
    }
    format!("^{}$", glob_to_regex(pattern, "[0-9a-fA-F.:]*", "[0-9a-fA-F.:]"))
}

fn glob_to_regex(glob: &str, star: &str, question: &str) -> String {
    let mut out = String::new();
    for c in glob.chars() {
        match c {
            '*' => out.push_str(star),
            '?' => out.push_str(question),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IpAddressFilter;

impl IpAddressFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Filter for IpAddressFilter {
    fn name(&self) -> &'static str {
        "ip_address"
    }

    fn can_handle(&self, node: &QueryNode, entity: EntityType) -> bool {
        match node {
            QueryNode::Field { field, operator, .. } => {
                !matches!(operator, Some(FieldOperator::Approx))
                    && entity.is_field_of_kind(field, FieldKind::Ip)
            }
            QueryNode::Wildcard { field, .. } => entity.is_field_of_kind(field, FieldKind::Ip),
            _ => false,
        }
    }

    fn apply(&self, node: &QueryNode, context: &FilterContext) -> Result<FilterResult, FilterError> {
        let (field, raw, negate) = match node {
            QueryNode::Field { field, value, operator } => (
                field.clone(),
                value.to_string(),
                matches!(operator, Some(FieldOperator::NotEq)),
            ),
            QueryNode::Wildcard { field, pattern } => (field.clone(), pattern.clone(), false),
            other => {
                return Err(FilterError::Unsupported {
                    filter: self.name(),
                    node: other.to_string(),
                })
            }
        };

        let pattern = IpPattern::parse(&raw);
        let mut result = FilterResult::default().with_cache_key(format!("ip:{}:{}", field, raw));
        if pattern.is_invalid() {
            tracing::warn!(field = %field, pattern = %raw, "invalid IP pattern, no records will match");
            result
                .warnings
                .push(format!("Invalid IP address or pattern '{}' for field '{}'", raw, field));
        }
        if context.debug {
            tracing::debug!(field = %field, ?pattern, negate, "ip filter compiled");
        }

        let stage_name = format!("ip:{}", field);
        let stage = Stage::new(stage_name, move |record: &Record| {
            let matched = record
                .get_text(&field)
                .is_some_and(|address| pattern.matches(&address));
            matched != negate
        });
        result = result.with_stage(stage);
        result.can_optimize = Some(false);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow(source_ip: &str) -> Record {
        Record::new(EntityType::Flows, json!({ "source": { "ip": source_ip } }))
    }

    #[test]
    fn test_ipv4_validation() {
        assert!(is_valid_ipv4("192.168.1.1"));
        assert!(is_valid_ipv4("0.0.0.0"));
        assert!(!is_valid_ipv4("256.1.1.1"));
        assert!(!is_valid_ipv4("1.2.3"));
        assert!(!is_valid_ipv4("1.2.3.4.5"));
        assert!(!is_valid_ipv4("a.b.c.d"));
        assert!(is_valid_ipv6("fe80::1"));
        assert!(is_valid_ipv6("2001:db8:0:0:0:0:2:1"));
        assert!(!is_valid_ipv6("hello"));
    }

    #[test]
    fn test_cidr_matching() {
        let pattern = IpPattern::parse("192.168.1.0/24");
        assert!(pattern.matches("192.168.1.50"));
        assert!(pattern.matches("192.168.1.255"));
        assert!(!pattern.matches("192.168.2.1"));

        assert!(!IpPattern::parse("192.168.2.0/24").matches("192.168.1.50"));
        assert!(IpPattern::parse("0.0.0.0/0").matches("8.8.8.8"));
        assert!(IpPattern::parse("10.0.0.1/32").matches("10.0.0.1"));
        assert!(IpPattern::parse("10.0.0.0/33").is_invalid());
    }

    #[test]
    fn test_wildcard_matching() {
        let pattern = IpPattern::parse("10.0.*.1");
        assert!(pattern.matches("10.0.5.1"));
        assert!(pattern.matches("10.0.255.1"));
        assert!(!pattern.matches("10.1.5.1"));
        assert!(!pattern.matches("10.0.5.5.1"));

        let pattern = IpPattern::parse("192.168.1.1?");
        assert!(pattern.matches("192.168.1.10"));
        assert!(!pattern.matches("192.168.1.1"));

        let pattern = IpPattern::parse("192.168.*");
        assert!(pattern.matches("192.168.3.4"));
        assert!(!pattern.matches("10.168.3.4"));
    }

    #[test]
    fn test_invalid_pattern_fails_closed() {
        let pattern = IpPattern::parse("not-an-ip");
        assert!(pattern.is_invalid());
        assert!(!pattern.matches("not-an-ip"));
        assert!(!pattern.matches("10.0.0.1"));
    }

    #[test]
    fn test_filter_emits_stage_only() {
        let node = QueryNode::field("source_ip", "192.168.1.0/24".into());
        let filter = IpAddressFilter::new();
        assert!(filter.can_handle(&node, EntityType::Flows));

        let result = filter.apply(&node, &FilterContext::new(EntityType::Flows)).unwrap();
        assert!(result.api_params.is_empty());
        assert_eq!(result.cache_key_component.as_deref(), Some("ip:source_ip:192.168.1.0/24"));

        let (kept, trace) = result.apply_post_processing(
            vec![flow("192.168.1.50"), flow("192.168.2.50"), flow("10.0.0.1")],
            false,
        );
        assert_eq!(kept, vec![flow("192.168.1.50")]);
        assert_eq!(trace.stages[0].stage, "ip:source_ip");
    }

    #[test]
    fn test_not_equal_negates() {
        let node = QueryNode::Field {
            field: "source_ip".to_string(),
            value: "10.0.0.1".into(),
            operator: Some(FieldOperator::NotEq),
        };
        let result = IpAddressFilter::new()
            .apply(&node, &FilterContext::new(EntityType::Flows))
            .unwrap();
        let (kept, _) = result.apply_post_processing(vec![flow("10.0.0.1"), flow("10.0.0.2")], false);
        assert_eq!(kept, vec![flow("10.0.0.2")]);
    }

    #[test]
    fn test_invalid_literal_warns() {
        let node = QueryNode::field("source_ip", "999.1.1.1".into());
        let result = IpAddressFilter::new()
            .apply(&node, &FilterContext::new(EntityType::Flows))
            .unwrap();
        assert_eq!(result.warnings.len(), 1);
        let (kept, _) = result.apply_post_processing(vec![flow("999.1.1.1")], false);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_can_handle_respects_entity() {
        let node = QueryNode::field("ip", "10.0.0.1".into());
        let filter = IpAddressFilter::new();
        assert!(filter.can_handle(&node, EntityType::Devices));
        assert!(!filter.can_handle(&node, EntityType::Flows));
        assert!(!filter.can_handle(&QueryNode::field("severity", "high".into()), EntityType::Alarms));
    }
}
