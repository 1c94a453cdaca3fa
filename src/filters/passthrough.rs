//! Filters whose values the backend accepts verbatim.

use super::{Filter, FilterContext, FilterResult};
use crate::ast::{FieldOperator, QueryNode};
use crate::error::FilterError;
use crate::schema::EntityType;

/// Forward `field:value` to an API parameter of the same name.
fn pass_through(
    filter: &'static str,
    param: &str,
    node: &QueryNode,
    context: &FilterContext,
) -> Result<FilterResult, FilterError> {
    let QueryNode::Field { field, value, operator: None | Some(FieldOperator::Eq) } = node else {
        return Err(FilterError::Unsupported {
            filter,
            node: node.to_string(),
        });
    };

    if context.debug {
        tracing::debug!(filter, field = %field, value = %value, "passing value to backend");
    }

    let mut result = FilterResult::default()
        .with_param(param, value.to_json())
        .with_cache_key(format!("{}:{}", field, value));
    result.can_optimize = Some(true);
    Ok(result)
}

fn is_equality_on(node: &QueryNode, name: &str, entity: EntityType) -> bool {
    matches!(
        node,
        QueryNode::Field { field, operator: None | Some(FieldOperator::Eq), .. } if field == name
    ) && entity.has_field(name)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SeverityFilter;

impl SeverityFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Filter for SeverityFilter {
    fn name(&self) -> &'static str {
        "severity"
    }

    fn can_handle(&self, node: &QueryNode, entity: EntityType) -> bool {
        is_equality_on(node, "severity", entity)
    }

    fn apply(&self, node: &QueryNode, context: &FilterContext) -> Result<FilterResult, FilterError> {
        pass_through(self.name(), "severity", node, context)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolFilter;

impl ProtocolFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Filter for ProtocolFilter {
    fn name(&self) -> &'static str {
        "protocol"
    }

    fn can_handle(&self, node: &QueryNode, entity: EntityType) -> bool {
        is_equality_on(node, "protocol", entity)
    }

    fn apply(&self, node: &QueryNode, context: &FilterContext) -> Result<FilterResult, FilterError> {
        pass_through(self.name(), "protocol", node, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_passes_through() {
        let node = QueryNode::field("severity", "high".into());
        let filter = SeverityFilter::new();
        assert!(filter.can_handle(&node, EntityType::Alarms));

        let result = filter.apply(&node, &FilterContext::new(EntityType::Alarms)).unwrap();
        assert_eq!(result.api_params["severity"], json!("high"));
        assert_eq!(result.cache_key_component.as_deref(), Some("severity:high"));
        assert_eq!(result.can_optimize, Some(true));
        assert!(result.post_processing.is_none());
    }

    #[test]
    fn test_protocol_passes_through() {
        let node = QueryNode::field("protocol", "tcp".into());
        let result = ProtocolFilter::new()
            .apply(&node, &FilterContext::new(EntityType::Flows))
            .unwrap();
        assert_eq!(result.api_params["protocol"], json!("tcp"));
        assert_eq!(result.cache_key_component.as_deref(), Some("protocol:tcp"));
    }

    #[test]
    fn test_only_plain_equality_is_handled() {
        let filter = SeverityFilter::new();
        let negated = QueryNode::Field {
            field: "severity".to_string(),
            value: "low".into(),
            operator: Some(FieldOperator::NotEq),
        };
        assert!(!filter.can_handle(&negated, EntityType::Alarms));
        assert!(filter.apply(&negated, &FilterContext::new(EntityType::Alarms)).is_err());

        // flows have no severity field
        assert!(!filter.can_handle(&QueryNode::field("severity", "high".into()), EntityType::Flows));
        assert!(!ProtocolFilter::new().can_handle(&QueryNode::field("severity", "tcp".into()), EntityType::Flows));
    }
}
