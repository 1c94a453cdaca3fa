//! Filter registry and whole-query compilation.

use super::evaluate::compile_predicate;
use super::{
    Filter, FilterContext, FilterResult, IpAddressFilter, ProtocolFilter, SeverityFilter, Stage,
    TimeRangeFilter,
};
use crate::ast::{LogicalQuery, QueryNode};
use crate::error::FilterError;

/// Ordered registry of filters. Order matters: later results win on
/// conflicting API parameters and their stages run later.
pub struct FilterFactory {
    filters: Vec<Box<dyn Filter>>,
}

impl Default for FilterFactory {
    fn default() -> Self {
        Self {
            filters: vec![
                Box::new(TimeRangeFilter::new()),
                Box::new(IpAddressFilter::new()),
                Box::new(SeverityFilter::new()),
                Box::new(ProtocolFilter::new()),
            ],
        }
    }
}

impl FilterFactory {
    /// Factory with no filters registered.
    pub fn new() -> Self {
        Self { filters: Vec::new() }
    }

    pub fn register(&mut self, filter: Box<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn filters(&self) -> impl Iterator<Item = &dyn Filter> {
        self.filters.iter().map(|f| f.as_ref())
    }

    /// Names of the filters that accept `node`.
    pub fn handlers(&self, node: &QueryNode, context: &FilterContext) -> Vec<&'static str> {
        self.filters()
            .filter(|f| f.can_handle(node, context.entity))
            .map(|f| f.name())
            .collect()
    }

    /// Apply every filter that can handle `node`, merging in registration order.
    pub fn apply(&self, node: &QueryNode, context: &FilterContext) -> Result<FilterResult, FilterError> {
        let mut result = FilterResult::default();
        for filter in self.filters() {
            if filter.can_handle(node, context.entity) {
                result.merge(filter.apply(node, context)?);
            }
        }
        Ok(result)
    }

    /// Compile a whole query.
    ///
    /// Each top-level conjunct goes to the filters that handle it. Conjuncts
    /// no filter handles, such as OR subtrees, become evaluator stages. The
    /// merged result is also recorded on `context`.
    pub fn compile(&self, ast: &QueryNode, context: &mut FilterContext) -> Result<FilterResult, FilterError> {
        let mut conjuncts = Vec::new();
        flatten_conjunction(ast, &mut conjuncts);

        let clauses = conjuncts.len();

        let mut total = FilterResult::default();
        for node in conjuncts {
            if node.is_match_all() {
                if clauses > 1 {
                    context
                        .metadata
                        .optimizations
                        .push("dropped match-all clause".to_string());
                }
                continue;
            }

            let handlers = self.handlers(node, context);
            let result = if handlers.is_empty() {
                let predicate = compile_predicate(node, context)?;
                let mut residual = FilterResult::default()
                    .with_stage(Stage::from_predicate(format!("residual:{}", node), predicate))
                    .with_cache_key(format!("query:{}", node));
                residual.can_optimize = Some(false);
                context.metadata.filters_applied.push("evaluate".to_string());
                residual
            } else {
                let result = self.apply(node, context)?;
                for name in &handlers {
                    context.metadata.filters_applied.push(name.to_string());
                }
                if result.post_processing.is_none() && !result.api_params.is_empty() {
                    context
                        .metadata
                        .optimizations
                        .push(format!("pushed '{}' to backend parameters", node));
                }
                result
            };

            if context.debug {
                tracing::debug!(
                    clause = %node,
                    params = result.api_params.len(),
                    stages = result.post_processing.as_ref().map_or(0, |p| p.len()),
                    "clause compiled"
                );
            }
            total.merge(result);
        }

        for (key, value) in &total.api_params {
            context.api_params.insert(key.clone(), value.clone());
        }
        if let Some(stages) = &total.post_processing {
            context.post_processing.extend(stages.clone());
        }
        context.metadata.cache_key = total.cache_key_component.clone();
        context.metadata.warnings.extend(total.warnings.iter().cloned());

        Ok(total)
    }
}

/// Collect the operands of the top-level AND chain, looking through groups.
fn flatten_conjunction<'a>(node: &'a QueryNode, out: &mut Vec<&'a QueryNode>) {
    match node {
        QueryNode::Logical(LogicalQuery::And { left, right }) => {
            flatten_conjunction(left, out);
            flatten_conjunction(right, out);
        }
        QueryNode::Group { query } => flatten_conjunction(query, out),
        other => out.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::schema::{EntityType, Record};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn compile(query: &str, entity: EntityType) -> (FilterResult, FilterContext) {
        let ast = parse(query, Some(entity)).ast.expect("valid query");
        let mut context = FilterContext::new(entity).with_now(Utc.timestamp_opt(1_705_329_342, 0).unwrap());
        let result = FilterFactory::default().compile(&ast, &mut context).unwrap();
        (result, context)
    }

    #[test]
    fn test_alarm_query_goes_to_backend() {
        let (result, context) = compile("severity:high AND timestamp:>=24h", EntityType::Alarms);

        assert_eq!(result.api_params["severity"], json!("high"));
        assert_eq!(result.api_params["start_time"], json!("2024-01-14T14:35:42Z"));
        assert!(result.post_processing.is_none());
        assert_eq!(result.can_optimize, Some(true));
        assert_eq!(
            result.cache_key_component.as_deref(),
            Some("severity:high|time:timestamp:1705242942-*")
        );
        assert_eq!(context.metadata.filters_applied, vec!["severity", "time_range"]);
        assert_eq!(context.api_params, result.api_params);
        assert_eq!(context.metadata.cache_key, result.cache_key_component);
    }

    #[test]
    fn test_residual_or_becomes_stage() {
        let (result, context) = compile("severity:high AND (type:1 OR type:2)", EntityType::Alarms);

        assert_eq!(result.api_params["severity"], json!("high"));
        let stages = result.post_processing.as_ref().unwrap();
        assert_eq!(stages.stage_names(), vec!["residual:type:1 OR type:2".to_string()]);
        assert_eq!(result.can_optimize, Some(false));
        assert_eq!(context.post_processing.len(), 1);

        let records = vec![
            Record::new(EntityType::Alarms, json!({ "severity": "high", "type": 1 })),
            Record::new(EntityType::Alarms, json!({ "severity": "high", "type": 3 })),
        ];
        let (kept, trace) = result.apply_post_processing(records, false);
        assert_eq!(kept.len(), 1);
        assert_eq!(trace.stages[0].input, 2);
        assert_eq!(trace.stages[0].output, 1);
    }

    #[test]
    fn test_mixed_flow_query() {
        let (result, _) = compile(
            "protocol:tcp source_ip:192.168.1.0/24 bytes:>1000",
            EntityType::Flows,
        );
        assert_eq!(result.api_params["protocol"], json!("tcp"));
        let stages = result.post_processing.as_ref().unwrap();
        assert_eq!(
            stages.stage_names(),
            vec!["ip:source_ip".to_string(), "residual:bytes:>1000".to_string()]
        );

        let records = vec![
            Record::new(EntityType::Flows, json!({ "source": { "ip": "192.168.1.7" }, "total": 5000 })),
            Record::new(EntityType::Flows, json!({ "source": { "ip": "192.168.1.8" }, "total": 10 })),
            Record::new(EntityType::Flows, json!({ "source": { "ip": "10.0.0.1" }, "total": 5000 })),
        ];
        let (kept, trace) = result.apply_post_processing(records, false);
        assert_eq!(kept.len(), 1);
        assert_eq!(trace.stages[0].output, 2);
        assert_eq!(trace.stages[1].output, 1);
    }

    #[test]
    fn test_match_all_contributes_nothing() {
        let (result, context) = compile("*", EntityType::Devices);
        assert!(result.api_params.is_empty());
        assert!(result.post_processing.is_none());
        assert!(context.metadata.filters_applied.is_empty());
        assert!(context.metadata.optimizations.is_empty());
    }

    #[test]
    fn test_apply_merges_in_registration_order() {
        struct Override;
        impl Filter for Override {
            fn name(&self) -> &'static str {
                "override"
            }
            fn can_handle(&self, node: &QueryNode, _: EntityType) -> bool {
                node.field_name() == Some("severity")
            }
            fn apply(&self, _: &QueryNode, _: &FilterContext) -> Result<FilterResult, FilterError> {
                Ok(FilterResult::default()
                    .with_param("severity", "critical")
                    .with_cache_key("override"))
            }
        }

        let mut factory = FilterFactory::default();
        factory.register(Box::new(Override));
        let node = QueryNode::field("severity", "high".into());
        let context = FilterContext::new(EntityType::Alarms);

        assert_eq!(factory.handlers(&node, &context), vec!["severity", "override"]);
        let result = factory.apply(&node, &context).unwrap();
        assert_eq!(result.api_params["severity"], json!("critical"));
        assert_eq!(result.cache_key_component.as_deref(), Some("severity:high|override"));
    }

    #[test]
    fn test_invalid_time_is_an_error() {
        let ast = parse("timestamp:>soon", Some(EntityType::Alarms)).ast.unwrap();
        let mut context = FilterContext::new(EntityType::Alarms);
        let err = FilterFactory::default().compile(&ast, &mut context).unwrap_err();
        assert!(matches!(err, FilterError::InvalidTimestamp { .. }));
    }
}
