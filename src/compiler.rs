//! Single entry point chaining every compilation step.
//!
//! 1. complexity gate on the raw text
//! 2. boolean field translation
//! 3. parse and field validation
//! 4. filter compilation into API parameters and post-processing stages

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::boolean::BooleanFieldTranslator;
use crate::config::CompilerConfig;
use crate::filters::{FilterContext, FilterFactory, FilterMetadata, FilterResult, PipelineTrace};
use crate::optimizer::{validate_query, ParsedQuery};
use crate::parser::{parse, QueryValidation};
use crate::schema::{EntityType, Record};

pub struct QueryCompiler {
    config: CompilerConfig,
    factory: FilterFactory,
    translator: BooleanFieldTranslator,
}

impl Default for QueryCompiler {
    fn default() -> Self {
        Self::new(CompilerConfig::default())
    }
}

/// Everything produced for one query.
#[derive(Debug)]
pub struct CompiledQuery {
    pub entity: EntityType,
    pub validation: QueryValidation,
    /// Present when the query is valid
    pub result: Option<FilterResult>,
    pub parsed: ParsedQuery,
    /// Query text after boolean translation
    pub translated_query: String,
    pub metadata: FilterMetadata,
}

/// JSON-friendly view of a [`CompiledQuery`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledSummary {
    pub entity: EntityType,
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub translated_query: String,
    pub api_params: Map<String, Value>,
    pub post_processing: Vec<String>,
    pub cache_key: Option<String>,
    pub filters_applied: Vec<String>,
    pub optimizations: Vec<String>,
    pub complexity: f64,
    pub optimized: String,
}

impl CompiledQuery {
    pub fn is_valid(&self) -> bool {
        self.validation.is_valid
    }

    /// Run the post-processing stages over fetched records. An invalid
    /// query keeps nothing.
    pub fn apply(&self, records: Vec<Record>, debug: bool) -> (Vec<Record>, PipelineTrace) {
        match &self.result {
            Some(result) => result.apply_post_processing(records, debug),
            None => (Vec::new(), PipelineTrace::default()),
        }
    }

    pub fn summary(&self) -> CompiledSummary {
        let result = self.result.as_ref();
        CompiledSummary {
            entity: self.entity,
            is_valid: self.validation.is_valid,
            errors: self.validation.errors.clone(),
            warnings: self.validation.warnings.clone(),
            suggestions: self.validation.suggestions.clone(),
            translated_query: self.translated_query.clone(),
            api_params: result.map(|r| r.api_params.clone()).unwrap_or_default(),
            post_processing: result
                .and_then(|r| r.post_processing.as_ref())
                .map(|p| p.stage_names())
                .unwrap_or_default(),
            cache_key: result.and_then(|r| r.cache_key_component.clone()),
            filters_applied: self.metadata.filters_applied.clone(),
            optimizations: self.metadata.optimizations.clone(),
            complexity: self.parsed.complexity,
            optimized: self.parsed.optimized.clone(),
        }
    }
}

impl QueryCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            translator: BooleanFieldTranslator::new(config.boolean_encoding),
            factory: FilterFactory::default(),
            config,
        }
    }

    pub fn with_factory(config: CompilerConfig, factory: FilterFactory) -> Self {
        Self {
            translator: BooleanFieldTranslator::new(config.boolean_encoding),
            factory,
            config,
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn factory_mut(&mut self) -> &mut FilterFactory {
        &mut self.factory
    }

    pub fn compile(&self, query: &str, entity: EntityType) -> CompiledQuery {
        self.compile_at(query, entity, Utc::now())
    }

    /// Compile with relative times resolved against `now`.
    pub fn compile_at(&self, query: &str, entity: EntityType, now: DateTime<Utc>) -> CompiledQuery {
        let gate = validate_query(query, self.config.max_complexity);
        if !gate.is_valid {
            return CompiledQuery {
                entity,
                validation: QueryValidation::invalid(gate.errors),
                result: None,
                parsed: gate.parsed,
                translated_query: query.to_string(),
                metadata: FilterMetadata::default(),
            };
        }

        let translated_query =
            if self.config.translate_booleans && self.translator.needs_translation(query, entity) {
                let translated = self.translator.translate(query, entity);
                if translated != query {
                    tracing::debug!(original = query, translated = %translated, "boolean fields translated");
                }
                translated
            } else {
                query.to_string()
            };

        let mut validation = parse(&translated_query, Some(entity));
        let mut context = FilterContext::new(entity)
            .with_time_tolerance(self.config.time_tolerance_secs)
            .with_debug(self.config.debug)
            .with_now(now);

        let result = match &validation.ast {
            Some(ast) => match self.factory.compile(ast, &mut context) {
                Ok(result) => {
                    validation.warnings.extend(result.warnings.iter().cloned());
                    Some(result)
                }
                Err(e) => {
                    tracing::warn!(error = %e, query = %translated_query, "filter compilation failed");
                    validation.is_valid = false;
                    validation.errors.push(e.to_string());
                    validation.ast = None;
                    None
                }
            },
            None => None,
        };

        CompiledQuery {
            entity,
            validation,
            result,
            parsed: gate.parsed,
            translated_query,
            metadata: context.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boolean::BooleanEncoding;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_705_329_342, 0).unwrap()
    }

    #[test]
    fn test_end_to_end_alarm_query() {
        let compiled = QueryCompiler::default().compile_at(
            "severity:high AND (type:1 OR type:2) AND resolved:false",
            EntityType::Alarms,
            now(),
        );

        assert!(compiled.is_valid(), "{:?}", compiled.validation.errors);
        assert_eq!(
            compiled.translated_query,
            "severity:high AND (type:1 OR type:2) AND resolved:0"
        );
        let summary = compiled.summary();
        assert_eq!(summary.api_params, {
            let mut m = Map::new();
            m.insert("severity".to_string(), json!("high"));
            m
        });
        assert_eq!(
            summary.post_processing,
            vec!["residual:type:1 OR type:2".to_string(), "residual:resolved:0".to_string()]
        );

        let records = vec![
            Record::new(EntityType::Alarms, json!({ "severity": "high", "type": 2, "resolved": false })),
            Record::new(EntityType::Alarms, json!({ "severity": "high", "type": 2, "resolved": true })),
            Record::new(EntityType::Alarms, json!({ "severity": "high", "type": 5, "resolved": false })),
        ];
        let (kept, trace) = compiled.apply(records, false);
        assert_eq!(kept.len(), 1);
        assert_eq!(trace.stages.len(), 2);
    }

    #[test]
    fn test_complexity_gate_runs_first() {
        let query = (1..=12)
            .map(|i| format!("severity:v{}", i))
            .collect::<Vec<_>>()
            .join(" AND ");
        let compiled = QueryCompiler::default().compile(&query, EntityType::Alarms);

        assert!(!compiled.is_valid());
        assert_eq!(
            compiled.validation.errors,
            vec!["Query complexity 17.5 exceeds maximum allowed 10".to_string()]
        );
        assert!(compiled.result.is_none());

        let relaxed = QueryCompiler::new(CompilerConfig {
            max_complexity: 50.0,
            ..Default::default()
        });
        assert!(relaxed.compile(&query, EntityType::Alarms).is_valid());
    }

    #[test]
    fn test_parse_errors_are_reported() {
        let compiled = QueryCompiler::default().compile("severity:", EntityType::Alarms);
        assert!(!compiled.is_valid());
        assert_eq!(compiled.validation.errors, vec!["Expected value after field 'severity:'".to_string()]);
        assert!(compiled.validation.ast.is_none());
        let (kept, _) = compiled.apply(vec![Record::new(EntityType::Alarms, json!({}))], false);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_filter_errors_become_validation_errors() {
        let compiled = QueryCompiler::default().compile("timestamp:>whenever", EntityType::Flows);
        assert!(!compiled.is_valid());
        assert!(compiled.validation.errors[0].starts_with("Invalid timestamp 'whenever'"));
        assert!(compiled.validation.ast.is_none());
    }

    #[test]
    fn test_invalid_ip_literal_warns() {
        let compiled = QueryCompiler::default().compile("source_ip:300.1.1.1", EntityType::Flows);
        assert!(compiled.is_valid());
        assert_eq!(compiled.validation.warnings.len(), 1);
    }

    #[test]
    fn test_translation_can_be_disabled() {
        let compiler = QueryCompiler::new(CompilerConfig {
            translate_booleans: false,
            boolean_encoding: BooleanEncoding::Literal,
            ..Default::default()
        });
        let compiled = compiler.compile("online", EntityType::Devices);
        assert_eq!(compiled.translated_query, "online");
        // a bare field is not a clause
        assert!(!compiled.is_valid());
    }

    #[test]
    fn test_severity_threshold_keeps_higher_levels() {
        let compiled = QueryCompiler::default().compile("severity:>=medium", EntityType::Alarms);
        assert!(compiled.is_valid(), "{:?}", compiled.validation.errors);

        let records = ["low", "medium", "high", "critical"]
            .into_iter()
            .map(|level| Record::new(EntityType::Alarms, json!({ "severity": level })))
            .collect();
        let (kept, _) = compiled.apply(records, false);
        let levels: Vec<_> = kept.iter().map(|r| r.get_text("severity").unwrap()).collect();
        assert_eq!(levels, vec!["medium", "high", "critical"]);
    }

    #[test]
    fn test_unvalidated_tolerance_does_not_overflow() {
        let compiler = QueryCompiler::new(CompilerConfig {
            time_tolerance_secs: i64::MAX,
            ..Default::default()
        });
        let compiled = compiler.compile("ts:1705329342", EntityType::Flows);
        assert!(compiled.is_valid());
        assert_eq!(compiled.summary().api_params["begin"], json!(0));
    }

    #[test]
    fn test_time_tolerance_from_config() {
        let compiler = QueryCompiler::new(CompilerConfig {
            time_tolerance_secs: 10,
            ..Default::default()
        });
        let compiled = compiler.compile_at("ts:1705329342", EntityType::Flows, now());
        let summary = compiled.summary();
        assert_eq!(summary.api_params["begin"], json!(1_705_329_332));
        assert_eq!(summary.api_params["end"], json!(1_705_329_352));
        assert_eq!(summary.filters_applied, vec!["time_range".to_string()]);
    }
}
