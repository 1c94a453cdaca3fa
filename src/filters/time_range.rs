//! Time-range filter and timestamp parsing.
//!
//! Accepted timestamp forms:
//!
//! - epoch seconds or milliseconds (`>= 1e12` is read as milliseconds)
//! - RFC 3339 (`2024-01-15T10:30:00Z`), naive date-times and plain dates (UTC)
//! - relative durations `<n><s|m|h|d|w>` meaning "n units before now"

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::{Filter, FilterContext, FilterResult, Stage};
use crate::ast::{ComparisonOperator, FieldOperator, QueryNode, QueryValue};
use crate::error::FilterError;
use crate::schema::{EntityType, FieldKind, Record};

/// Half-width of the window built for an equality match on a timestamp.
pub const DEFAULT_TIME_TOLERANCE_SECS: i64 = 60;

/// 1971-01-01T00:00:00Z
pub const MIN_EPOCH_SECS: i64 = 31_536_000;
/// 9999-12-31T23:59:59Z
pub const MAX_EPOCH_SECS: i64 = 253_402_300_799;

const MILLIS_THRESHOLD: f64 = 1e12;
const MAX_RELATIVE_AMOUNT: u64 = 1_000_000;

static RELATIVE_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([smhdw])$").expect("relative time pattern"));

/// Inclusive bounds in epoch seconds. `None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeBounds {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl TimeBounds {
    pub fn contains(&self, ts: i64) -> bool {
        self.min.is_none_or(|min| ts >= min) && self.max.is_none_or(|max| ts <= max)
    }
}

/// Convert a raw epoch number into seconds.
pub fn epoch_seconds(n: f64) -> Result<i64, String> {
    if !n.is_finite() {
        return Err("not a finite number".to_string());
    }
    if n < 0.0 {
        return Err("negative epoch".to_string());
    }
    let seconds = if n >= MILLIS_THRESHOLD { n / 1000.0 } else { n };
    let seconds = seconds.floor() as i64;
    if !(MIN_EPOCH_SECS..=MAX_EPOCH_SECS).contains(&seconds) {
        return Err("outside the supported range 1971-01-01 to 9999-12-31".to_string());
    }
    Ok(seconds)
}

fn invalid(value: &str, reason: impl Into<String>) -> FilterError {
    FilterError::InvalidTimestamp {
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Parse a query literal into epoch seconds.
pub fn parse_timestamp(value: &QueryValue, now: DateTime<Utc>) -> Result<i64, FilterError> {
    match value {
        QueryValue::Integer(n) => epoch_seconds(*n as f64).map_err(|r| invalid(&n.to_string(), r)),
        QueryValue::Float(f) => epoch_seconds(*f).map_err(|r| invalid(&f.to_string(), r)),
        QueryValue::String(s) => parse_timestamp_str(s, now),
    }
}

pub fn parse_timestamp_str(text: &str, now: DateTime<Utc>) -> Result<i64, FilterError> {
    let text = text.trim();

    if let Some(caps) = RELATIVE_TIME.captures(text) {
        let amount: u64 = caps[1]
            .parse()
            .map_err(|_| FilterError::InvalidDuration { value: text.to_string() })?;
        if amount > MAX_RELATIVE_AMOUNT {
            return Err(FilterError::InvalidDuration { value: text.to_string() });
        }
        let unit = match &caps[2] {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            _ => 604_800,
        };
        return Ok(now.timestamp() - amount as i64 * unit);
    }

    if let Ok(n) = text.parse::<f64>() {
        return epoch_seconds(n).map_err(|r| invalid(text, r));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(dt.and_utc().timestamp());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp());
        }
    }

    Err(invalid(text, "expected epoch seconds/milliseconds, ISO-8601 or a relative time like 24h"))
}

/// Read a timestamp stored in a fetched record.
pub fn record_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => epoch_seconds(n.as_f64()?).ok(),
        Value::String(s) => {
            if let Ok(n) = s.trim().parse::<f64>() {
                return epoch_seconds(n).ok();
            }
            DateTime::parse_from_rfc3339(s.trim()).ok().map(|dt| dt.timestamp())
        }
        _ => None,
    }
}

fn iso8601(ts: i64) -> Option<String> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Compiles timestamp conditions into backend bounds or a record predicate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeRangeFilter;

impl TimeRangeFilter {
    pub fn new() -> Self {
        Self
    }

    /// Bounds for a time node. Strict comparisons move the bound by one
    /// second since backends only take inclusive bounds.
    pub fn bounds(&self, node: &QueryNode, context: &FilterContext) -> Result<TimeBounds, FilterError> {
        let now = context.now;
        match node {
            QueryNode::Field { value, .. } => {
                let ts = parse_timestamp(value, now)?;
                let margin = context
                    .time_tolerance
                    .unwrap_or(DEFAULT_TIME_TOLERANCE_SECS)
                    .clamp(0, MAX_EPOCH_SECS);
                Ok(TimeBounds {
                    min: Some(ts.saturating_sub(margin).max(0)),
                    max: Some(ts.saturating_add(margin).min(MAX_EPOCH_SECS)),
                })
            }
            QueryNode::Range { min, max, inclusive, .. } => {
                let adjust = if *inclusive { 0 } else { 1 };
                let min = min.as_ref().map(|v| parse_timestamp(v, now)).transpose()?;
                let max = max.as_ref().map(|v| parse_timestamp(v, now)).transpose()?;
                Ok(TimeBounds {
                    min: min.map(|t| t + adjust),
                    max: max.map(|t| t - adjust),
                })
            }
            QueryNode::Comparison { operator, value, .. } => {
                let ts = parse_timestamp(value, now)?;
                Ok(match operator {
                    ComparisonOperator::Gt => TimeBounds { min: Some(ts + 1), max: None },
                    ComparisonOperator::Gte => TimeBounds { min: Some(ts), max: None },
                    ComparisonOperator::Lt => TimeBounds { min: None, max: Some(ts - 1) },
                    ComparisonOperator::Lte => TimeBounds { min: None, max: Some(ts) },
                })
            }
            other => Err(FilterError::Unsupported {
                filter: self.name(),
                node: other.to_string(),
            }),
        }
    }
}

impl Filter for TimeRangeFilter {
    fn name(&self) -> &'static str {
        "time_range"
    }

    fn can_handle(&self, node: &QueryNode, entity: EntityType) -> bool {
        let is_time_field = |field: &str| entity.is_field_of_kind(field, FieldKind::Timestamp);
        match node {
            QueryNode::Field { field, operator, .. } => {
                matches!(operator, None | Some(FieldOperator::Eq)) && is_time_field(field)
            }
            QueryNode::Range { field, .. } | QueryNode::Comparison { field, .. } => is_time_field(field),
            _ => false,
        }
    }

    fn apply(&self, node: &QueryNode, context: &FilterContext) -> Result<FilterResult, FilterError> {
        let field = node.field_name().unwrap_or_default().to_string();
        let bounds = self.bounds(node, context)?;

        let render = |b: Option<i64>| b.map(|t| t.to_string()).unwrap_or_else(|| "*".to_string());
        let mut result = FilterResult::default().with_cache_key(format!(
            "time:{}:{}-{}",
            field,
            render(bounds.min),
            render(bounds.max)
        ));

        match context.entity {
            EntityType::Alarms => {
                if let Some(min) = bounds.min.and_then(iso8601) {
                    result = result.with_param("start_time", min);
                }
                if let Some(max) = bounds.max.and_then(iso8601) {
                    result = result.with_param("end_time", max);
                }
                result.can_optimize = Some(true);
            }
            EntityType::Flows => {
                if let Some(min) = bounds.min {
                    result = result.with_param("begin", min);
                }
                if let Some(max) = bounds.max {
                    result = result.with_param("end", max);
                }
                result.can_optimize = Some(true);
            }
            EntityType::Rules | EntityType::Devices | EntityType::TargetLists => {
                let stage_field = field.clone();
                result = result.with_stage(Stage::new(format!("time:{}", field), move |record: &Record| {
                    record
                        .get(&stage_field)
                        .and_then(record_timestamp)
                        .is_some_and(|ts| bounds.contains(ts))
                }));
                result.can_optimize = Some(false);
            }
        }

        if context.debug {
            tracing::debug!(field = %field, ?bounds, entity = %context.entity, "time range compiled");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const T: i64 = 1_705_329_342; // 2024-01-15T14:35:42Z

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(T, 0).unwrap()
    }

    fn context(entity: EntityType) -> FilterContext {
        FilterContext::new(entity).with_now(now())
    }

    fn ts_field(value: QueryValue) -> QueryNode {
        QueryNode::field("timestamp", value)
    }

    #[test]
    fn test_epoch_seconds_and_millis() {
        assert_eq!(epoch_seconds(T as f64), Ok(T));
        assert_eq!(epoch_seconds(T as f64 * 1000.0), Ok(T));
        assert!(epoch_seconds(-1.0).is_err());
        assert!(epoch_seconds(f64::NAN).is_err());
        assert!(epoch_seconds(1000.0).is_err()); // 1970
        assert!(epoch_seconds(300_000_000_000.0).is_err()); // past year 9999 as seconds
    }

    #[test]
    fn test_parse_iso_and_relative() {
        assert_eq!(parse_timestamp_str("2024-01-15T14:35:42Z", now()), Ok(T));
        assert_eq!(parse_timestamp_str("2024-01-15T14:35:42", now()), Ok(T));
        assert_eq!(parse_timestamp_str("2024-01-15", now()), Ok(1_705_276_800));
        assert_eq!(parse_timestamp_str("1h", now()), Ok(T - 3_600));
        assert_eq!(parse_timestamp_str("2w", now()), Ok(T - 2 * 604_800));
        assert_eq!(
            parse_timestamp_str("1000001d", now()),
            Err(FilterError::InvalidDuration { value: "1000001d".to_string() })
        );
        assert!(parse_timestamp_str("yesterday-ish", now()).is_err());
    }

    #[test]
    fn test_equality_window_is_symmetric() {
        let filter = TimeRangeFilter::new();
        let ctx = context(EntityType::Flows).with_time_tolerance(300);
        let bounds = filter.bounds(&ts_field(T.into()), &ctx).unwrap();
        assert_eq!(bounds, TimeBounds { min: Some(T - 300), max: Some(T + 300) });

        let bounds = filter.bounds(&ts_field(T.into()), &context(EntityType::Flows)).unwrap();
        assert_eq!(
            bounds,
            TimeBounds {
                min: Some(T - DEFAULT_TIME_TOLERANCE_SECS),
                max: Some(T + DEFAULT_TIME_TOLERANCE_SECS)
            }
        );
    }

    #[test]
    fn test_huge_tolerance_is_clamped() {
        let filter = TimeRangeFilter::new();
        let ctx = context(EntityType::Flows).with_time_tolerance(i64::MAX);
        let bounds = filter.bounds(&ts_field(T.into()), &ctx).unwrap();
        assert_eq!(bounds, TimeBounds { min: Some(0), max: Some(MAX_EPOCH_SECS) });

        let result = filter.apply(&ts_field(T.into()), &context(EntityType::Alarms).with_time_tolerance(i64::MAX)).unwrap();
        assert_eq!(result.api_params["end_time"], json!("9999-12-31T23:59:59Z"));
    }

    #[test]
    fn test_strict_comparisons_shift_by_one_second() {
        let filter = TimeRangeFilter::new();
        let ctx = context(EntityType::Flows);
        let cmp = |operator| QueryNode::Comparison {
            field: "ts".to_string(),
            operator,
            value: T.into(),
        };

        assert_eq!(filter.bounds(&cmp(ComparisonOperator::Gt), &ctx).unwrap().min, Some(T + 1));
        assert_eq!(filter.bounds(&cmp(ComparisonOperator::Gte), &ctx).unwrap().min, Some(T));
        assert_eq!(filter.bounds(&cmp(ComparisonOperator::Lt), &ctx).unwrap().max, Some(T - 1));
        assert_eq!(filter.bounds(&cmp(ComparisonOperator::Lte), &ctx).unwrap().max, Some(T));
    }

    #[test]
    fn test_alarm_params_are_iso() {
        let node = QueryNode::Range {
            field: "timestamp".to_string(),
            min: Some("2024-01-01".into()),
            max: Some("2024-12-31".into()),
            inclusive: true,
        };
        let result = TimeRangeFilter::new().apply(&node, &context(EntityType::Alarms)).unwrap();

        assert_eq!(result.api_params["start_time"], json!("2024-01-01T00:00:00Z"));
        assert_eq!(result.api_params["end_time"], json!("2024-12-31T00:00:00Z"));
        assert!(result.post_processing.is_none());
        assert_eq!(
            result.cache_key_component.as_deref(),
            Some("time:timestamp:1704067200-1735603200")
        );
    }

    #[test]
    fn test_flow_params_are_epoch() {
        let node = QueryNode::Comparison {
            field: "ts".to_string(),
            operator: ComparisonOperator::Gte,
            value: "1h".into(),
        };
        let result = TimeRangeFilter::new().apply(&node, &context(EntityType::Flows)).unwrap();
        assert_eq!(result.api_params["begin"], json!(T - 3_600));
        assert!(!result.api_params.contains_key("end"));
    }

    #[test]
    fn test_device_time_is_post_processed() {
        let node = QueryNode::Comparison {
            field: "last_seen".to_string(),
            operator: ComparisonOperator::Gt,
            value: "1d".into(),
        };
        let result = TimeRangeFilter::new().apply(&node, &context(EntityType::Devices)).unwrap();
        assert!(result.api_params.is_empty());

        let records = vec![
            Record::new(EntityType::Devices, json!({ "lastSeen": T - 60 })),
            Record::new(EntityType::Devices, json!({ "lastSeen": (T - 3 * 86_400) * 1000 })),
            Record::new(EntityType::Devices, json!({ "lastSeen": "2024-01-15T14:00:00Z" })),
            Record::new(EntityType::Devices, json!({ "name": "no timestamp" })),
        ];
        let (kept, _) = result.apply_post_processing(records, false);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_can_handle() {
        let filter = TimeRangeFilter::new();
        assert!(filter.can_handle(&ts_field(T.into()), EntityType::Alarms));
        assert!(!filter.can_handle(&QueryNode::field("severity", "high".into()), EntityType::Alarms));
        // rules have no `timestamp` field
        assert!(!filter.can_handle(&ts_field(T.into()), EntityType::Rules));
        let negated = QueryNode::Field {
            field: "ts".to_string(),
            value: T.into(),
            operator: Some(FieldOperator::NotEq),
        };
        assert!(!filter.can_handle(&negated, EntityType::Flows));
    }

    #[test]
    fn test_invalid_timestamp_is_an_error() {
        let result = TimeRangeFilter::new().apply(&ts_field("soon".into()), &context(EntityType::Flows));
        assert!(matches!(result, Err(FilterError::InvalidTimestamp { .. })));
    }
}
