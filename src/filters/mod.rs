//! Filter pipeline.
//!
//! A [`Filter`] turns one AST node into backend API parameters and/or an
//! in-memory post-processing stage. The [`FilterFactory`] holds the ordered
//! registry of filters and merges their output:
//!
//! - API parameters are shallow-merged, the last writer per key wins
//! - post-processing stages run in application order, each one seeing the
//!   records the previous stage kept
//! - cache-key fragments are joined with `|`

pub mod evaluate;
pub mod factory;
pub mod ip;
pub mod passthrough;
pub mod time_range;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::ast::QueryNode;
use crate::error::FilterError;
use crate::schema::{EntityType, Record};

pub use factory::FilterFactory;
pub use ip::IpAddressFilter;
pub use passthrough::{ProtocolFilter, SeverityFilter};
pub use time_range::TimeRangeFilter;

/// Shared, thread-safe record predicate.
pub type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Translates AST nodes for one concern (time, IPs, ...).
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this filter understands `node` for records of `entity`.
    fn can_handle(&self, node: &QueryNode, entity: EntityType) -> bool;

    fn apply(&self, node: &QueryNode, context: &FilterContext) -> Result<FilterResult, FilterError>;
}

/// A named post-processing step.
#[derive(Clone)]
pub struct Stage {
    pub name: String,
    predicate: Predicate,
}

impl Stage {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn from_predicate(name: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        (self.predicate)(record)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

/// Item counts before and after one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTrace {
    pub stage: String,
    pub input: usize,
    pub output: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineTrace {
    pub stages: Vec<StageTrace>,
}

/// Ordered list of post-processing stages.
#[derive(Debug, Clone, Default)]
pub struct PostProcessing {
    stages: Vec<Stage>,
}

impl PostProcessing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(stage: Stage) -> Self {
        Self {
            stages: vec![stage],
        }
    }

    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn extend(&mut self, other: PostProcessing) {
        self.stages.extend(other.stages);
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order over `records`.
    pub fn apply(&self, records: Vec<Record>, debug: bool) -> (Vec<Record>, PipelineTrace) {
        let mut trace = PipelineTrace::default();
        let mut current = records;

        for stage in &self.stages {
            let input = current.len();
            current.retain(|record| stage.matches(record));
            if debug {
                tracing::debug!(stage = %stage.name, input, output = current.len(), "post-processing stage");
            }
            trace.stages.push(StageTrace {
                stage: stage.name.clone(),
                input,
                output: current.len(),
            });
        }

        (current, trace)
    }

    /// Whether a single record passes every stage.
    pub fn matches(&self, record: &Record) -> bool {
        self.stages.iter().all(|s| s.matches(record))
    }
}

/// Bookkeeping about one compilation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterMetadata {
    pub filters_applied: Vec<String>,
    pub optimizations: Vec<String>,
    pub cache_key: Option<String>,
    pub warnings: Vec<String>,
}

/// Per-compilation state. Owned by exactly one compilation call.
#[derive(Debug, Clone)]
pub struct FilterContext {
    pub entity: EntityType,
    pub api_params: Map<String, Value>,
    pub post_processing: PostProcessing,
    pub metadata: FilterMetadata,
    /// Half-width in seconds of the window built for `timestamp:<value>`
    pub time_tolerance: Option<i64>,
    pub debug: bool,
    /// Instant that relative times such as `24h` are resolved against
    pub now: DateTime<Utc>,
}

impl FilterContext {
    pub fn new(entity: EntityType) -> Self {
        Self {
            entity,
            api_params: Map::new(),
            post_processing: PostProcessing::new(),
            metadata: FilterMetadata::default(),
            time_tolerance: None,
            debug: false,
            now: Utc::now(),
        }
    }

    pub fn with_time_tolerance(mut self, seconds: i64) -> Self {
        self.time_tolerance = Some(seconds);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// Output of one filter, or the merged output of several.
#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    pub api_params: Map<String, Value>,
    pub post_processing: Option<PostProcessing>,
    /// True when the backend fully expresses the condition
    pub can_optimize: Option<bool>,
    pub cache_key_component: Option<String>,
    pub warnings: Vec<String>,
}

impl FilterResult {
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.api_params.insert(key.into(), value.into());
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.post_processing
            .get_or_insert_with(PostProcessing::new)
            .push(stage);
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key_component = Some(key.into());
        self
    }

    /// Fold `other` into `self`, `other` being applied after `self`.
    pub fn merge(&mut self, other: FilterResult) {
        for (key, value) in other.api_params {
            self.api_params.insert(key, value);
        }

        if let Some(stages) = other.post_processing {
            self.post_processing
                .get_or_insert_with(PostProcessing::new)
                .extend(stages);
        }

        self.can_optimize = match (self.can_optimize, other.can_optimize) {
            (Some(a), Some(b)) => Some(a && b),
            (a, None) => a,
            (None, b) => b,
        };

        self.cache_key_component = match (self.cache_key_component.take(), other.cache_key_component) {
            (Some(a), Some(b)) => Some(format!("{}|{}", a, b)),
            (a, b) => a.or(b),
        };

        self.warnings.extend(other.warnings);
    }

    /// Run the post-processing stages, if any, over fetched records.
    pub fn apply_post_processing(&self, records: Vec<Record>, debug: bool) -> (Vec<Record>, PipelineTrace) {
        match &self.post_processing {
            Some(stages) => stages.apply(records, debug),
            None => (records, PipelineTrace::default()),
        }
    }
}
