//! Compiler configuration, loaded from a JSON file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::boolean::BooleanEncoding;
use crate::error::ConfigError;
use crate::filters::time_range::{DEFAULT_TIME_TOLERANCE_SECS, MAX_EPOCH_SECS};
use crate::optimizer::DEFAULT_MAX_COMPLEXITY;

/// Settings for [`crate::compiler::QueryCompiler`]. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// Queries scoring above this are rejected before parsing
    pub max_complexity: f64,
    /// Half-width of the window for `timestamp:<value>` equality
    pub time_tolerance_secs: i64,
    /// Emit per-stage debug events while compiling and filtering
    pub debug: bool,
    pub boolean_encoding: BooleanEncoding,
    /// Rewrite boolean field conditions before parsing
    pub translate_booleans: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_complexity: DEFAULT_MAX_COMPLEXITY,
            time_tolerance_secs: DEFAULT_TIME_TOLERANCE_SECS,
            debug: false,
            boolean_encoding: BooleanEncoding::Numeric,
            translate_booleans: true,
        }
    }
}

impl CompilerConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        if !path.exists() {
            return Err(ConfigError::NotFound(display));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;

        let config: CompilerConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: display.clone(),
            source,
        })?;

        config.validate()?;
        tracing::debug!(path = %path.display(), ?config, "loaded compiler config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.max_complexity.is_finite() || self.max_complexity <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "max_complexity must be a positive number, got {}",
                self.max_complexity
            )));
        }
        if !(0..=MAX_EPOCH_SECS).contains(&self.time_tolerance_secs) {
            return Err(ConfigError::Invalid(format!(
                "time_tolerance_secs must be between 0 and {}, got {}",
                MAX_EPOCH_SECS, self.time_tolerance_secs
            )));
        }
        Ok(())
    }
}
