//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - reportflow.toml (default configuration)
//! - reportflow.local.toml (git-ignored local overrides)
//! - Environment variables (REPORTFLOW_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # reportflow.toml
//! [pipeline]
//! chunk_size = 500
//! buffer_size = 1000
//! enable_telemetry = true
//!
//! [cache]
//! max_entries = 1000
//! ttl_secs = 300
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! REPORTFLOW_PIPELINE__CHUNK_SIZE=250
//! REPORTFLOW_CACHE__MAX_ENTRIES=5000
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pipeline stage tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Records pulled from the data layer per page
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum outstanding demand a consumer signals upstream
    #[serde(default = "default_max_demand")]
    pub max_demand: usize,

    /// Demand low-water mark; the consumer re-signals when outstanding
    /// demand falls to this level
    #[serde(default = "default_min_demand")]
    pub min_demand: usize,

    /// Downstream buffer capacity in records; the hard backpressure point
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Emit telemetry events for this process's pipelines
    #[serde(default = "default_true")]
    pub enable_telemetry: bool,

    /// Per-record transformer wall-clock timeout in milliseconds
    #[serde(default = "default_transformer_timeout_ms")]
    pub transformer_timeout_ms: u64,

    /// Soft memory ceiling per pipeline in bytes (0 = unlimited)
    #[serde(default)]
    pub memory_limit: u64,

    /// Retention window for terminated pipeline registry entries, seconds
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Global aggregations applied when the report defines none
    /// (e.g. `["sum", "count"]`)
    #[serde(default)]
    pub aggregations: Vec<String>,

    /// Grouped aggregations applied when the report defines none
    #[serde(default)]
    pub grouped_aggregations: Vec<GroupedAggregationConfig>,
}

/// One configured grouped aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedAggregationConfig {
    pub group_by: Vec<String>,
    #[serde(default)]
    pub aggregations: Vec<String>,
    #[serde(default = "default_max_groups")]
    pub max_groups: usize,
}

/// Query result cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached entries
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,

    /// Maximum total cached bytes
    #[serde(default = "default_cache_bytes")]
    pub max_bytes: usize,

    /// Entry time-to-live in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

/// Aggregation memory pre-validation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum estimated group count across all levels
    #[serde(default = "default_max_estimated_groups")]
    pub max_estimated_groups: u64,

    /// Maximum estimated grouped-aggregation memory in bytes
    #[serde(default = "default_max_estimated_memory")]
    pub max_estimated_memory: u64,

    /// Estimated bytes per group entry
    #[serde(default = "default_bytes_per_group")]
    pub bytes_per_group: u64,

    /// Fail configuration when limits are exceeded; when false, log a
    /// warning and continue
    #[serde(default = "default_true")]
    pub enforce_limits: bool,

    /// Per-group cap on distinct keys in a grouped aggregation
    #[serde(default = "default_max_groups")]
    pub max_groups: usize,
}

/// Renderer defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// BCP 47 locale tag used for number/currency/date formatting
    #[serde(default = "default_locale")]
    pub locale: String,

    /// ISO 4217 currency code for `currency`-formatted fields
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_chunk_size() -> usize {
    500
}
fn default_max_demand() -> usize {
    1000
}
fn default_min_demand() -> usize {
    500
}
fn default_buffer_size() -> usize {
    1000
}
fn default_transformer_timeout_ms() -> u64 {
    5000
}
fn default_retention_secs() -> u64 {
    300
}
fn default_cache_entries() -> usize {
    1000
}
fn default_cache_bytes() -> usize {
    100 * 1024 * 1024
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_max_estimated_groups() -> u64 {
    100_000
}
fn default_max_estimated_memory() -> u64 {
    256 * 1024 * 1024
}
fn default_bytes_per_group() -> u64 {
    256
}
fn default_max_groups() -> usize {
    10_000
}
fn default_locale() -> String {
    "en-US".to_string()
}
fn default_currency() -> String {
    "USD".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. reportflow.toml (base configuration)
    /// 2. reportflow.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (REPORTFLOW_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("reportflow.toml"))
            .merge(Toml::file("reportflow.local.toml"))
            .merge(Env::prefixed("REPORTFLOW_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("REPORTFLOW_").split("__"))
            .extract()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            chunk_size: default_chunk_size(),
            max_demand: default_max_demand(),
            min_demand: default_min_demand(),
            buffer_size: default_buffer_size(),
            enable_telemetry: true,
            transformer_timeout_ms: default_transformer_timeout_ms(),
            memory_limit: 0,
            retention_secs: default_retention_secs(),
            aggregations: Vec::new(),
            grouped_aggregations: Vec::new(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_entries: default_cache_entries(),
            max_bytes: default_cache_bytes(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_estimated_groups: default_max_estimated_groups(),
            max_estimated_memory: default_max_estimated_memory(),
            bytes_per_group: default_bytes_per_group(),
            enforce_limits: true,
            max_groups: default_max_groups(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            locale: default_locale(),
            currency: default_currency(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline.chunk_size, 500);
        assert_eq!(config.pipeline.buffer_size, 1000);
        assert!(config.pipeline.enable_telemetry);
        assert_eq!(config.limits.max_estimated_groups, 100_000);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.render.locale, "en-US");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();

        // Verify it contains expected sections
        assert!(toml_str.contains("[pipeline]"));
        assert!(toml_str.contains("[cache]"));
        assert!(toml_str.contains("[limits]"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[pipeline]\nchunk_size = 50\n").unwrap();
        assert_eq!(config.pipeline.chunk_size, 50);
        assert_eq!(config.pipeline.buffer_size, 1000);
        assert_eq!(config.cache.ttl_secs, 300);
    }

    #[test]
    fn test_configured_aggregations() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            aggregations = ["sum", "count"]

            [[pipeline.grouped_aggregations]]
            group_by = ["territory"]
            aggregations = ["sum"]
            max_groups = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.aggregations, vec!["sum", "count"]);
        assert_eq!(config.pipeline.grouped_aggregations.len(), 1);
        assert_eq!(
            config.pipeline.grouped_aggregations[0].group_by,
            vec!["territory"]
        );
        assert_eq!(config.pipeline.grouped_aggregations[0].max_groups, 500);
    }
}
