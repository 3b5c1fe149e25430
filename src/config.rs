//! Run configuration.
//!
//! A [`DiscoveryConfig`] describes everything about a run except its
//! inputs: limits, filter strategy, storage layout, resource thresholds and
//! pruning groups. It deserializes from JSON with every field optional.
//!
//! ## Hashing
//!
//! `params_hash()` fingerprints the configuration for run manifests. Floats
//! are quantized to integers (factor 1e6) before hashing so the hash does
//! not depend on float formatting.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::canonical::canonical_hash_hex;
use crate::filter::FilterKind;
use crate::listener::resource::{DEFAULT_LARGE_SAMPLE_STATEMENTS, DEFAULT_STAGE_THRESHOLDS};
use crate::store::file::DEFAULT_READ_CACHE_ENTRIES;

/// Configuration format version.
pub const CONFIG_VERSION: &str = "discovery_config_v1";

/// Quantization factor for floats in hashed data.
const FLOAT_QUANTIZATION_FACTOR: f64 = 1_000_000.0;

fn quantize_float(value: f64) -> i64 {
    (value * FLOAT_QUANTIZATION_FACTOR).round() as i64
}

/// Error type for configuration handling.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The document is not valid JSON for this schema.
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A value is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Sample store layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Everything in memory.
    #[default]
    Memory,
    /// Everything on disk.
    File,
    /// Memory primary over a disk secondary.
    Hierarchical,
}

/// Storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Store layout.
    pub kind: StorageKind,
    /// Directory for file-backed tiers. When absent, a fresh directory under
    /// the system temp dir is used and removed with the discovery.
    pub directory: Option<PathBuf>,
    /// Byte budget of the memory tier. For hierarchical storage this is
    /// also the primary tier's capacity and the resource monitor's total.
    pub memory_budget_bytes: Option<usize>,
    /// Read cache size of file-backed tiers.
    pub file_cache_entries: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            directory: None,
            memory_budget_bytes: None,
            file_cache_entries: DEFAULT_READ_CACHE_ENTRIES,
        }
    }
}

/// Resource strategy settings. Only used with hierarchical storage and a
/// memory budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Utilization at which each stage fires, least aggressive first.
    pub stage_thresholds: [f64; 3],
    /// Statement count above which a filter sample is demoted by stage 2.
    pub large_sample_statements: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            stage_thresholds: DEFAULT_STAGE_THRESHOLDS,
            large_sample_statements: DEFAULT_LARGE_SAMPLE_STATEMENTS,
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Format version.
    pub version: String,
    /// Deepest level to expand.
    pub level_limit: Option<usize>,
    /// Wall-clock limit for the whole run.
    pub time_limit_secs: Option<u64>,
    /// Limit for a single node expansion.
    pub node_time_limit_ms: Option<u64>,
    /// Redundancy filter.
    pub filter: FilterKind,
    /// Sample storage.
    pub storage: StorageConfig,
    /// Memory pressure handling.
    pub resources: ResourceConfig,
    /// Groups of interchangeable transformer IRIs, in preference order.
    pub strong_groups: Vec<Vec<String>>,
    /// Whether to collect per-level statistics.
    pub statistics: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            level_limit: None,
            time_limit_secs: None,
            node_time_limit_ms: None,
            filter: FilterKind::Diff,
            storage: StorageConfig::default(),
            resources: ResourceConfig::default(),
            strong_groups: Vec::new(),
            statistics: true,
        }
    }
}

#[derive(Serialize)]
struct QuantizedConfig<'a> {
    version: &'a str,
    level_limit: Option<usize>,
    time_limit_secs: Option<u64>,
    node_time_limit_ms: Option<u64>,
    filter: FilterKind,
    storage_kind: StorageKind,
    memory_budget_bytes: Option<usize>,
    file_cache_entries: usize,
    stage_thresholds: [i64; 3],
    large_sample_statements: usize,
    strong_groups: &'a [Vec<String>],
    statistics: bool,
}

impl DiscoveryConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = &self.resources.stage_thresholds;
        if thresholds.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(ConfigError::Invalid(format!(
                "stage thresholds must be finite and non-negative: {thresholds:?}"
            )));
        }
        if thresholds.windows(2).any(|w| w[0] > w[1]) {
            return Err(ConfigError::Invalid(format!(
                "stage thresholds must not decrease: {thresholds:?}"
            )));
        }
        if self.strong_groups.iter().any(Vec::is_empty) {
            return Err(ConfigError::Invalid("strong groups must not be empty".into()));
        }
        if self.storage.kind == StorageKind::Hierarchical && self.storage.memory_budget_bytes == Some(0) {
            return Err(ConfigError::Invalid(
                "hierarchical storage needs a non-zero memory budget".into(),
            ));
        }
        Ok(())
    }

    /// Deterministic hash of the parameters.
    pub fn params_hash(&self) -> String {
        let quantized = QuantizedConfig {
            version: &self.version,
            level_limit: self.level_limit,
            time_limit_secs: self.time_limit_secs,
            node_time_limit_ms: self.node_time_limit_ms,
            filter: self.filter,
            storage_kind: self.storage.kind,
            memory_budget_bytes: self.storage.memory_budget_bytes,
            file_cache_entries: self.storage.file_cache_entries,
            stage_thresholds: self.resources.stage_thresholds.map(quantize_float),
            large_sample_statements: self.resources.large_sample_statements,
            strong_groups: &self.strong_groups,
            statistics: self.statistics,
        };
        canonical_hash_hex(&quantized)
    }
}
