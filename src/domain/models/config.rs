//! Typed configuration for the sightline stack.
//!
//! Every section ships programmatic defaults; the loader in
//! `infrastructure::config` layers YAML files and `SIGHTLINE_*` environment
//! variables on top and validates the merged result.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub integrator: IntegratorConfig,
    pub optimizer: OptimizerConfig,
    pub applier: ApplierConfig,
    pub logging: LoggingConfig,
}

/// State cache budgets and compression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Hard entry-count budget.
    pub max_entries: usize,
    /// Hard memory budget in megabytes.
    pub max_memory_mb: f64,
    /// Default time-to-live for inserted entries, milliseconds.
    pub default_ttl_ms: u64,
    /// Serialized-size threshold above which entries are compacted.
    pub compress_threshold_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_memory_mb: 50.0,
            default_ttl_ms: 30_000,
            compress_threshold_bytes: 8 * 1024,
        }
    }
}

/// Dual-source integrator behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    /// Subjects per chunk in the batch variant (bounds concurrent oracle calls).
    pub chunk_size: usize,
    /// Whether the visibility subsystem is wired in (false wires the null oracle).
    pub visibility_enabled: bool,
    /// Whether the cover subsystem is wired in.
    pub cover_enabled: bool,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            visibility_enabled: true,
            cover_enabled: true,
        }
    }
}

/// Batch/concurrency optimizer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Starting batch size; adapted at runtime within [min, max].
    pub initial_batch_size: usize,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    /// Starting ceiling on concurrent in-flight batches; adapted within [1, 10].
    pub max_concurrent_batches: usize,
    /// Per-batch deadline, milliseconds.
    pub batch_timeout_ms: u64,
    /// Pacing gap between batch launches, milliseconds.
    pub inter_batch_delay_ms: u64,
    /// Spatial clustering radius for multi-target mode, scene units.
    pub cluster_radius: f64,
    /// Maximum subjects per spatial cluster.
    pub max_cluster_size: usize,
    /// Subjects per emitted stream batch.
    pub stream_batch_size: usize,
    /// Estimated result-set memory at which the stream requests a reclaim, MB.
    pub stream_memory_ceiling_mb: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: 10,
            min_batch_size: 5,
            max_batch_size: 20,
            max_concurrent_batches: 5,
            batch_timeout_ms: 5_000,
            inter_batch_delay_ms: 50,
            cluster_radius: 200.0,
            max_cluster_size: 8,
            stream_batch_size: 50,
            stream_memory_ceiling_mb: 100.0,
        }
    }
}

/// Transactional applier behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplierConfig {
    /// How long a completed transaction stays available for late rollback, ms.
    pub grace_period_ms: u64,
    /// Maximum inconsistencies the post-apply check will auto-correct.
    pub auto_correct_threshold: usize,
    /// Attempts per persistent write before it is a hard error.
    pub write_retry_attempts: u32,
    /// Initial backoff between write retries, milliseconds.
    pub write_retry_initial_ms: u64,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 30_000,
            auto_correct_threshold: 3,
            write_retry_attempts: 3,
            write_retry_initial_ms: 50,
        }
    }
}

/// Logging output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of: trace, debug, info, warn, error.
    pub level: String,
    /// One of: json, pretty.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = Config::default();
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.integrator.chunk_size, 10);
        assert_eq!(config.optimizer.max_concurrent_batches, 5);
        assert_eq!(config.optimizer.batch_timeout_ms, 5_000);
        assert_eq!(config.applier.grace_period_ms, 30_000);
        assert_eq!(config.applier.auto_correct_threshold, 3);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"optimizer": {"max_batch_size": 40}}"#).unwrap();
        assert_eq!(config.optimizer.max_batch_size, 40);
        assert_eq!(config.optimizer.min_batch_size, 5);
        assert_eq!(config.cache.max_entries, 1000);
    }
}
