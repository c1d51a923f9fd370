//! Configuration loader with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid cache max_entries: {0}. Must be at least 1")]
    InvalidCacheEntries(usize),

    #[error("Invalid cache max_memory_mb: {0}. Must be positive")]
    InvalidCacheMemory(f64),

    #[error("Invalid integrator chunk_size: {0}. Must be at least 1")]
    InvalidChunkSize(usize),

    #[error(
        "Invalid optimizer batch bounds: min {min} must be <= max {max} and both at least 1"
    )]
    InvalidBatchBounds { min: usize, max: usize },

    #[error("Invalid optimizer concurrency: {0}. Must be between 1 and 10")]
    InvalidConcurrency(usize),

    #[error("Invalid batch timeout: {0}ms. Must be positive")]
    InvalidBatchTimeout(u64),

    #[error("Invalid applier auto_correct_threshold: {0}. Must be at most 10")]
    InvalidAutoCorrectThreshold(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),
}

/// Loads and validates `Config` from layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .sightline/config.yaml (project config)
    /// 3. .sightline/local.yaml (local overrides, optional)
    /// 4. Environment variables (`SIGHTLINE_*` prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".sightline/config.yaml"))
            .merge(Yaml::file(".sightline/local.yaml"))
            .merge(Env::prefixed("SIGHTLINE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.cache.max_entries == 0 {
            return Err(ConfigError::InvalidCacheEntries(config.cache.max_entries));
        }
        if config.cache.max_memory_mb <= 0.0 {
            return Err(ConfigError::InvalidCacheMemory(config.cache.max_memory_mb));
        }

        if config.integrator.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(config.integrator.chunk_size));
        }

        let min = config.optimizer.min_batch_size;
        let max = config.optimizer.max_batch_size;
        if min == 0 || max == 0 || min > max {
            return Err(ConfigError::InvalidBatchBounds { min, max });
        }
        if config.optimizer.max_concurrent_batches == 0
            || config.optimizer.max_concurrent_batches > 10
        {
            return Err(ConfigError::InvalidConcurrency(
                config.optimizer.max_concurrent_batches,
            ));
        }
        if config.optimizer.batch_timeout_ms == 0 {
            return Err(ConfigError::InvalidBatchTimeout(
                config.optimizer.batch_timeout_ms,
            ));
        }

        if config.applier.auto_correct_threshold > 10 {
            return Err(ConfigError::InvalidAutoCorrectThreshold(
                config.applier.auto_correct_threshold,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_bounds() {
        use crate::domain::models::config::{LoggingConfig, OptimizerConfig};

        let config = Config {
            optimizer: OptimizerConfig {
                min_batch_size: 30,
                max_batch_size: 10,
                ..OptimizerConfig::default()
            },
            ..Config::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBatchBounds { .. })
        ));

        let config = Config {
            optimizer: OptimizerConfig {
                max_concurrent_batches: 50,
                ..OptimizerConfig::default()
            },
            ..Config::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidConcurrency(50))
        ));

        let config = Config {
            logging: LoggingConfig {
                level: "loud".to_string(),
                ..LoggingConfig::default()
            },
            ..Config::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_load_from_file_merges_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "optimizer:\n  max_batch_size: 32\ncache:\n  max_entries: 250"
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.optimizer.max_batch_size, 32);
        assert_eq!(config.cache.max_entries, 250);
        // Untouched sections keep their defaults.
        assert_eq!(config.applier.grace_period_ms, 30_000);
    }

    #[test]
    fn test_load_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "integrator:\n  chunk_size: 0").unwrap();
        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }
}
