use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::{BUILTIN_STRATEGIES, Config};
use crate::domain::models::health::ThresholdPair;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_tasks: {0}. Must be at least 1")]
    InvalidMaxConcurrentTasks(usize),

    #[error("Invalid max_queue_length: {0}. Must be at least 1")]
    InvalidMaxQueueLength(usize),

    #[error("Invalid capacity ceiling for {name}: {value}. Must be positive")]
    InvalidCapacity { name: &'static str, value: f64 },

    #[error("Invalid tick_interval_ms: {0}. Must be at least 1")]
    InvalidTickInterval(u64),

    #[error(
        "Invalid backoff configuration: backoff_base_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid {metric} thresholds: warning ({warning}) must not exceed critical ({critical})")]
    InvalidThreshold {
        metric: &'static str,
        warning: f64,
        critical: f64,
    },

    #[error(
        "Unknown assignment strategy: {0}. Must be one of: best_fit, load_balanced, round_robin, priority_first"
    )]
    UnknownStrategy(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Invalid event channel capacity: {0}. Must be at least 1")]
    InvalidChannelCapacity(usize),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .overwatch/config.yaml (project config)
    /// 3. .overwatch/local.yaml (local overrides, optional)
    /// 4. Environment variables (OVERWATCH_* prefix, `__` separates nested keys)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment()
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("OVERWATCH_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".overwatch/config.yaml"))
            .merge(Yaml::file(".overwatch/local.yaml"))
            .merge(Env::prefixed("OVERWATCH_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let scheduler = &config.scheduler;
        if scheduler.max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidMaxConcurrentTasks(0));
        }
        if scheduler.max_queue_length == 0 {
            return Err(ConfigError::InvalidMaxQueueLength(0));
        }
        if scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidTickInterval(0));
        }
        for (name, value) in [
            ("cpu", scheduler.capacity.cpu),
            ("memory_mb", scheduler.capacity.memory_mb),
            ("io", scheduler.capacity.io),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidCapacity { name, value });
            }
        }
        if scheduler.default_task_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "default_task_timeout_secs must be at least 1".to_string(),
            ));
        }

        if config.retry.backoff_base_ms > config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.backoff_base_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.generator.interval_secs == 0 || config.health.sample_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "generator and health intervals must be at least 1 second".to_string(),
            ));
        }

        let thresholds = &config.health.thresholds;
        check_threshold("cpu", thresholds.cpu)?;
        check_threshold("memory", thresholds.memory)?;
        check_threshold("disk", thresholds.disk)?;
        check_threshold("error_rate", thresholds.error_rate)?;

        if !BUILTIN_STRATEGIES.contains(&config.assignment.strategy.as_str()) {
            return Err(ConfigError::UnknownStrategy(
                config.assignment.strategy.clone(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.event_bus.channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity(0));
        }

        for bot in &config.bots {
            bot.validate()
                .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;
        }

        Ok(())
    }
}

fn check_threshold(metric: &'static str, pair: ThresholdPair) -> Result<(), ConfigError> {
    if pair.warning > pair.critical {
        return Err(ConfigError::InvalidThreshold {
            metric,
            warning: pair.warning,
            critical: pair.critical,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::bot::BotRegistration;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.scheduler.max_concurrent_tasks, 4);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
scheduler:
  max_concurrent_tasks: 2
  max_queue_length: 50
  capacity:
    cpu: 1.0
retry:
  max_retries: 5
  backoff_base_ms: 200
  max_backoff_ms: 5000
assignment:
  strategy: round_robin
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.scheduler.max_concurrent_tasks, 2);
        assert_eq!(config.scheduler.max_queue_length, 50);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.assignment.strategy, "round_robin");
        assert_eq!(config.logging.format, "json");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = Config::default();
        config.scheduler.max_concurrent_tasks = 0;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConcurrentTasks(0))
        ));
    }

    #[test]
    fn test_validate_zero_queue_length() {
        let mut config = Config::default();
        config.scheduler.max_queue_length = 0;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxQueueLength(0))
        ));
    }

    #[test]
    fn test_validate_non_positive_capacity() {
        let mut config = Config::default();
        config.scheduler.capacity.memory_mb = 0.0;

        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidCapacity { name, .. }) => assert_eq!(name, "memory_mb"),
            other => panic!("Expected InvalidCapacity, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.retry.backoff_base_ms = 30_000;
        config.retry.max_backoff_ms = 10_000;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(30_000, 10_000))
        ));
    }

    #[test]
    fn test_validate_inverted_threshold() {
        let mut config = Config::default();
        config.health.thresholds.disk = ThresholdPair::new(99.0, 90.0);

        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidThreshold { metric, .. }) => assert_eq!(metric, "disk"),
            other => panic!("Expected InvalidThreshold, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_unknown_strategy() {
        let mut config = Config::default();
        config.assignment.strategy = "random".to_string();

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::UnknownStrategy(name)) if name == "random"
        ));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(format)) if format == "xml"
        ));
    }

    #[test]
    fn test_validate_zero_channel_capacity() {
        let mut config = Config::default();
        config.event_bus.channel_capacity = 0;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidChannelCapacity(0))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_bot() {
        let mut config = Config::default();
        config.bots.push(BotRegistration::new("x").max_concurrent_tasks(0));

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "scheduler:\n  max_concurrent_tasks: 2\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(
            override_file,
            "scheduler:\n  max_concurrent_tasks: 6\nlogging:\n  level: debug"
        )
        .unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.scheduler.max_concurrent_tasks, 6, "Override should win");
        assert_eq!(
            config.logging.level, "debug",
            "Override should win for nested fields"
        );
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
        assert_eq!(config.scheduler.max_queue_length, 1000, "Defaults fill the rest");
    }

    #[test]
    fn test_env_override_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "scheduler:\n  max_queue_length: 10").unwrap();
        file.flush().unwrap();

        temp_env::with_vars(
            [
                ("OVERWATCH_SCHEDULER__MAX_QUEUE_LENGTH", Some("20")),
                ("OVERWATCH_ASSIGNMENT__STRATEGY", Some("load_balanced")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.scheduler.max_queue_length, 20);
                assert_eq!(config.assignment.strategy, "load_balanced");
            },
        );
    }

    #[test]
    fn test_load_from_file_rejects_invalid() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "assignment:\n  strategy: coin_flip").unwrap();
        file.flush().unwrap();

        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }
}
