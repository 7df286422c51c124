//! Engine configuration, deserialized from YAML and environment overrides.

use serde::{Deserialize, Serialize};

use super::bot::BotRegistration;
use super::health::HealthThresholds;

/// Main configuration structure for Overwatch
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Scheduler and ready-set configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Task generator configuration
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Health monitor configuration
    #[serde(default)]
    pub health: HealthConfig,

    /// Bot assignment configuration
    #[serde(default)]
    pub assignment: AssignmentConfig,

    /// Event bus configuration
    #[serde(default)]
    pub event_bus: EventBusConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Bots registered at startup
    #[serde(default)]
    pub bots: Vec<BotRegistration>,
}

/// Aggregate resource ceilings over all running tasks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CapacityConfig {
    /// Total CPU fraction (1.0 = one core)
    #[serde(default = "default_cpu_capacity")]
    pub cpu: f64,

    /// Total memory in MB
    #[serde(default = "default_memory_capacity_mb")]
    pub memory_mb: f64,

    /// Total I/O fraction
    #[serde(default = "default_io_capacity")]
    pub io: f64,
}

const fn default_cpu_capacity() -> f64 {
    4.0
}

const fn default_memory_capacity_mb() -> f64 {
    4096.0
}

const fn default_io_capacity() -> f64 {
    4.0
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            cpu: default_cpu_capacity(),
            memory_mb: default_memory_capacity_mb(),
            io: default_io_capacity(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Maximum simultaneous executions
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Maximum ready-set length before submissions are rejected
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: usize,

    /// Scheduler loop tick in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Resource ceilings
    #[serde(default)]
    pub capacity: CapacityConfig,

    /// Execution timeout applied to tasks that do not set one
    #[serde(default = "default_task_timeout_secs")]
    pub default_task_timeout_secs: u64,
}

const fn default_max_concurrent_tasks() -> usize {
    4
}

const fn default_max_queue_length() -> usize {
    1000
}

const fn default_tick_interval_ms() -> u64 {
    250
}

const fn default_task_timeout_secs() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            max_queue_length: default_max_queue_length(),
            tick_interval_ms: default_tick_interval_ms(),
            capacity: CapacityConfig::default(),
            default_task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Retries granted to tasks that do not set their own
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff in milliseconds, doubled per attempt
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_backoff_base_ms() -> u64 {
    1000
}

const fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Task generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GeneratorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between rule evaluations
    #[serde(default = "default_generator_interval_secs")]
    pub interval_secs: u64,

    /// Width of the de-duplication time bucket in seconds
    #[serde(default = "default_dedup_bucket_secs")]
    pub dedup_bucket_secs: u64,
}

const fn default_true() -> bool {
    true
}

const fn default_generator_interval_secs() -> u64 {
    30
}

const fn default_dedup_bucket_secs() -> u64 {
    300
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_generator_interval_secs(),
            dedup_bucket_secs: default_dedup_bucket_secs(),
        }
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between resource samples
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,

    /// Warning/critical thresholds per metric
    #[serde(default)]
    pub thresholds: HealthThresholds,

    /// Number of recent task results the error rate is computed over
    #[serde(default = "default_error_rate_window")]
    pub error_rate_window: usize,

    /// Alerts kept for `get_health`
    #[serde(default = "default_alert_history")]
    pub alert_history: usize,
}

const fn default_sample_interval_secs() -> u64 {
    15
}

const fn default_error_rate_window() -> usize {
    50
}

const fn default_alert_history() -> usize {
    100
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_secs: default_sample_interval_secs(),
            thresholds: HealthThresholds::default(),
            error_rate_window: default_error_rate_window(),
            alert_history: default_alert_history(),
        }
    }
}

/// Bot assignment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AssignmentConfig {
    /// Initial strategy: best_fit, load_balanced, round_robin, priority_first
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Score bonus when a bot prefers the task's priority
    #[serde(default = "default_priority_preference_bonus")]
    pub priority_preference_bonus: u32,

    /// Bots silent for longer than this are marked offline
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
}

/// Strategy names registered by every engine.
pub const BUILTIN_STRATEGIES: [&str; 4] = ["best_fit", "load_balanced", "round_robin", "priority_first"];

fn default_strategy() -> String {
    "best_fit".to_string()
}

const fn default_priority_preference_bonus() -> u32 {
    10
}

const fn default_heartbeat_timeout_secs() -> u64 {
    120
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            priority_preference_bonus: default_priority_preference_bonus(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
        }
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EventBusConfig {
    /// Capacity of the raw event stream; callbacks are not bounded by it
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Events retained in memory for replay
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

const fn default_channel_capacity() -> usize {
    1024
}

const fn default_history_size() -> usize {
    1000
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            history_size: default_history_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files (stdout only when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Also log to stdout when writing files
    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    /// Rotation: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            enable_stdout: true,
            rotation: default_rotation(),
        }
    }
}
