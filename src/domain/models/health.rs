//! Health domain model: resource samples, thresholds and alerts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metric observed by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
    ErrorRate,
}

impl MetricKind {
    pub const ALL: [Self; 4] = [Self::Cpu, Self::Memory, Self::Disk, Self::ErrorRate];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::ErrorRate => "error_rate",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a metric relative to its thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Two-level threshold for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub warning: f64,
    pub critical: f64,
}

impl ThresholdPair {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    pub fn level(&self, value: f64) -> AlertLevel {
        if value >= self.critical {
            AlertLevel::Critical
        } else if value >= self.warning {
            AlertLevel::Warning
        } else {
            AlertLevel::Normal
        }
    }
}

/// Per-metric thresholds. CPU, memory and disk are percentages, error rate a fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    #[serde(default = "default_cpu")]
    pub cpu: ThresholdPair,
    #[serde(default = "default_memory")]
    pub memory: ThresholdPair,
    #[serde(default = "default_disk")]
    pub disk: ThresholdPair,
    #[serde(default = "default_error_rate")]
    pub error_rate: ThresholdPair,
}

const fn default_cpu() -> ThresholdPair {
    ThresholdPair::new(75.0, 90.0)
}

const fn default_memory() -> ThresholdPair {
    ThresholdPair::new(80.0, 95.0)
}

const fn default_disk() -> ThresholdPair {
    ThresholdPair::new(85.0, 95.0)
}

const fn default_error_rate() -> ThresholdPair {
    ThresholdPair::new(0.25, 0.5)
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            memory: default_memory(),
            disk: default_disk(),
            error_rate: default_error_rate(),
        }
    }
}

impl HealthThresholds {
    pub const fn for_metric(&self, metric: MetricKind) -> ThresholdPair {
        match metric {
            MetricKind::Cpu => self.cpu,
            MetricKind::Memory => self.memory,
            MetricKind::Disk => self.disk,
            MetricKind::ErrorRate => self.error_rate,
        }
    }
}

/// Point-in-time resource reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    /// Fraction of recent task results that failed
    pub error_rate: f64,
    pub timestamp: DateTime<Utc>,
}

impl ResourceSample {
    pub fn new(cpu_percent: f64, memory_percent: f64, disk_percent: f64) -> Self {
        Self {
            cpu_percent,
            memory_percent,
            disk_percent,
            error_rate: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub const fn with_error_rate(mut self, error_rate: f64) -> Self {
        self.error_rate = error_rate;
        self
    }

    pub const fn value(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::Cpu => self.cpu_percent,
            MetricKind::Memory => self.memory_percent,
            MetricKind::Disk => self.disk_percent,
            MetricKind::ErrorRate => self.error_rate,
        }
    }
}

/// A threshold crossing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub metric: Option<MetricKind>,
    pub level: AlertLevel,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn for_metric(metric: MetricKind, level: AlertLevel, value: f64, threshold: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            metric: Some(metric),
            level,
            value,
            threshold,
            message: format!("{metric} at {value:.2} crossed {level} threshold {threshold:.2}"),
            raised_at: Utc::now(),
        }
    }

    /// Alert not tied to a metric, e.g. a task that exhausted its retries.
    pub fn general(level: AlertLevel, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            metric: None,
            level,
            value: 0.0,
            threshold: 0.0,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Overall health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

impl From<AlertLevel> for HealthStatus {
    fn from(level: AlertLevel) -> Self {
        match level {
            AlertLevel::Normal => Self::Healthy,
            AlertLevel::Warning => Self::Degraded,
            AlertLevel::Critical => Self::Critical,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Critical => write!(f, "critical"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Metric level as reported by `get_health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricReport {
    pub metric: MetricKind,
    pub value: f64,
    pub level: AlertLevel,
    pub threshold: ThresholdPair,
}

/// Snapshot returned by `get_health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub engine_running: bool,
    pub latest_sample: Option<ResourceSample>,
    pub metrics: Vec<MetricReport>,
    pub recent_alerts: Vec<Alert>,
    pub queue_depth: usize,
    pub running_tasks: usize,
    pub bots_online: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_levels() {
        let t = ThresholdPair::new(70.0, 90.0);
        assert_eq!(t.level(10.0), AlertLevel::Normal);
        assert_eq!(t.level(70.0), AlertLevel::Warning);
        assert_eq!(t.level(95.0), AlertLevel::Critical);
    }

    #[test]
    fn test_sample_value_lookup() {
        let s = ResourceSample::new(10.0, 20.0, 30.0).with_error_rate(0.1);
        assert!((s.value(MetricKind::Disk) - 30.0).abs() < f64::EPSILON);
        assert!((s.value(MetricKind::ErrorRate) - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_alert_message() {
        let a = Alert::for_metric(MetricKind::Cpu, AlertLevel::Critical, 97.0, 90.0);
        assert!(a.message.contains("cpu"));
        assert!(a.message.contains("critical"));
        assert_eq!(HealthStatus::from(a.level), HealthStatus::Critical);
    }
}
