//! Health monitor bridge.
//!
//! Samples host resources on a timer, compares each metric against its
//! warning and critical thresholds and raises an alert whenever a metric
//! escalates. Remediation work is produced by `HealthRule`, an ordinary
//! generation rule fed the latest sample.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event_bus::{EventBus, EventPayload};
use crate::domain::models::config::HealthConfig;
use crate::domain::models::health::{
    Alert, AlertLevel, HealthReport, HealthStatus, HealthThresholds, MetricKind, MetricReport,
    ResourceSample,
};
use crate::domain::models::task::{NewTask, TaskContext, TaskPriority, TaskType};
use crate::domain::ports::{GenerationRule, ResourceSampler, SystemSignals};

/// Subsystem tag carried by tasks the health rules generate
pub const HEALTH_SUBSYSTEM: &str = "health";

pub struct HealthMonitor {
    config: HealthConfig,
    sampler: Arc<dyn ResourceSampler>,
    event_bus: Arc<EventBus>,
    latest: RwLock<Option<ResourceSample>>,
    /// Last level seen per metric, for crossing detection
    levels: Mutex<HashMap<MetricKind, AlertLevel>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, sampler: Arc<dyn ResourceSampler>, event_bus: Arc<EventBus>) -> Self {
        Self {
            config,
            sampler,
            event_bus,
            latest: RwLock::new(None),
            levels: Mutex::new(HashMap::new()),
        }
    }

    pub const fn thresholds(&self) -> &HealthThresholds {
        &self.config.thresholds
    }

    pub fn latest_sample(&self) -> Option<ResourceSample> {
        *self.latest.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one sample, record it and raise alerts for escalated metrics
    ///
    /// # Errors
    ///
    /// Fails when the sampler cannot read the host.
    pub async fn sample_once(&self, error_rate: Option<f64>) -> Result<(ResourceSample, Vec<Alert>)> {
        let sample = self
            .sampler
            .sample()
            .await?
            .with_error_rate(error_rate.unwrap_or(0.0));

        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(sample);
        self.event_bus
            .publish(EventPayload::HealthSampled { sample });

        let alerts = self.evaluate(&sample);
        debug!(
            cpu = sample.cpu_percent,
            memory = sample.memory_percent,
            disk = sample.disk_percent,
            error_rate = sample.error_rate,
            alerts = alerts.len(),
            "health sample taken"
        );
        Ok((sample, alerts))
    }

    /// Compare a sample with the thresholds and publish an alert for every
    /// metric whose level rose since the previous sample
    pub fn evaluate(&self, sample: &ResourceSample) -> Vec<Alert> {
        let mut levels = self.levels.lock().unwrap_or_else(PoisonError::into_inner);
        let mut alerts = Vec::new();

        for metric in MetricKind::ALL {
            let thresholds = self.config.thresholds.for_metric(metric);
            let value = sample.value(metric);
            let level = thresholds.level(value);
            let previous = levels.insert(metric, level).unwrap_or(AlertLevel::Normal);

            if level > previous {
                let threshold = match level {
                    AlertLevel::Critical => thresholds.critical,
                    _ => thresholds.warning,
                };
                let alert = Alert::for_metric(metric, level, value, threshold);
                warn!(metric = %metric, level = %level, value, threshold, "health threshold crossed");
                self.event_bus.publish(EventPayload::AlertRaised {
                    alert: alert.clone(),
                    task_id: None,
                });
                alerts.push(alert);
            } else if level < previous {
                info!(metric = %metric, from = %previous, to = %level, "metric recovered");
            }
        }
        alerts
    }

    /// Alerts from the bus history, newest last
    pub fn recent_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .event_bus
            .history()
            .into_iter()
            .filter_map(|event| match event.payload {
                EventPayload::AlertRaised { alert, .. } => Some(alert),
                _ => None,
            })
            .collect();
        let excess = alerts.len().saturating_sub(self.config.alert_history);
        alerts.drain(..excess);
        alerts
    }

    /// Health snapshot built from the latest sample
    pub fn report(
        &self,
        engine_running: bool,
        queue_depth: usize,
        running_tasks: usize,
        bots_online: usize,
    ) -> HealthReport {
        let latest = self.latest_sample();
        let metrics: Vec<MetricReport> = latest
            .map(|sample| {
                MetricKind::ALL
                    .into_iter()
                    .map(|metric| {
                        let threshold = self.config.thresholds.for_metric(metric);
                        let value = sample.value(metric);
                        MetricReport {
                            metric,
                            value,
                            level: threshold.level(value),
                            threshold,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let status = if latest.is_none() {
            HealthStatus::Unknown
        } else {
            metrics
                .iter()
                .map(|m| m.level)
                .max()
                .map_or(HealthStatus::Healthy, HealthStatus::from)
        };

        HealthReport {
            status,
            engine_running,
            latest_sample: latest,
            metrics,
            recent_alerts: self.recent_alerts(),
            queue_depth,
            running_tasks,
            bots_online,
        }
    }

    /// Sample on the configured interval until `shutdown` is cancelled
    pub async fn run<F>(self: Arc<Self>, shutdown: CancellationToken, error_rate: F)
    where
        F: Fn() -> Option<f64> + Send + Sync + 'static,
    {
        let mut ticker = interval(Duration::from_secs(self.config.sample_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.sample_interval_secs,
            "health monitor started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sample_once(error_rate()).await {
                        warn!(error = %e, "failed to sample resources");
                    }
                }
            }
        }

        info!("health monitor stopped");
    }
}

/// Generation rule turning critical metrics into maintenance tasks
pub struct HealthRule {
    thresholds: HealthThresholds,
}

impl HealthRule {
    pub const fn new(thresholds: HealthThresholds) -> Self {
        Self { thresholds }
    }
}

impl GenerationRule for HealthRule {
    fn name(&self) -> &str {
        "health_remediation"
    }

    fn evaluate(&self, signals: &SystemSignals) -> Result<Vec<NewTask>> {
        let Some(sample) = signals.sample else {
            return Ok(Vec::new());
        };

        Ok(MetricKind::ALL
            .into_iter()
            .filter_map(|metric| {
                let value = sample.value(metric);
                let threshold = self.thresholds.for_metric(metric);
                (threshold.level(value) == AlertLevel::Critical).then(|| {
                    NewTask::new(
                        format!("Remediate critical {metric}"),
                        remediation_type(metric),
                        TaskPriority::High,
                    )
                    .description(format!(
                        "{metric} at {value:.2} is above the critical threshold {:.2}",
                        threshold.critical
                    ))
                    .context(
                        TaskContext::for_subsystem(format!("{HEALTH_SUBSYSTEM}.{metric}"))
                            .with("metric", metric.as_str())
                            .with("value", value),
                    )
                })
            })
            .collect())
    }
}

const fn remediation_type(metric: MetricKind) -> TaskType {
    match metric {
        MetricKind::Disk => TaskType::FileCleanup,
        MetricKind::Cpu | MetricKind::Memory => TaskType::Optimization,
        MetricKind::ErrorRate => TaskType::Diagnostics,
    }
}

/// Emits one `health_check` task per time bucket
pub struct PeriodicHealthCheckRule {
    bucket_secs: i64,
    last_bucket: Mutex<Option<i64>>,
}

impl PeriodicHealthCheckRule {
    pub fn new(bucket_secs: u64) -> Self {
        Self {
            bucket_secs: i64::try_from(bucket_secs.max(1)).unwrap_or(i64::MAX),
            last_bucket: Mutex::new(None),
        }
    }

    fn bucket(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(self.bucket_secs)
    }
}

impl GenerationRule for PeriodicHealthCheckRule {
    fn name(&self) -> &str {
        "periodic_health_check"
    }

    fn evaluate(&self, signals: &SystemSignals) -> Result<Vec<NewTask>> {
        let bucket = self.bucket(signals.now);
        let mut last = self.last_bucket.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == Some(bucket) {
            return Ok(Vec::new());
        }
        *last = Some(bucket);

        Ok(vec![NewTask::new(
            "Periodic health check",
            TaskType::HealthCheck,
            TaskPriority::Background,
        )
        .description("Sample host resources")
        .context(TaskContext::for_subsystem(HEALTH_SUBSYSTEM))])
    }
}
