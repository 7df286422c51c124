//! Health sampling, alerting and rule-driven task generation.

mod common;

use std::sync::Arc;

use anyhow::{Result, bail};
use common::fast_config;
use overwatch::domain::models::{AlertLevel, HealthStatus, MetricKind};
use overwatch::{
    Engine, EventPayload, GenerationRule, NewTask, StaticSampler, SystemSignals, TaskPriority,
    TaskStatus, TaskType,
};

fn engine_with(sampler: Arc<StaticSampler>) -> Engine {
    let engine = Engine::new(fast_config(), sampler).unwrap();
    engine.install_builtins();
    engine
}

#[tokio::test]
async fn test_hot_cpu_raises_alert_and_remediation_task() {
    let sampler = Arc::new(StaticSampler::new(97.0, 20.0, 30.0));
    let engine = engine_with(Arc::clone(&sampler));

    let (sample, alerts) = engine.sample_health().await.unwrap();
    assert!((sample.cpu_percent - 97.0).abs() < f64::EPSILON);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].metric, Some(MetricKind::Cpu));
    assert_eq!(alerts[0].level, AlertLevel::Critical);

    let health = engine.get_health();
    assert_eq!(health.status, HealthStatus::Critical);
    assert_eq!(health.recent_alerts.len(), 1);
    assert!(!health.engine_running);

    let report = engine.run_generation_once();
    assert_eq!(report.rules_evaluated, 2);
    // Remediation plus the periodic health check
    assert_eq!(report.tasks_submitted, 2);

    let tasks = engine.list_tasks(Some(TaskStatus::Pending));
    let remediation = tasks
        .iter()
        .find(|t| t.task_type == TaskType::Optimization)
        .expect("remediation task");
    assert_eq!(remediation.priority, TaskPriority::High);
    assert!(tasks
        .iter()
        .any(|t| t.task_type == TaskType::HealthCheck && t.priority == TaskPriority::Background));

    // Same condition again: the in-flight remediation absorbs it
    let again = engine.run_generation_once();
    assert_eq!(again.tasks_submitted, 0);
    assert_eq!(again.duplicates_dropped, 1);
    assert_eq!(engine.list_tasks(None).len(), 2);
}

#[tokio::test]
async fn test_recovery_then_new_crossing_alerts_again() {
    let sampler = Arc::new(StaticSampler::new(97.0, 20.0, 30.0));
    let engine = engine_with(Arc::clone(&sampler));

    assert_eq!(engine.sample_health().await.unwrap().1.len(), 1);
    assert!(engine.sample_health().await.unwrap().1.is_empty());

    sampler.set(10.0, 20.0, 30.0);
    assert!(engine.sample_health().await.unwrap().1.is_empty());
    assert_eq!(engine.get_health().status, HealthStatus::Healthy);

    sampler.set(97.0, 20.0, 30.0);
    assert_eq!(engine.sample_health().await.unwrap().1.len(), 1);

    let raised = engine
        .event_history()
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::AlertRaised { .. }))
        .count();
    assert_eq!(raised, 2);
}

struct Broken;

impl GenerationRule for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn evaluate(&self, _signals: &SystemSignals) -> Result<Vec<NewTask>> {
        bail!("metrics backend offline")
    }
}

struct Panicky;

impl GenerationRule for Panicky {
    fn name(&self) -> &str {
        "panicky"
    }

    fn evaluate(&self, _signals: &SystemSignals) -> Result<Vec<NewTask>> {
        panic!("rule bug")
    }
}

#[test]
fn test_failing_rules_are_isolated() {
    let engine = engine_with(Arc::new(StaticSampler::idle()));
    engine.register_rule(Arc::new(Broken));
    engine.register_rule(Arc::new(Panicky));

    let report = engine.run_generation_once();
    assert_eq!(report.rules_evaluated, 4);
    assert_eq!(report.rules_failed, 2);
    // The periodic health check still ran
    assert_eq!(report.tasks_submitted, 1);

    let failures: Vec<String> = engine
        .event_history()
        .into_iter()
        .filter_map(|e| match e.payload {
            EventPayload::RuleFailed { rule, .. } => Some(rule),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec!["broken".to_string(), "panicky".to_string()]);
}

#[test]
fn test_generation_stops_on_back_pressure() {
    let mut config = fast_config();
    config.scheduler.max_queue_length = 1;
    let engine = Engine::new(config, Arc::new(StaticSampler::idle())).unwrap();
    engine.install_builtins();
    engine
        .create_task(NewTask::new("filler", TaskType::Backup, TaskPriority::Low))
        .unwrap();

    let report = engine.run_generation_once();
    assert!(report.back_pressure);
    assert_eq!(report.tasks_submitted, 0);
}
