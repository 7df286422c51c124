//! Common test utilities for integration tests
//!
//! Shared engine fixtures, handlers and polling helpers used across the
//! integration test files.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::json;

use overwatch::{
    BotCapability, BotRegistration, Config, Engine, ExecutionContext, StaticSampler, Task,
    TaskHandler, TaskType,
};

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Configuration with fast ticks and no background generation
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.scheduler.tick_interval_ms = 10;
    config.retry.backoff_base_ms = 10;
    config.retry.max_backoff_ms = 50;
    config.generator.enabled = false;
    config.health.enabled = false;
    config
}

pub fn engine(config: Config) -> Engine {
    Engine::new(config, Arc::new(StaticSampler::idle())).expect("engine builds")
}

/// Poll `predicate` every 10ms until it holds or `timeout_ms` elapses
pub async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

/// Bot covering `task_types` through one capability
pub fn bot(id: &str, boost: u32, max_concurrent: usize, task_types: Vec<TaskType>) -> BotRegistration {
    BotRegistration::new(format!("{id} bot"))
        .id(id)
        .max_concurrent_tasks(max_concurrent)
        .capability(BotCapability::new(format!("{id}-skill"), task_types).with_boost(boost))
}

/// Completes immediately, echoing the task name
pub struct Echo;

#[async_trait]
impl TaskHandler for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, task: &Task, _ctx: &ExecutionContext) -> Result<serde_json::Value> {
        Ok(json!({ "echo": task.name }))
    }
}

/// Always fails
pub struct AlwaysFails;

#[async_trait]
impl TaskHandler for AlwaysFails {
    fn name(&self) -> &str {
        "always_fails"
    }

    async fn execute(&self, _task: &Task, _ctx: &ExecutionContext) -> Result<serde_json::Value> {
        bail!("disk unreachable")
    }
}

/// Sleeps without observing cancellation and records start order
pub struct Recorder {
    pub delay: Duration,
    started: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            started: Mutex::new(Vec::new()),
        })
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn execute(&self, task: &Task, _ctx: &ExecutionContext) -> Result<serde_json::Value> {
        self.started.lock().unwrap().push(task.name.clone());
        tokio::time::sleep(self.delay).await;
        Ok(json!({ "slept_ms": u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX) }))
    }
}
