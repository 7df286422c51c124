//! Engine facade.
//!
//! Owns one instance of every service and exposes the operations external
//! surfaces (CLI, dashboards) drive. Each mutating operation returns a
//! serializable snapshot of what it changed, and every state transition is
//! also published on the event bus.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::assignment_engine::{AssignmentEngine, AssignmentStats};
use super::builtin_handlers::{CommandHandler, HealthCheckHandler};
use super::event_bus::{EngineEvent, EventBus, EventPayload, SubscriptionId};
use super::handler_registry::HandlerRegistry;
use super::health_monitor::{HealthMonitor, HealthRule, PeriodicHealthCheckRule};
use super::scheduler::{Scheduler, SchedulerStats};
use super::task_generator::{GenerationReport, TaskGenerator};
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::assignment::Assignment;
use crate::domain::models::bot::{Bot, BotRegistration};
use crate::domain::models::config::Config;
use crate::domain::models::health::{Alert, HealthReport, ResourceSample};
use crate::domain::models::task::{NewTask, Task, TaskDefaults, TaskResult, TaskStatus, TaskType};
use crate::domain::ports::{
    AssignmentStrategy, GenerationRule, ResourceSampler, SystemSignals, TaskHandler,
};

/// A task with every recorded result and assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    pub task: Task,
    pub results: Vec<TaskResult>,
    pub assignments: Vec<Assignment>,
}

/// Snapshot returned by `get_stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<i64>,
    pub tasks: SchedulerStats,
    pub assignments: AssignmentStats,
    pub bots_total: usize,
    pub events_published: u64,
}

struct Runtime {
    shutdown: CancellationToken,
    dispatcher_shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

/// Task scheduling and bot assignment engine
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use overwatch::application::StaticSampler;
/// use overwatch::domain::models::{Config, NewTask, TaskPriority, TaskType};
/// use overwatch::services::Engine;
///
/// # async fn example() -> anyhow::Result<()> {
/// let engine = Engine::new(Config::default(), Arc::new(StaticSampler::idle()))?;
/// engine.install_builtins();
/// engine.start()?;
///
/// let task = engine.create_task(NewTask::new(
///     "nightly check",
///     TaskType::HealthCheck,
///     TaskPriority::Low,
/// ))?;
/// println!("submitted {}", task.id);
///
/// engine.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    config: Config,
    defaults: TaskDefaults,
    event_bus: Arc<EventBus>,
    handlers: Arc<HandlerRegistry>,
    assignments: Arc<AssignmentEngine>,
    scheduler: Arc<Scheduler>,
    generator: Arc<TaskGenerator>,
    health: Arc<HealthMonitor>,
    sampler: Arc<dyn ResourceSampler>,
    runtime: Mutex<Option<Runtime>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl Engine {
    /// Build an engine and register the bots declared in `config`
    ///
    /// # Errors
    ///
    /// `Validation` for an unknown strategy or an invalid bot declaration
    pub fn new(config: Config, sampler: Arc<dyn ResourceSampler>) -> EngineResult<Self> {
        let defaults = TaskDefaults {
            max_retries: config.retry.max_retries,
            retry_backoff_base_ms: config.retry.backoff_base_ms,
            timeout_secs: config.scheduler.default_task_timeout_secs,
        };

        let event_bus = Arc::new(EventBus::new(config.event_bus.clone()));
        let handlers = Arc::new(HandlerRegistry::new());
        let assignments = Arc::new(AssignmentEngine::new(
            &config.assignment,
            Arc::clone(&event_bus),
        )?);
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler.clone(),
            config.retry.clone(),
            config.generator.dedup_bucket_secs,
            config.health.error_rate_window,
            Arc::clone(&handlers),
            Arc::clone(&assignments),
            Arc::clone(&event_bus),
        ));
        let generator = Arc::new(TaskGenerator::new(
            config.generator.clone(),
            defaults,
            Arc::clone(&scheduler),
            Arc::clone(&event_bus),
        ));
        let health = Arc::new(HealthMonitor::new(
            config.health.clone(),
            Arc::clone(&sampler),
            Arc::clone(&event_bus),
        ));

        for registration in &config.bots {
            assignments.register_bot(registration.clone(), None)?;
        }

        Ok(Self {
            config,
            defaults,
            event_bus,
            handlers,
            assignments,
            scheduler,
            generator,
            health,
            sampler,
            runtime: Mutex::new(None),
            started_at: Mutex::new(None),
        })
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Register the built-in handlers and generation rules
    pub fn install_builtins(&self) {
        self.handlers.register(
            TaskType::HealthCheck,
            Arc::new(HealthCheckHandler::new(Arc::clone(&self.sampler))),
        );
        self.handlers
            .register(TaskType::Custom("command".to_string()), Arc::new(CommandHandler::new()));
        self.generator
            .register_rule(Arc::new(HealthRule::new(self.config.health.thresholds)));
        self.generator.register_rule(Arc::new(PeriodicHealthCheckRule::new(
            self.config.generator.dedup_bucket_secs,
        )));
    }

    // ---- lifecycle --------------------------------------------------------

    /// Start the scheduler loop, generator, health monitor and event
    /// dispatcher
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` when called twice without `stop`
    #[instrument(skip(self))]
    pub fn start(&self) -> EngineResult<()> {
        let mut runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        if runtime.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let shutdown = CancellationToken::new();
        let dispatcher_shutdown = CancellationToken::new();
        let dispatcher = self.event_bus.spawn_dispatcher(dispatcher_shutdown.clone());
        let mut workers = Vec::new();

        let scheduler = Arc::clone(&self.scheduler);
        let token = shutdown.clone();
        workers.push(tokio::spawn(async move {
            if let Err(e) = scheduler.run(token).await {
                error!(error = %e, "scheduler loop exited");
            }
        }));

        if self.config.generator.enabled {
            let generator = Arc::clone(&self.generator);
            workers.push(tokio::spawn(generator.run(shutdown.clone(), self.signals_source())));
        }

        if self.config.health.enabled {
            let health = Arc::clone(&self.health);
            let scheduler = Arc::clone(&self.scheduler);
            workers.push(tokio::spawn(
                health.run(shutdown.clone(), move || scheduler.error_rate()),
            ));
        }

        workers.push(tokio::spawn(heartbeat_sweeper(
            Arc::clone(&self.assignments),
            Arc::clone(&self.scheduler),
            Duration::from_secs((self.config.assignment.heartbeat_timeout_secs / 4).max(1)),
            shutdown.clone(),
        )));

        *runtime = Some(Runtime {
            shutdown,
            dispatcher_shutdown,
            workers,
            dispatcher,
        });
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        drop(runtime);

        info!(
            strategy = %self.assignments.current_strategy(),
            bots = self.assignments.list_bots().len(),
            "engine started"
        );
        self.event_bus.publish(EventPayload::EngineStarted);
        Ok(())
    }

    /// Stop every background task
    ///
    /// Running executions are cancelled; queued tasks stay queued and run
    /// after the next `start`.
    ///
    /// # Errors
    ///
    /// `NotRunning` when the engine was not started
    #[instrument(skip(self))]
    pub async fn stop(&self) -> EngineResult<()> {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(EngineError::NotRunning)?;

        runtime.shutdown.cancel();
        for worker in runtime.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        self.event_bus.publish(EventPayload::EngineStopped);
        runtime.dispatcher_shutdown.cancel();
        if let Some(dispatcher) = runtime.dispatcher {
            if let Err(e) = dispatcher.await {
                warn!(error = %e, "event dispatcher ended abnormally");
            }
        }

        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = None;
        info!("engine stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn signals_source(&self) -> impl Fn() -> SystemSignals + Send + Sync + 'static {
        let scheduler = Arc::clone(&self.scheduler);
        let assignments = Arc::clone(&self.assignments);
        let health = Arc::clone(&self.health);
        move || SystemSignals {
            now: Utc::now(),
            sample: health.latest_sample(),
            queue_depth: scheduler.queue_depth(),
            running_tasks: scheduler.running_count(),
            bots_online: assignments.online_count(),
        }
    }

    // ---- tasks ------------------------------------------------------------

    /// Build and validate a task with the engine's defaults. Nothing is
    /// queued.
    pub fn new_task(&self, request: NewTask) -> EngineResult<Task> {
        Task::create(request, self.defaults)
    }

    /// Queue a task built with `new_task`
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub fn submit(&self, task: Task) -> EngineResult<Task> {
        self.scheduler.submit(task)
    }

    /// Build and queue a task in one step
    ///
    /// # Errors
    ///
    /// `Validation` for a bad request, `QueueFull` under back-pressure
    #[instrument(skip(self, request), fields(name = %request.name, task_type = %request.task_type))]
    pub fn create_task(&self, request: NewTask) -> EngineResult<Task> {
        let task = self.new_task(request)?;
        self.scheduler.submit(task)
    }

    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<Task> {
        self.scheduler.list_tasks(status)
    }

    pub fn get_task(&self, task_id: Uuid) -> EngineResult<TaskDetail> {
        let (task, results) = self.scheduler.get_task(task_id)?;
        Ok(TaskDetail {
            task,
            results,
            assignments: self.assignments.assignments_for_task(task_id),
        })
    }

    #[instrument(skip(self))]
    pub fn cancel_task(&self, task_id: Uuid) -> EngineResult<Task> {
        self.scheduler.cancel_task(task_id)
    }

    pub fn get_stats(&self) -> EngineStats {
        let started_at = *self.started_at.lock().unwrap_or_else(PoisonError::into_inner);
        EngineStats {
            running: self.is_running(),
            started_at,
            uptime_secs: started_at.map(|t| (Utc::now() - t).num_seconds()),
            tasks: self.scheduler.stats(),
            assignments: self.assignments.stats(),
            bots_total: self.assignments.list_bots().len(),
            events_published: self.event_bus.current_sequence().0,
        }
    }

    // ---- bots -------------------------------------------------------------

    #[instrument(skip(self, registration), fields(bot = %registration.name))]
    pub fn register_bot(&self, registration: BotRegistration) -> EngineResult<Bot> {
        self.assignments.register_bot(registration, None)
    }

    /// Register a bot that executes its assignments in-process
    #[instrument(skip(self, registration, worker), fields(bot = %registration.name))]
    pub fn register_bot_with_worker(
        &self,
        registration: BotRegistration,
        worker: Arc<dyn TaskHandler>,
    ) -> EngineResult<Bot> {
        self.assignments.register_bot(registration, Some(worker))
    }

    #[instrument(skip(self))]
    pub fn deregister_bot(&self, bot_id: &str) -> EngineResult<Bot> {
        let failed = self.assignments.deregister_bot(bot_id)?;
        self.scheduler.requeue_failed_assignments(&failed);
        self.assignments.get_bot(bot_id)
    }

    pub fn list_bots(&self) -> Vec<Bot> {
        self.assignments.list_bots()
    }

    pub fn get_bot(&self, bot_id: &str) -> EngineResult<Bot> {
        self.assignments.get_bot(bot_id)
    }

    pub fn heartbeat(&self, bot_id: &str) -> EngineResult<Bot> {
        self.assignments.heartbeat(bot_id)
    }

    /// Move a bot to ERROR and requeue its in-flight tasks
    #[instrument(skip(self))]
    pub fn report_bot_failure(&self, bot_id: &str, reason: &str) -> EngineResult<Bot> {
        let failed = self.assignments.report_bot_failure(bot_id, reason)?;
        self.scheduler.requeue_failed_assignments(&failed);
        self.assignments.get_bot(bot_id)
    }

    // ---- assignments ------------------------------------------------------

    /// Assign a queued task now, to `bot_id` or by the current strategy
    ///
    /// `Ok(None)` when no bot is eligible. A task that will execute
    /// in-process, through a registered handler or a worker bot, must be
    /// assigned from inside a Tokio runtime; otherwise this returns
    /// `RuntimeUnavailable`.
    #[instrument(skip(self))]
    pub fn create_assignment(
        &self,
        task_id: Uuid,
        bot_id: Option<&str>,
    ) -> EngineResult<Option<Assignment>> {
        self.scheduler.create_assignment(task_id, bot_id)
    }

    /// Report the outcome of an assignment executed outside the engine
    ///
    /// Outside a Tokio runtime a failed attempt that earns a retry is
    /// requeued without its backoff delay.
    #[instrument(skip(self, outcome))]
    pub fn complete_assignment(
        &self,
        assignment_id: Uuid,
        outcome: Result<serde_json::Value, String>,
    ) -> EngineResult<Assignment> {
        self.scheduler.complete_assignment(assignment_id, outcome)
    }

    pub fn get_assignment(&self, assignment_id: Uuid) -> EngineResult<Assignment> {
        self.assignments.get_assignment(assignment_id)
    }

    #[instrument(skip(self))]
    pub fn set_strategy(&self, name: &str) -> EngineResult<()> {
        self.assignments.set_strategy(name)
    }

    pub fn register_strategy(&self, strategy: Arc<dyn AssignmentStrategy>) {
        self.assignments.register_strategy(strategy);
    }

    pub fn current_strategy(&self) -> String {
        self.assignments.current_strategy()
    }

    // ---- handlers and rules -----------------------------------------------

    pub fn register_handler(&self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        self.handlers.register(task_type, handler);
    }

    pub fn register_rule(&self, rule: Arc<dyn GenerationRule>) {
        self.generator.register_rule(rule);
    }

    /// Run one generation cycle now
    pub fn run_generation_once(&self) -> GenerationReport {
        self.generator.run_once(&(self.signals_source())())
    }

    // ---- health -----------------------------------------------------------

    /// Take a resource sample now and evaluate it
    pub async fn sample_health(&self) -> anyhow::Result<(ResourceSample, Vec<Alert>)> {
        self.health.sample_once(self.scheduler.error_rate()).await
    }

    pub fn get_health(&self) -> HealthReport {
        self.health.report(
            self.is_running(),
            self.scheduler.queue_depth(),
            self.scheduler.running_count(),
            self.assignments.online_count(),
        )
    }

    // ---- events -----------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_bus.subscribe()
    }

    /// Register a callback for an event name or `*`
    pub fn on<F>(&self, event_name: &str, callback: F) -> EngineResult<SubscriptionId>
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.event_bus.on(event_name, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.event_bus.unsubscribe(id)
    }

    pub fn event_history(&self) -> Vec<EngineEvent> {
        self.event_bus.history()
    }

    pub fn task_events(&self, task_id: Uuid) -> Vec<EngineEvent> {
        self.event_bus.history_for_task(task_id)
    }
}

/// Periodically take silent bots offline and requeue their tasks
async fn heartbeat_sweeper(
    assignments: Arc<AssignmentEngine>,
    scheduler: Arc<Scheduler>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let failed = assignments.sweep_stale();
                scheduler.requeue_failed_assignments(&failed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::TaskPriority;
    use anyhow::Result;
    use async_trait::async_trait;

    struct Idle;

    #[async_trait]
    impl ResourceSampler for Idle {
        async fn sample(&self) -> Result<ResourceSample> {
            Ok(ResourceSample::new(1.0, 1.0, 1.0))
        }
    }

    fn engine() -> Engine {
        let mut config = Config::default();
        config.generator.enabled = false;
        config.health.enabled = false;
        Engine::new(config, Arc::new(Idle)).unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let engine = engine();
        assert!(matches!(engine.stop().await, Err(EngineError::NotRunning)));
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(EngineError::AlreadyRunning)));
        assert!(engine.get_stats().running);
        engine.stop().await.unwrap();
        assert!(!engine.is_running());

        let names: Vec<&str> = engine
            .event_history()
            .iter()
            .map(EngineEvent::name)
            .filter(|n| n.starts_with("engine_"))
            .collect();
        assert_eq!(names, vec!["engine_started", "engine_stopped"]);
    }

    #[test]
    fn test_create_task_validates() {
        let engine = engine();
        let err = engine
            .create_task(NewTask::new("  ", TaskType::Backup, TaskPriority::Low))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let built = engine
            .new_task(NewTask::new("later", TaskType::Backup, TaskPriority::Low))
            .unwrap();
        assert!(engine.list_tasks(None).is_empty());
        engine.submit(built.clone()).unwrap();
        assert_eq!(engine.get_task(built.id).unwrap().task.id, built.id);
    }

    #[test]
    fn test_config_bots_registered() {
        let mut config = Config::default();
        config.bots.push(BotRegistration::new("from-config").id("cfg-1"));
        let engine = Engine::new(config, Arc::new(Idle)).unwrap();
        assert_eq!(engine.get_bot("cfg-1").unwrap().name, "from-config");
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let engine = engine();
        assert!(engine.set_strategy("random").is_err());
        engine.set_strategy("load_balanced").unwrap();
        assert_eq!(engine.current_strategy(), "load_balanced");
    }

    #[tokio::test]
    async fn test_health_report_after_sample() {
        let engine = engine();
        engine.sample_health().await.unwrap();
        let report = engine.get_health();
        assert_eq!(report.status, crate::domain::models::health::HealthStatus::Healthy);
        assert!(!report.engine_running);
    }
}
