//! Scheduler service.
//!
//! Holds the ready set and the table of every task attempt, and runs up to
//! `max_concurrent_tasks` executions at once. The loop only selects and
//! dispatches; executions run on their own tokio tasks and report back over
//! a channel.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::assignment_engine::AssignmentEngine;
use super::event_bus::{EventBus, EventPayload};
use super::handler_registry::{HandlerRegistry, panic_message};
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::assignment::Assignment;
use crate::domain::models::config::{CapacityConfig, RetryConfig, SchedulerConfig};
use crate::domain::models::health::{Alert, AlertLevel};
use crate::domain::models::queue::ReadySet;
use crate::domain::models::task::{DedupKey, ResourceHints, Task, TaskResult, TaskStatus};
use crate::domain::ports::{ExecutionContext, TaskHandler};

/// How long `run` waits for cancelled executions to report back on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Slack for floating point drift in resource accounting
const CAPACITY_EPSILON: f64 = 1e-9;

/// Outcome of one execution, sent back to the scheduler loop
#[derive(Debug)]
struct Completion {
    run_id: Uuid,
    outcome: Result<serde_json::Value, String>,
}

/// One in-flight execution
#[derive(Debug)]
struct RunEntry {
    task_id: Uuid,
    cancel: CancellationToken,
    resources: ResourceHints,
    started_at: DateTime<Utc>,
    bot_id: Option<String>,
    assignment_id: Option<Uuid>,
    /// Waiting for an external `complete_assignment`; nothing is executing
    external: bool,
    /// Outcome is ignored when it arrives (cancelled or requeued)
    discard: bool,
}

/// Current attempt of a task plus everything recorded for earlier ones
#[derive(Debug)]
struct TaskRecord {
    current: Task,
    results: Vec<TaskResult>,
    active_run: Option<Uuid>,
}

#[derive(Default)]
struct SchedulerState {
    ready: ReadySet<Uuid>,
    tasks: HashMap<Uuid, TaskRecord>,
    /// Submission order, for listing
    order: Vec<Uuid>,
    running: HashMap<Uuid, RunEntry>,
    /// Tasks waiting out a retry delay
    backoff: HashMap<Uuid, CancellationToken>,
    in_use: ResourceHints,
    dedup: HashMap<DedupKey, Uuid>,
    recent_outcomes: VecDeque<bool>,
    retries: u64,
}

/// Counters reported by `get_stats`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_tasks: usize,
    pub by_status: BTreeMap<String, usize>,
    pub queue_depth: usize,
    pub running: usize,
    pub awaiting_retry: usize,
    pub total_results: usize,
    pub retries: u64,
    /// Completed results over completed plus failed results
    pub success_rate: Option<f64>,
    pub average_execution_secs: Option<f64>,
}

/// Priority and resource aware scheduler
pub struct Scheduler {
    config: SchedulerConfig,
    retry: RetryConfig,
    dedup_bucket_secs: u64,
    outcome_window: usize,
    state: Mutex<SchedulerState>,
    handlers: Arc<HandlerRegistry>,
    assignments: Arc<AssignmentEngine>,
    event_bus: Arc<EventBus>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: Mutex<Option<mpsc::UnboundedReceiver<Completion>>>,
    wake: Notify,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        retry: RetryConfig,
        dedup_bucket_secs: u64,
        outcome_window: usize,
        handlers: Arc<HandlerRegistry>,
        assignments: Arc<AssignmentEngine>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            config,
            retry,
            dedup_bucket_secs,
            outcome_window: outcome_window.max(1),
            state: Mutex::new(SchedulerState::default()),
            handlers,
            assignments,
            event_bus,
            completion_tx,
            completion_rx: Mutex::new(Some(completion_rx)),
            wake: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub const fn capacity(&self) -> CapacityConfig {
        self.config.capacity
    }

    // ---- submission -------------------------------------------------------

    /// Add a task to the ready set
    ///
    /// # Errors
    ///
    /// * `QueueFull` when the ready set is at `max_queue_length`
    /// * `Validation` when the task alone exceeds a capacity ceiling, is not
    ///   PENDING, or was already submitted
    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = %task.task_type))]
    pub fn submit(&self, task: Task) -> EngineResult<Task> {
        self.check_submittable(&task)?;
        let mut state = self.lock();
        self.check_queue(&state)?;
        if state.tasks.contains_key(&task.id) {
            return Err(EngineError::validation(format!(
                "task {} was already submitted",
                task.id
            )));
        }
        let task = self.accept(&mut state, task);
        drop(state);
        self.wake.notify_one();
        Ok(task)
    }

    /// Submit unless a task with the same dedup key is still in flight
    ///
    /// Returns `Ok(None)` for a dropped duplicate. The check and the insert
    /// happen under one lock.
    ///
    /// # Errors
    ///
    /// The same as [`Scheduler::submit`], including `Validation` for a task
    /// id that was already submitted.
    pub fn submit_unique(&self, task: Task) -> EngineResult<Option<Task>> {
        self.check_submittable(&task)?;
        let key = task.dedup_key(self.dedup_bucket_secs);
        let mut state = self.lock();
        if state.tasks.contains_key(&task.id) {
            return Err(EngineError::validation(format!(
                "task {} was already submitted",
                task.id
            )));
        }

        let duplicate = state.dedup.get(&key).is_some_and(|existing| {
            state
                .tasks
                .get(existing)
                .is_some_and(|r| !r.current.status.is_terminal())
        });
        if duplicate {
            debug!(task_type = %key.task_type, subsystem = %key.subsystem, "dropping duplicate task");
            return Ok(None);
        }

        self.check_queue(&state)?;
        let task = self.accept(&mut state, task);
        drop(state);
        self.wake.notify_one();
        Ok(Some(task))
    }

    fn check_submittable(&self, task: &Task) -> EngineResult<()> {
        if task.status != TaskStatus::Pending {
            return Err(EngineError::validation(format!(
                "only pending tasks can be submitted, got {}",
                task.status
            )));
        }
        let empty = ResourceHints::default();
        if !fits(&empty, &task.resources, &self.config.capacity) {
            return Err(EngineError::validation(format!(
                "task resources (cpu {}, memory {} MB, io {}) exceed the capacity ceilings",
                task.resources.cpu_requirement,
                task.resources.memory_requirement_mb,
                task.resources.io_requirement
            )));
        }
        Ok(())
    }

    fn check_queue(&self, state: &SchedulerState) -> EngineResult<()> {
        if state.ready.len() >= self.config.max_queue_length {
            warn!(capacity = self.config.max_queue_length, "ready set is full");
            return Err(EngineError::QueueFull {
                capacity: self.config.max_queue_length,
            });
        }
        Ok(())
    }

    fn accept(&self, state: &mut SchedulerState, task: Task) -> Task {
        state.ready.enqueue(task.id, task.priority.value(), task.created_at);
        state
            .dedup
            .insert(task.dedup_key(self.dedup_bucket_secs), task.id);
        state.order.push(task.id);
        state.tasks.insert(
            task.id,
            TaskRecord {
                current: task.clone(),
                results: Vec::new(),
                active_run: None,
            },
        );

        info!(task_id = %task.id, name = %task.name, priority = %task.priority, "task submitted");
        self.event_bus.publish(EventPayload::TaskCreated {
            task_id: task.id,
            name: task.name.clone(),
            task_type: task.task_type.clone(),
            priority: task.priority,
        });
        task
    }

    // ---- dispatch ---------------------------------------------------------

    /// Dispatch ready tasks while concurrency and capacity allow
    ///
    /// Returns how many executions were started.
    pub fn tick(self: &Arc<Self>) -> usize {
        let mut state = self.lock();
        let mut dispatched = 0;

        while state.running.len() < self.config.max_concurrent_tasks {
            let Some(task_id) = self.pick_next(&mut state) else {
                break;
            };
            match self.dispatch(&mut state, task_id) {
                Ok(true) => dispatched += 1,
                Ok(false) => break,
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "failed to dispatch task");
                    break;
                }
            }
        }

        if dispatched > 0 {
            debug!(
                dispatched,
                running = state.running.len(),
                queued = state.ready.len(),
                "tick dispatched tasks"
            );
        }
        dispatched
    }

    /// First ready task that fits the remaining capacity and, when bots
    /// cover its type, has an eligible bot
    fn pick_next(&self, state: &mut SchedulerState) -> Option<Uuid> {
        let SchedulerState {
            ready,
            tasks,
            in_use,
            ..
        } = state;
        let capacity = self.config.capacity;
        let assignments = &self.assignments;

        ready.dequeue_first(|id| {
            let Some(record) = tasks.get(id) else {
                return true;
            };
            let task = &record.current;
            fits(in_use, &task.resources, &capacity)
                && (!assignments.covers_type(&task.task_type)
                    || assignments.has_eligible_bot(&task.task_type))
        })
    }

    fn dispatch(self: &Arc<Self>, state: &mut SchedulerState, task_id: Uuid) -> EngineResult<bool> {
        let Some(record) = state.tasks.get(&task_id) else {
            warn!(task_id = %task_id, "dropping unknown id from ready set");
            return Ok(true);
        };
        let task = record.current.clone();

        if !self.assignments.covers_type(&task.task_type) {
            self.start_run(state, &task, None, None)?;
            return Ok(true);
        }

        match self.assignments.assign_task(&task, None) {
            Ok(Some(assignment)) => {
                let worker = self.assignments.worker(&assignment.bot_id);
                self.start_run(state, &task, Some(&assignment), worker)?;
                Ok(true)
            }
            Ok(None) => {
                state
                    .ready
                    .enqueue(task.id, task.priority.value(), task.created_at);
                Ok(false)
            }
            Err(e) => {
                state
                    .ready
                    .enqueue(task.id, task.priority.value(), task.created_at);
                Err(e)
            }
        }
    }

    fn start_run(
        self: &Arc<Self>,
        state: &mut SchedulerState,
        task: &Task,
        assignment: Option<&Assignment>,
        worker: Option<Arc<dyn TaskHandler>>,
    ) -> EngineResult<()> {
        // Presence only; can_handle is user code and must not run under the lock
        let external =
            assignment.is_some() && worker.is_none() && !self.handlers.covers(&task.task_type);
        let runtime = if external {
            None
        } else {
            Some(Handle::try_current().map_err(|_| EngineError::RuntimeUnavailable(task.id))?)
        };
        let bot_id = assignment.map(|a| a.bot_id.clone());
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let record = state
            .tasks
            .get_mut(&task.id)
            .ok_or(EngineError::TaskNotFound(task.id))?;
        if assignment.is_some() {
            record.current.transition_to(TaskStatus::Assigned)?;
        }
        if !external {
            record.current.transition_to(TaskStatus::Running)?;
            if let Some(assignment) = assignment {
                self.assignments.accept_assignment(assignment.assignment_id)?;
            }
        }
        record.active_run = Some(run_id);
        let current = record.current.clone();

        state.in_use = state.in_use + task.resources;
        state.running.insert(
            run_id,
            RunEntry {
                task_id: task.id,
                cancel: cancel.clone(),
                resources: task.resources,
                started_at: Utc::now(),
                bot_id: bot_id.clone(),
                assignment_id: assignment.map(|a| a.assignment_id),
                external,
                discard: false,
            },
        );

        let Some(runtime) = runtime else {
            info!(
                task_id = %task.id,
                bot_id = ?bot_id,
                "task awaiting external completion"
            );
            return Ok(());
        };

        info!(
            task_id = %task.id,
            attempt = current.retry_count,
            bot_id = ?bot_id,
            "task started"
        );
        self.event_bus.publish(EventPayload::TaskStarted {
            task_id: task.id,
            attempt: current.retry_count,
            bot_id: bot_id.clone(),
        });
        self.spawn_execution(
            &runtime,
            run_id,
            current,
            worker,
            ExecutionContext::new(cancel, bot_id),
        );
        Ok(())
    }

    fn spawn_execution(
        &self,
        runtime: &Handle,
        run_id: Uuid,
        task: Task,
        worker: Option<Arc<dyn TaskHandler>>,
        ctx: ExecutionContext,
    ) {
        let handlers = Arc::clone(&self.handlers);
        let completion_tx = self.completion_tx.clone();
        let timeout_secs = task.timeout_secs;
        let cancel = ctx.cancel.clone();

        runtime.spawn(async move {
            let mut execution = tokio::spawn(async move {
                match worker {
                    Some(worker) => worker
                        .execute(&task, &ctx)
                        .await
                        .map_err(|e| format!("{e:#}")),
                    None => handlers.execute(&task, &ctx).await.map_err(|e| match e {
                        EngineError::HandlerExecution { message, .. } => message,
                        other => other.to_string(),
                    }),
                }
            });

            let outcome =
                match tokio::time::timeout(Duration::from_secs(timeout_secs), &mut execution).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join_error)) if join_error.is_panic() => Err(format!(
                        "handler panicked: {}",
                        panic_message(join_error.into_panic().as_ref())
                    )),
                    Ok(Err(join_error)) => Err(format!("execution aborted: {join_error}")),
                    Err(_) => {
                        cancel.cancel();
                        execution.abort();
                        Err(format!("timed out after {timeout_secs}s"))
                    }
                };

            // The receiver only goes away with the scheduler itself
            let _ = completion_tx.send(Completion { run_id, outcome });
        });
    }

    // ---- completion -------------------------------------------------------

    fn handle_completion(self: &Arc<Self>, completion: Completion) {
        let mut state = self.lock();
        let Some(entry) = state.running.remove(&completion.run_id) else {
            debug!(run_id = %completion.run_id, "completion for a finished run ignored");
            return;
        };
        release_resources(&mut state, &entry);

        if entry.discard {
            debug!(task_id = %entry.task_id, "discarding outcome of cancelled run");
            if let Some(assignment_id) = entry.assignment_id {
                self.assignments.close_if_open(assignment_id, false);
            }
            return;
        }

        self.finish_attempt(&mut state, &entry, completion.outcome);
    }

    /// Record the result of an attempt and retry or finalize the task
    fn finish_attempt(
        self: &Arc<Self>,
        state: &mut SchedulerState,
        entry: &RunEntry,
        outcome: Result<serde_json::Value, String>,
    ) {
        if let Some(assignment_id) = entry.assignment_id {
            self.assignments.close_if_open(assignment_id, outcome.is_ok());
        }

        state.recent_outcomes.push_back(outcome.is_ok());
        while state.recent_outcomes.len() > self.outcome_window {
            state.recent_outcomes.pop_front();
        }

        let Some(record) = state.tasks.get_mut(&entry.task_id) else {
            return;
        };
        record.active_run = None;

        match outcome {
            Ok(data) => {
                let result =
                    TaskResult::completed(&record.current, data, entry.started_at, entry.bot_id.clone());
                if let Err(e) = record.current.transition_to(TaskStatus::Completed) {
                    warn!(task_id = %entry.task_id, error = %e, "unexpected task state on completion");
                }
                info!(
                    task_id = %entry.task_id,
                    attempt = result.attempt,
                    execution_time_secs = result.execution_time_secs,
                    "task completed"
                );
                self.event_bus.publish(EventPayload::TaskCompleted {
                    task_id: entry.task_id,
                    attempt: result.attempt,
                    execution_time_secs: result.execution_time_secs,
                });
                record.results.push(result);
                let key = record.current.dedup_key(self.dedup_bucket_secs);
                forget_dedup(state, &key, entry.task_id);
            }
            Err(message) => {
                let result = TaskResult::failed(
                    &record.current,
                    message.clone(),
                    entry.started_at,
                    entry.bot_id.clone(),
                );
                if let Err(e) = record.current.transition_to(TaskStatus::Failed) {
                    warn!(task_id = %entry.task_id, error = %e, "unexpected task state on failure");
                }
                record.results.push(result);

                let attempt = record.current.retry_count;
                let will_retry = record.current.can_retry();
                warn!(
                    task_id = %entry.task_id,
                    attempt,
                    max_retries = record.current.max_retries,
                    error = %message,
                    will_retry,
                    "task failed"
                );
                self.event_bus.publish(EventPayload::TaskFailed {
                    task_id: entry.task_id,
                    attempt,
                    error: message.clone(),
                    will_retry,
                });

                if will_retry {
                    let delay_ms = record.current.retry_delay_ms(self.retry.max_backoff_ms);
                    record.current = record.current.next_attempt();
                    state.retries += 1;
                    self.event_bus.publish(EventPayload::TaskRetrying {
                        task_id: entry.task_id,
                        attempt: attempt + 1,
                        max_retries: record.current.max_retries,
                        delay_ms,
                    });
                    self.schedule_retry(state, entry.task_id, delay_ms);
                } else {
                    let total_attempts = attempt + 1;
                    let name = record.current.name.clone();
                    let key = record.current.dedup_key(self.dedup_bucket_secs);
                    forget_dedup(state, &key, entry.task_id);

                    error!(task_id = %entry.task_id, attempts = total_attempts, "task exhausted its retries");
                    let alert = Alert::general(
                        AlertLevel::Warning,
                        format!("task '{name}' failed after {total_attempts} attempt(s): {message}"),
                    );
                    self.event_bus.publish(EventPayload::AlertRaised {
                        alert,
                        task_id: Some(entry.task_id),
                    });
                }
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, state: &mut SchedulerState, task_id: Uuid, delay_ms: u64) {
        if delay_ms == 0 {
            self.requeue_ready(state, task_id, "retry");
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(task_id = %task_id, delay_ms, "no runtime to time the backoff, requeueing now");
            self.requeue_ready(state, task_id, "retry");
            return;
        };

        let token = CancellationToken::new();
        state.backoff.insert(task_id, token.clone());
        let scheduler = Arc::clone(self);
        runtime.spawn(async move {
            tokio::select! {
                () = sleep(Duration::from_millis(delay_ms)) => {
                    scheduler.finish_backoff(task_id);
                }
                () = token.cancelled() => {}
            }
        });
    }

    fn finish_backoff(&self, task_id: Uuid) {
        let mut state = self.lock();
        if state.backoff.remove(&task_id).is_none() {
            return;
        }
        self.requeue_ready(&mut state, task_id, "retry backoff elapsed");
        drop(state);
        self.wake.notify_one();
    }

    /// Put a PENDING task back into the ready set, bypassing the queue limit
    fn requeue_ready(&self, state: &mut SchedulerState, task_id: Uuid, reason: &str) {
        let Some(record) = state.tasks.get(&task_id) else {
            return;
        };
        if record.current.status != TaskStatus::Pending {
            return;
        }
        let task = &record.current;
        state
            .ready
            .enqueue(task.id, task.priority.value(), task.created_at);
        debug!(task_id = %task_id, reason, "task requeued");
        self.event_bus.publish(EventPayload::TaskRequeued {
            task_id,
            reason: reason.to_string(),
        });
    }

    /// Requeue the tasks behind assignments a bot can no longer honour
    ///
    /// The retry counter is left alone.
    pub fn requeue_failed_assignments(&self, failed: &[Assignment]) {
        if failed.is_empty() {
            return;
        }
        let mut state = self.lock();
        for assignment in failed {
            let run = state
                .running
                .iter()
                .find(|(_, e)| e.assignment_id == Some(assignment.assignment_id) && !e.discard)
                .map(|(run_id, _)| *run_id);
            let Some(run_id) = run else {
                continue;
            };

            let external = match state.running.get_mut(&run_id) {
                Some(entry) => {
                    entry.discard = true;
                    entry.cancel.cancel();
                    entry.external
                }
                None => continue,
            };
            if external {
                if let Some(entry) = state.running.remove(&run_id) {
                    release_resources(&mut state, &entry);
                }
            }

            let Some(record) = state.tasks.get_mut(&assignment.task_id) else {
                continue;
            };
            record.active_run = None;
            if let Err(e) = record.current.transition_to(TaskStatus::Pending) {
                warn!(task_id = %assignment.task_id, error = %e, "cannot requeue task");
                continue;
            }
            warn!(
                task_id = %assignment.task_id,
                bot_id = %assignment.bot_id,
                "requeueing task after bot loss"
            );
            self.requeue_ready(
                &mut state,
                assignment.task_id,
                &format!("bot {} unavailable", assignment.bot_id),
            );
        }
        drop(state);
        self.wake.notify_one();
    }

    // ---- manual assignment ------------------------------------------------

    /// Assign a queued task to a bot right away
    ///
    /// Bypasses ready-set ordering and the concurrency limit; the run is
    /// still counted against both. `Ok(None)` means no bot could take it.
    ///
    /// # Errors
    ///
    /// `RuntimeUnavailable` when the task would execute in-process and the
    /// caller is outside a Tokio runtime. The task stays queued and no
    /// assignment is left open.
    pub fn create_assignment(
        self: &Arc<Self>,
        task_id: Uuid,
        bot_id: Option<&str>,
    ) -> EngineResult<Option<Assignment>> {
        let mut state = self.lock();
        let record = state
            .tasks
            .get(&task_id)
            .ok_or(EngineError::TaskNotFound(task_id))?;
        let queued = state.ready.count_matching(|id| *id == task_id) > 0;
        if !queued {
            return Err(EngineError::InvalidStateTransition {
                from: record.current.status.to_string(),
                to: TaskStatus::Assigned.to_string(),
                reason: "task is not waiting in the ready set".to_string(),
            });
        }
        let task = record.current.clone();
        if self.handlers.covers(&task.task_type) && Handle::try_current().is_err() {
            return Err(EngineError::RuntimeUnavailable(task_id));
        }

        let Some(assignment) = self.assignments.assign_task(&task, bot_id)? else {
            return Ok(None);
        };
        let worker = self.assignments.worker(&assignment.bot_id);
        if let Err(e) = self.start_run(&mut state, &task, Some(&assignment), worker) {
            self.assignments.close_if_open(assignment.assignment_id, false);
            return Err(e);
        }
        state.ready.remove_matching(|id| *id == task_id);
        Ok(Some(assignment))
    }

    /// Close an assignment on behalf of its bot
    ///
    /// When the assignment belongs to a live run, the run's attempt is
    /// finalized with `outcome`; otherwise only the assignment is closed.
    pub fn complete_assignment(
        self: &Arc<Self>,
        assignment_id: Uuid,
        outcome: Result<serde_json::Value, String>,
    ) -> EngineResult<Assignment> {
        let mut state = self.lock();
        let run = state
            .running
            .iter()
            .find(|(_, e)| e.assignment_id == Some(assignment_id) && !e.discard)
            .map(|(run_id, _)| *run_id);

        match run.and_then(|run_id| state.running.remove(&run_id)) {
            Some(entry) => {
                entry.cancel.cancel();
                release_resources(&mut state, &entry);
                self.finish_attempt(&mut state, &entry, outcome);
            }
            None => {
                self.assignments
                    .complete_assignment(assignment_id, outcome.is_ok())?;
            }
        }
        drop(state);
        self.wake.notify_one();
        self.assignments.get_assignment(assignment_id)
    }

    // ---- cancellation -----------------------------------------------------

    /// Cancel a task
    ///
    /// A queued or backing-off task is removed with no result recorded. A
    /// running task is signalled and gets exactly one CANCELLED result; its
    /// handler may keep running but its outcome is discarded.
    #[instrument(skip(self))]
    pub fn cancel_task(&self, task_id: Uuid) -> EngineResult<Task> {
        let mut state = self.lock();
        let record = state
            .tasks
            .get(&task_id)
            .ok_or(EngineError::TaskNotFound(task_id))?;
        if record.current.status.is_terminal() {
            return Err(EngineError::InvalidStateTransition {
                from: record.current.status.to_string(),
                to: TaskStatus::Cancelled.to_string(),
                reason: "task already finished".to_string(),
            });
        }
        let active_run = record.active_run;

        let was_running = match active_run {
            Some(run_id) => {
                self.cancel_run(&mut state, run_id);
                true
            }
            None => {
                state.ready.remove_matching(|id| *id == task_id);
                if let Some(token) = state.backoff.remove(&task_id) {
                    token.cancel();
                }
                false
            }
        };

        let Some(record) = state.tasks.get_mut(&task_id) else {
            return Err(EngineError::TaskNotFound(task_id));
        };
        record.active_run = None;
        record.current.transition_to(TaskStatus::Cancelled)?;
        let snapshot = record.current.clone();
        let key = snapshot.dedup_key(self.dedup_bucket_secs);
        forget_dedup(&mut state, &key, task_id);

        info!(task_id = %task_id, was_running, "task cancelled");
        self.event_bus.publish(EventPayload::TaskCancelled {
            task_id,
            was_running,
        });
        drop(state);
        self.wake.notify_one();
        Ok(snapshot)
    }

    /// Signal a run and record its CANCELLED result
    fn cancel_run(&self, state: &mut SchedulerState, run_id: Uuid) {
        let Some(entry) = state.running.get_mut(&run_id) else {
            return;
        };
        entry.cancel.cancel();
        entry.discard = true;
        let task_id = entry.task_id;
        let started_at = entry.started_at;
        let bot_id = entry.bot_id.clone();
        let external = entry.external;

        if external {
            if let Some(entry) = state.running.remove(&run_id) {
                release_resources(state, &entry);
                if let Some(assignment_id) = entry.assignment_id {
                    self.assignments.close_if_open(assignment_id, false);
                }
            }
        }

        if let Some(record) = state.tasks.get_mut(&task_id) {
            let result = TaskResult::cancelled(&record.current, started_at, bot_id);
            record.results.push(result);
        }
    }

    // ---- loop -------------------------------------------------------------

    /// Drive the scheduler until `shutdown` is cancelled
    ///
    /// On shutdown running executions are cancelled and given a short grace
    /// period to report back. Queued tasks stay queued.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if another loop holds the completion channel
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> EngineResult<()> {
        let mut completions = self
            .completion_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(EngineError::AlreadyRunning)?;

        let mut ticker = interval(Duration::from_millis(self.config.tick_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            tick_interval_ms = self.config.tick_interval_ms,
            "scheduler loop started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                Some(completion) = completions.recv() => {
                    self.handle_completion(completion);
                    self.tick();
                }
                () = self.wake.notified() => {
                    self.tick();
                }
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }

        self.cancel_all_running();
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while self.running_count() > 0 {
            tokio::select! {
                Some(completion) = completions.recv() => self.handle_completion(completion),
                () = sleep_until(deadline) => {
                    warn!(running = self.running_count(), "executions still running after shutdown grace");
                    break;
                }
            }
        }

        *self
            .completion_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(completions);
        info!("scheduler loop stopped");
        Ok(())
    }

    fn cancel_all_running(&self) {
        let active: Vec<Uuid> = self
            .lock()
            .tasks
            .values()
            .filter(|r| r.active_run.is_some())
            .map(|r| r.current.id)
            .collect();

        for task_id in active {
            if let Err(e) = self.cancel_task(task_id) {
                debug!(task_id = %task_id, error = %e, "skip cancelling on shutdown");
            }
        }
    }

    // ---- queries ----------------------------------------------------------

    pub fn get_task(&self, task_id: Uuid) -> EngineResult<(Task, Vec<TaskResult>)> {
        let state = self.lock();
        state
            .tasks
            .get(&task_id)
            .map(|r| (r.current.clone(), r.results.clone()))
            .ok_or(EngineError::TaskNotFound(task_id))
    }

    /// Tasks in submission order, optionally filtered by status
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .map(|r| &r.current)
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect()
    }

    pub fn results(&self, task_id: Uuid) -> Vec<TaskResult> {
        self.lock()
            .tasks
            .get(&task_id)
            .map(|r| r.results.clone())
            .unwrap_or_default()
    }

    pub fn queue_depth(&self) -> usize {
        self.lock().ready.len()
    }

    /// Ready task ids in dispatch order
    pub fn queued_ids(&self) -> Vec<Uuid> {
        self.lock().ready.iter().copied().collect()
    }

    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }

    /// Resources currently reserved by running tasks
    pub fn resources_in_use(&self) -> ResourceHints {
        self.lock().in_use
    }

    /// Failed fraction of the most recent results, if there are any
    pub fn error_rate(&self) -> Option<f64> {
        let state = self.lock();
        if state.recent_outcomes.is_empty() {
            return None;
        }
        let failures = state.recent_outcomes.iter().filter(|ok| !**ok).count();
        Some(failures as f64 / state.recent_outcomes.len() as f64)
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.lock();
        let mut stats = SchedulerStats {
            total_tasks: state.tasks.len(),
            queue_depth: state.ready.len(),
            running: state.running.len(),
            awaiting_retry: state.backoff.len(),
            retries: state.retries,
            ..SchedulerStats::default()
        };

        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut execution_total = 0.0;
        for record in state.tasks.values() {
            *stats
                .by_status
                .entry(record.current.status.to_string())
                .or_insert(0) += 1;
            for result in &record.results {
                stats.total_results += 1;
                execution_total += result.execution_time_secs;
                match result.status {
                    TaskStatus::Completed => completed += 1,
                    TaskStatus::Failed => failed += 1,
                    _ => {}
                }
            }
        }

        if completed + failed > 0 {
            stats.success_rate = Some(completed as f64 / (completed + failed) as f64);
        }
        if stats.total_results > 0 {
            stats.average_execution_secs = Some(execution_total / stats.total_results as f64);
        }
        stats
    }
}

/// Whether `extra` fits on top of `in_use` under the ceilings
fn fits(in_use: &ResourceHints, extra: &ResourceHints, capacity: &CapacityConfig) -> bool {
    let total = *in_use + *extra;
    total.cpu_requirement <= capacity.cpu + CAPACITY_EPSILON
        && total.memory_requirement_mb <= capacity.memory_mb + CAPACITY_EPSILON
        && total.io_requirement <= capacity.io + CAPACITY_EPSILON
}

fn release_resources(state: &mut SchedulerState, entry: &RunEntry) {
    state.in_use = state.in_use - entry.resources;
    if state.running.is_empty() {
        state.in_use = ResourceHints::default();
    }
}

fn forget_dedup(state: &mut SchedulerState, key: &DedupKey, task_id: Uuid) {
    if state.dedup.get(key) == Some(&task_id) {
        state.dedup.remove(key);
    }
}
