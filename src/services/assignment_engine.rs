//! Bot registry and assignment engine.
//!
//! Owns the bot table and every assignment record. Eligibility checks and
//! load reservation happen under one lock so concurrent assignment attempts
//! can never push a bot past its capacity.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::event_bus::{EventBus, EventPayload};
use super::strategies::{
    BestFitStrategy, LoadBalancedStrategy, PriorityFirstStrategy, RoundRobinStrategy,
};
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::assignment::{Assignment, AssignmentStatus};
use crate::domain::models::bot::{Bot, BotRegistration, BotStatus};
use crate::domain::models::config::AssignmentConfig;
use crate::domain::models::task::{Task, TaskType};
use crate::domain::ports::{AssignmentStrategy, StrategyContext, TaskHandler};

/// Strategy label recorded on assignments made to an explicit bot id.
pub const DIRECT_ASSIGNMENT: &str = "direct";

const MAX_HEARTBEAT_TIMEOUT_SECS: u64 = 365 * 24 * 3600;

#[derive(Default)]
struct RegistryState {
    /// Ordered by id so candidate lists are deterministic
    bots: BTreeMap<String, Bot>,
    assignments: HashMap<Uuid, Assignment>,
    by_task: HashMap<Uuid, Vec<Uuid>>,
}

/// Assignment counters reported by `get_stats`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentStats {
    pub total: usize,
    pub open: usize,
    pub completed: usize,
    pub failed: usize,
    pub bots_by_status: BTreeMap<String, usize>,
    pub strategy: String,
}

/// Bot registry plus strategy-driven assignment
pub struct AssignmentEngine {
    state: Mutex<RegistryState>,
    workers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    strategies: RwLock<HashMap<String, Arc<dyn AssignmentStrategy>>>,
    current_strategy: RwLock<String>,
    ctx: StrategyContext,
    heartbeat_timeout: chrono::Duration,
    event_bus: Arc<EventBus>,
}

impl AssignmentEngine {
    /// Create an engine with the four built-in strategies registered
    ///
    /// # Errors
    ///
    /// `Validation` if the configured strategy is unknown
    pub fn new(config: &AssignmentConfig, event_bus: Arc<EventBus>) -> EngineResult<Self> {
        let engine = Self {
            state: Mutex::new(RegistryState::default()),
            workers: RwLock::new(HashMap::new()),
            strategies: RwLock::new(HashMap::new()),
            current_strategy: RwLock::new(String::new()),
            ctx: StrategyContext {
                priority_preference_bonus: config.priority_preference_bonus,
            },
            heartbeat_timeout: chrono::Duration::seconds(
                i64::try_from(config.heartbeat_timeout_secs.min(MAX_HEARTBEAT_TIMEOUT_SECS))
                    .unwrap_or(0),
            ),
            event_bus,
        };

        engine.register_strategy(Arc::new(BestFitStrategy));
        engine.register_strategy(Arc::new(LoadBalancedStrategy));
        engine.register_strategy(Arc::new(RoundRobinStrategy::new()));
        engine.register_strategy(Arc::new(PriorityFirstStrategy));

        if !engine.has_strategy(&config.strategy) {
            return Err(EngineError::validation(format!(
                "unknown assignment strategy: {}",
                config.strategy
            )));
        }
        *engine
            .current_strategy
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config.strategy.clone();

        Ok(engine)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- strategies -------------------------------------------------------

    /// Add or replace a strategy under its own name
    pub fn register_strategy(&self, strategy: Arc<dyn AssignmentStrategy>) {
        let name = strategy.name().to_string();
        debug!(strategy = %name, "registered assignment strategy");
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, strategy);
    }

    pub fn has_strategy(&self, name: &str) -> bool {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn strategy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn current_strategy(&self) -> String {
        self.current_strategy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switch the strategy used for undirected assignments
    ///
    /// # Errors
    ///
    /// `Validation` for an unregistered name
    #[instrument(skip(self))]
    pub fn set_strategy(&self, name: &str) -> EngineResult<()> {
        if !self.has_strategy(name) {
            return Err(EngineError::validation(format!(
                "unknown assignment strategy: {name}"
            )));
        }
        let previous = {
            let mut current = self
                .current_strategy
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, name.to_string())
        };
        if previous != name {
            info!(from = %previous, to = %name, "assignment strategy changed");
            self.event_bus.publish(EventPayload::StrategyChanged {
                from: previous,
                to: name.to_string(),
            });
        }
        Ok(())
    }

    fn strategy(&self) -> Option<Arc<dyn AssignmentStrategy>> {
        let name = self.current_strategy();
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name)
            .cloned()
    }

    // ---- bot lifecycle ----------------------------------------------------

    /// Register a bot, optionally with an in-process worker
    ///
    /// Registering an id that already exists updates its definition and
    /// brings it back ONLINE, keeping its current load.
    #[instrument(skip(self, registration, worker), fields(bot = %registration.name))]
    pub fn register_bot(
        &self,
        registration: BotRegistration,
        worker: Option<Arc<dyn TaskHandler>>,
    ) -> EngineResult<Bot> {
        registration.validate()?;
        let id = registration
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        {
            let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
            match worker {
                Some(worker) => {
                    workers.insert(id.clone(), worker);
                }
                None => {
                    workers.remove(&id);
                }
            }
        }

        let mut state = self.lock();
        let snapshot = match state.bots.get_mut(&id) {
            Some(existing) => {
                let previous = existing.status;
                let mut updated = Bot::from_registration(id.clone(), registration);
                updated.current_load = existing.current_load;
                updated.capability_load = std::mem::take(&mut existing.capability_load);
                updated.registered_at = existing.registered_at;
                updated.completed_tasks = existing.completed_tasks;
                updated.failed_tasks = existing.failed_tasks;
                if !updated.has_capacity() {
                    updated.status = BotStatus::Busy;
                }
                *existing = updated;
                info!(bot_id = %id, "bot re-registered");
                self.publish_status_change(existing, previous, Some("re-registered"));
                existing.clone()
            }
            None => {
                let bot = Bot::from_registration(id.clone(), registration);
                info!(bot_id = %id, name = %bot.name, "bot registered");
                state.bots.insert(id.clone(), bot.clone());
                bot
            }
        };

        self.event_bus.publish(EventPayload::BotRegistered {
            bot_id: id,
            name: snapshot.name.clone(),
        });
        Ok(snapshot)
    }

    /// Take a bot OFFLINE and fail its open assignments
    ///
    /// Returns the failed assignments so their tasks can be requeued.
    #[instrument(skip(self))]
    pub fn deregister_bot(&self, bot_id: &str) -> EngineResult<Vec<Assignment>> {
        let mut state = self.lock();
        let failed = self.disable_bot(&mut state, bot_id, BotStatus::Offline, "deregistered")?;
        drop(state);

        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(bot_id);
        self.event_bus.publish(EventPayload::BotDeregistered {
            bot_id: bot_id.to_string(),
        });
        Ok(failed)
    }

    /// Move a bot to ERROR and fail its open assignments
    #[instrument(skip(self))]
    pub fn report_bot_failure(&self, bot_id: &str, reason: &str) -> EngineResult<Vec<Assignment>> {
        let mut state = self.lock();
        warn!(bot_id, reason, "bot failure reported");
        self.disable_bot(&mut state, bot_id, BotStatus::Error, reason)
    }

    fn disable_bot(
        &self,
        state: &mut RegistryState,
        bot_id: &str,
        status: BotStatus,
        reason: &str,
    ) -> EngineResult<Vec<Assignment>> {
        let bot = state
            .bots
            .get_mut(bot_id)
            .ok_or_else(|| EngineError::BotNotFound(bot_id.to_string()))?;
        let previous = bot.status;
        bot.status = status;
        self.publish_status_change(bot, previous, Some(reason));

        let open: Vec<Uuid> = state
            .assignments
            .values()
            .filter(|a| a.bot_id == bot_id && a.status.is_open())
            .map(|a| a.assignment_id)
            .collect();

        let mut failed = Vec::with_capacity(open.len());
        for assignment_id in open {
            if let Some(assignment) = self.finish_locked(state, assignment_id, false)? {
                failed.push(assignment);
            }
        }
        Ok(failed)
    }

    /// Refresh a bot's heartbeat. ERROR and OFFLINE bots come back ONLINE.
    pub fn heartbeat(&self, bot_id: &str) -> EngineResult<Bot> {
        let mut state = self.lock();
        let bot = state
            .bots
            .get_mut(bot_id)
            .ok_or_else(|| EngineError::BotNotFound(bot_id.to_string()))?;
        bot.last_heartbeat = Utc::now();

        if matches!(bot.status, BotStatus::Error | BotStatus::Offline) {
            let previous = bot.status;
            bot.status = if bot.has_capacity() {
                BotStatus::Online
            } else {
                BotStatus::Busy
            };
            info!(bot_id, from = %previous, "bot recovered on heartbeat");
            self.publish_status_change(bot, previous, Some("heartbeat"));
        }
        Ok(bot.clone())
    }

    /// Mark bots silent for longer than the heartbeat timeout OFFLINE
    ///
    /// Returns the assignments failed as a result.
    pub fn sweep_stale(&self) -> Vec<Assignment> {
        let mut state = self.lock();
        let stale: Vec<String> = state
            .bots
            .values()
            .filter(|b| {
                matches!(b.status, BotStatus::Online | BotStatus::Busy)
                    && b.is_stale(self.heartbeat_timeout)
            })
            .map(|b| b.id.clone())
            .collect();

        let mut failed = Vec::new();
        for bot_id in stale {
            warn!(bot_id = %bot_id, "bot heartbeat expired");
            match self.disable_bot(&mut state, &bot_id, BotStatus::Offline, "heartbeat expired") {
                Ok(mut lost) => failed.append(&mut lost),
                Err(e) => warn!(bot_id = %bot_id, error = %e, "failed to mark stale bot offline"),
            }
        }
        failed
    }

    fn publish_status_change(&self, bot: &Bot, previous: BotStatus, reason: Option<&str>) {
        if bot.status != previous {
            self.event_bus.publish(EventPayload::BotStatusChanged {
                bot_id: bot.id.clone(),
                from: previous.to_string(),
                to: bot.status.to_string(),
                reason: reason.map(str::to_string),
            });
        }
    }

    pub fn get_bot(&self, bot_id: &str) -> EngineResult<Bot> {
        self.lock()
            .bots
            .get(bot_id)
            .cloned()
            .ok_or_else(|| EngineError::BotNotFound(bot_id.to_string()))
    }

    /// All bots ordered by id
    pub fn list_bots(&self) -> Vec<Bot> {
        self.lock().bots.values().cloned().collect()
    }

    pub fn has_bots(&self) -> bool {
        !self.lock().bots.is_empty()
    }

    /// Whether any registered bot, in any status, declares the type
    pub fn covers_type(&self, task_type: &TaskType) -> bool {
        self.lock().bots.values().any(|b| b.covers(task_type))
    }

    /// Whether some bot could take the task right now
    pub fn has_eligible_bot(&self, task_type: &TaskType) -> bool {
        self.lock().bots.values().any(|b| b.is_eligible_for(task_type))
    }

    pub fn online_count(&self) -> usize {
        self.lock()
            .bots
            .values()
            .filter(|b| matches!(b.status, BotStatus::Online | BotStatus::Busy))
            .count()
    }

    /// In-process worker registered with a bot
    pub fn worker(&self, bot_id: &str) -> Option<Arc<dyn TaskHandler>> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bot_id)
            .cloned()
    }

    // ---- assignments ------------------------------------------------------

    /// Assign a task to a bot
    ///
    /// With `bot_id` the named bot must be eligible. Without it the current
    /// strategy picks among eligible bots; `Ok(None)` means no bot can take
    /// the task right now.
    ///
    /// # Errors
    ///
    /// `BotNotFound` or `BotUnavailable` for a direct assignment
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub fn assign_task(&self, task: &Task, bot_id: Option<&str>) -> EngineResult<Option<Assignment>> {
        let mut state = self.lock();

        let (chosen, strategy_used) = match bot_id {
            Some(bot_id) => {
                let bot = state
                    .bots
                    .get(bot_id)
                    .ok_or_else(|| EngineError::BotNotFound(bot_id.to_string()))?;
                if let Some(reason) = ineligibility(bot, &task.task_type) {
                    return Err(EngineError::BotUnavailable {
                        bot_id: bot_id.to_string(),
                        reason,
                    });
                }
                (bot_id.to_string(), DIRECT_ASSIGNMENT.to_string())
            }
            None => {
                let candidates: Vec<&Bot> = state
                    .bots
                    .values()
                    .filter(|b| b.is_eligible_for(&task.task_type))
                    .collect();
                if candidates.is_empty() {
                    debug!(task_type = %task.task_type, "no eligible bot");
                    return Ok(None);
                }
                let Some(strategy) = self.strategy() else {
                    warn!("current assignment strategy is not registered");
                    return Ok(None);
                };
                let Some(index) = strategy.select(task, &candidates, &self.ctx) else {
                    return Ok(None);
                };
                let Some(bot) = candidates.get(index) else {
                    warn!(strategy = strategy.name(), index, "strategy returned out-of-range index");
                    return Ok(None);
                };
                (bot.id.clone(), strategy.name().to_string())
            }
        };

        let Some(bot) = state.bots.get_mut(&chosen) else {
            return Err(EngineError::BotNotFound(chosen));
        };
        let previous = bot.status;
        let Some(capability) = bot.reserve(&task.task_type) else {
            return Err(EngineError::BotUnavailable {
                bot_id: chosen,
                reason: "no capacity".to_string(),
            });
        };
        self.publish_status_change(bot, previous, None);

        let assignment = Assignment::new(task.id, chosen.clone(), strategy_used, capability);
        state
            .by_task
            .entry(task.id)
            .or_default()
            .push(assignment.assignment_id);
        state
            .assignments
            .insert(assignment.assignment_id, assignment.clone());

        info!(
            task_id = %task.id,
            bot_id = %chosen,
            assignment_id = %assignment.assignment_id,
            strategy = %assignment.strategy_used,
            "task assigned"
        );
        self.event_bus.publish(EventPayload::TaskAssigned {
            task_id: task.id,
            bot_id: chosen,
            assignment_id: assignment.assignment_id,
            strategy: assignment.strategy_used.clone(),
        });

        Ok(Some(assignment))
    }

    /// Mark an assignment as picked up by its bot
    pub fn accept_assignment(&self, assignment_id: Uuid) -> EngineResult<Assignment> {
        let mut state = self.lock();
        let assignment = state
            .assignments
            .get_mut(&assignment_id)
            .ok_or(EngineError::AssignmentNotFound(assignment_id))?;
        assignment.accept()?;
        Ok(assignment.clone())
    }

    /// Close an assignment and release the bot's load
    ///
    /// # Errors
    ///
    /// `AssignmentNotFound`, or `InvalidStateTransition` when already closed
    pub fn complete_assignment(&self, assignment_id: Uuid, success: bool) -> EngineResult<Assignment> {
        let mut state = self.lock();
        match self.finish_locked(&mut state, assignment_id, success)? {
            Some(assignment) => Ok(assignment),
            None => Err(EngineError::AssignmentNotFound(assignment_id)),
        }
    }

    /// Close an assignment if it is still open. Returns `None` when it was
    /// already terminal.
    pub fn close_if_open(&self, assignment_id: Uuid, success: bool) -> Option<Assignment> {
        let mut state = self.lock();
        let is_open = state
            .assignments
            .get(&assignment_id)
            .is_some_and(|a| a.status.is_open());
        if !is_open {
            return None;
        }
        self.finish_locked(&mut state, assignment_id, success).ok().flatten()
    }

    fn finish_locked(
        &self,
        state: &mut RegistryState,
        assignment_id: Uuid,
        success: bool,
    ) -> EngineResult<Option<Assignment>> {
        let assignment = state
            .assignments
            .get_mut(&assignment_id)
            .ok_or(EngineError::AssignmentNotFound(assignment_id))?;
        assignment.finish(success)?;
        let snapshot = assignment.clone();

        if let Some(bot) = state.bots.get_mut(&snapshot.bot_id) {
            let previous = bot.status;
            bot.release(&snapshot.capability);
            if success {
                bot.completed_tasks += 1;
            } else {
                bot.failed_tasks += 1;
            }
            self.publish_status_change(bot, previous, None);
        }

        debug!(
            assignment_id = %assignment_id,
            bot_id = %snapshot.bot_id,
            success,
            "assignment closed"
        );
        self.event_bus.publish(EventPayload::AssignmentCompleted {
            assignment_id,
            task_id: snapshot.task_id,
            bot_id: snapshot.bot_id.clone(),
            success,
        });
        Ok(Some(snapshot))
    }

    pub fn get_assignment(&self, assignment_id: Uuid) -> EngineResult<Assignment> {
        self.lock()
            .assignments
            .get(&assignment_id)
            .cloned()
            .ok_or(EngineError::AssignmentNotFound(assignment_id))
    }

    /// Every assignment ever made for a task, oldest first
    pub fn assignments_for_task(&self, task_id: Uuid) -> Vec<Assignment> {
        let state = self.lock();
        state
            .by_task
            .get(&task_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.assignments.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Open assignment for a task, if any
    pub fn open_assignment_for_task(&self, task_id: Uuid) -> Option<Assignment> {
        self.assignments_for_task(task_id)
            .into_iter()
            .rev()
            .find(|a| a.status.is_open())
    }

    pub fn stats(&self) -> AssignmentStats {
        let state = self.lock();
        let mut stats = AssignmentStats {
            total: state.assignments.len(),
            strategy: self.current_strategy(),
            ..AssignmentStats::default()
        };
        for assignment in state.assignments.values() {
            match assignment.status {
                AssignmentStatus::Pending | AssignmentStatus::Accepted => stats.open += 1,
                AssignmentStatus::Completed => stats.completed += 1,
                AssignmentStatus::Failed => stats.failed += 1,
            }
        }
        for bot in state.bots.values() {
            *stats
                .bots_by_status
                .entry(bot.status.to_string())
                .or_insert(0) += 1;
        }
        stats
    }
}

/// Why a bot cannot take a task of this type, if it cannot
fn ineligibility(bot: &Bot, task_type: &TaskType) -> Option<String> {
    if bot.status != BotStatus::Online && bot.status != BotStatus::Busy {
        return Some(format!("bot is {}", bot.status));
    }
    if !bot.has_capacity() {
        return Some(format!(
            "at capacity ({}/{})",
            bot.current_load, bot.max_concurrent_tasks
        ));
    }
    if !bot.covers(task_type) {
        return Some(format!("no capability covers task type '{task_type}'"));
    }
    if bot.open_capability(task_type).is_none() {
        return Some(format!("capabilities for '{task_type}' are saturated"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::bot::BotCapability;
    use crate::domain::models::config::EventBusConfig;
    use crate::domain::models::task::{NewTask, TaskDefaults, TaskPriority};

    fn engine(strategy: &str) -> AssignmentEngine {
        let config = AssignmentConfig {
            strategy: strategy.to_string(),
            ..AssignmentConfig::default()
        };
        AssignmentEngine::new(&config, Arc::new(EventBus::new(EventBusConfig::default()))).unwrap()
    }

    fn registration(id: &str, boost: u32, max: usize) -> BotRegistration {
        BotRegistration::new(id)
            .id(id)
            .capability(BotCapability::new("scan", vec![TaskType::Diagnostics]).with_boost(boost))
            .max_concurrent_tasks(max)
    }

    fn task() -> Task {
        Task::create(
            NewTask::new("scan", TaskType::Diagnostics, TaskPriority::Medium),
            TaskDefaults::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let config = AssignmentConfig {
            strategy: "coin_flip".to_string(),
            ..AssignmentConfig::default()
        };
        let bus = Arc::new(EventBus::new(EventBusConfig::default()));
        assert!(AssignmentEngine::new(&config, bus).is_err());

        let engine = engine("best_fit");
        assert!(matches!(
            engine.set_strategy("coin_flip"),
            Err(EngineError::Validation(_))
        ));
        engine.set_strategy("round_robin").unwrap();
        assert_eq!(engine.current_strategy(), "round_robin");
    }

    #[test]
    fn test_best_fit_picks_higher_boost() {
        let engine = engine("best_fit");
        engine.register_bot(registration("bot1", 20, 1), None).unwrap();
        engine.register_bot(registration("bot2", 5, 1), None).unwrap();

        let assignment = engine.assign_task(&task(), None).unwrap().unwrap();
        assert_eq!(assignment.bot_id, "bot1");
        assert_eq!(assignment.strategy_used, "best_fit");
        assert_eq!(engine.get_bot("bot1").unwrap().status, BotStatus::Busy);
    }

    #[test]
    fn test_no_eligible_bot_returns_none() {
        let engine = engine("best_fit");
        engine.register_bot(registration("bot1", 1, 1), None).unwrap();
        assert!(engine.assign_task(&task(), None).unwrap().is_some());
        assert!(engine.assign_task(&task(), None).unwrap().is_none());
    }

    #[test]
    fn test_direct_assignment_errors() {
        let engine = engine("best_fit");
        engine.register_bot(registration("bot1", 1, 1), None).unwrap();

        assert!(matches!(
            engine.assign_task(&task(), Some("ghost")),
            Err(EngineError::BotNotFound(_))
        ));

        let direct = engine.assign_task(&task(), Some("bot1")).unwrap().unwrap();
        assert_eq!(direct.strategy_used, DIRECT_ASSIGNMENT);

        assert!(matches!(
            engine.assign_task(&task(), Some("bot1")),
            Err(EngineError::BotUnavailable { .. })
        ));

        let other = Task::create(
            NewTask::new("x", TaskType::Backup, TaskPriority::Low),
            TaskDefaults::default(),
        )
        .unwrap();
        engine.complete_assignment(direct.assignment_id, true).unwrap();
        match engine.assign_task(&other, Some("bot1")) {
            Err(EngineError::BotUnavailable { reason, .. }) => assert!(reason.contains("capability")),
            other => panic!("expected BotUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_complete_releases_load() {
        let engine = engine("best_fit");
        engine.register_bot(registration("bot1", 1, 1), None).unwrap();
        let a = engine.assign_task(&task(), None).unwrap().unwrap();
        assert_eq!(engine.get_bot("bot1").unwrap().current_load, 1);

        let done = engine.complete_assignment(a.assignment_id, true).unwrap();
        assert_eq!(done.status, AssignmentStatus::Completed);
        let bot = engine.get_bot("bot1").unwrap();
        assert_eq!(bot.current_load, 0);
        assert_eq!(bot.status, BotStatus::Online);
        assert_eq!(bot.completed_tasks, 1);

        assert!(engine.complete_assignment(a.assignment_id, true).is_err());
        assert!(engine.close_if_open(a.assignment_id, false).is_none());
    }

    #[test]
    fn test_bot_failure_fails_open_assignments() {
        let engine = engine("best_fit");
        engine.register_bot(registration("bot1", 1, 2), None).unwrap();
        let t = task();
        engine.assign_task(&t, None).unwrap().unwrap();

        let failed = engine.report_bot_failure("bot1", "crashed").unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].task_id, t.id);

        let bot = engine.get_bot("bot1").unwrap();
        assert_eq!(bot.status, BotStatus::Error);
        assert_eq!(bot.current_load, 0);
        assert!(engine.assign_task(&task(), None).unwrap().is_none());

        // Heartbeat recovers
        assert_eq!(engine.heartbeat("bot1").unwrap().status, BotStatus::Online);
        assert!(engine.assign_task(&task(), None).unwrap().is_some());
    }

    #[test]
    fn test_reassignment_creates_new_record() {
        let engine = engine("best_fit");
        engine.register_bot(registration("bot1", 1, 1), None).unwrap();
        engine.register_bot(registration("bot2", 0, 1), None).unwrap();
        let t = task();

        let first = engine.assign_task(&t, None).unwrap().unwrap();
        engine.report_bot_failure(&first.bot_id, "lost").unwrap();
        let second = engine.assign_task(&t, None).unwrap().unwrap();

        let history = engine.assignments_for_task(t.id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, AssignmentStatus::Failed);
        assert_ne!(first.assignment_id, second.assignment_id);
        assert_eq!(second.bot_id, "bot2");
    }

    #[test]
    fn test_reregistration_recovers_error() {
        let engine = engine("best_fit");
        engine.register_bot(registration("bot1", 1, 1), None).unwrap();
        engine.report_bot_failure("bot1", "oops").unwrap();
        let bot = engine.register_bot(registration("bot1", 3, 2), None).unwrap();
        assert_eq!(bot.status, BotStatus::Online);
        assert_eq!(bot.max_concurrent_tasks, 2);
        assert_eq!(engine.list_bots().len(), 1);
    }

    #[test]
    fn test_deregister_marks_offline() {
        let engine = engine("best_fit");
        engine.register_bot(registration("bot1", 1, 1), None).unwrap();
        engine.deregister_bot("bot1").unwrap();
        assert_eq!(engine.get_bot("bot1").unwrap().status, BotStatus::Offline);
        assert!(engine.covers_type(&TaskType::Diagnostics));
        assert!(!engine.has_eligible_bot(&TaskType::Diagnostics));
        assert!(matches!(
            engine.deregister_bot("ghost"),
            Err(EngineError::BotNotFound(_))
        ));
    }

    #[test]
    fn test_sweep_stale_marks_offline() {
        let config = AssignmentConfig {
            heartbeat_timeout_secs: 0,
            ..AssignmentConfig::default()
        };
        let engine =
            AssignmentEngine::new(&config, Arc::new(EventBus::new(EventBusConfig::default())))
                .unwrap();
        engine.register_bot(registration("bot1", 1, 1), None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        engine.sweep_stale();
        assert_eq!(engine.get_bot("bot1").unwrap().status, BotStatus::Offline);
    }

    #[test]
    fn test_stats() {
        let engine = engine("load_balanced");
        engine.register_bot(registration("bot1", 1, 2), None).unwrap();
        let a = engine.assign_task(&task(), None).unwrap().unwrap();
        engine.assign_task(&task(), None).unwrap().unwrap();
        engine.complete_assignment(a.assignment_id, false).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.strategy, "load_balanced");
        assert_eq!(stats.bots_by_status.get("online"), Some(&1));
    }
}
