//! Task generator.
//!
//! Evaluates the registered generation rules on a fixed cadence and submits
//! what they produce. Rules are isolated from each other: an error or panic
//! in one is reported as `rule_failed` and the rest still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event_bus::{EventBus, EventPayload};
use super::handler_registry::panic_message;
use super::scheduler::Scheduler;
use crate::domain::errors::EngineError;
use crate::domain::models::config::GeneratorConfig;
use crate::domain::models::task::{Task, TaskDefaults};
use crate::domain::ports::{GenerationRule, SystemSignals};

/// Outcome of one generation cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub rules_evaluated: usize,
    pub rules_failed: usize,
    pub tasks_submitted: usize,
    pub duplicates_dropped: usize,
    pub tasks_rejected: usize,
    /// The cycle stopped early because the ready set was full
    pub back_pressure: bool,
}

pub struct TaskGenerator {
    config: GeneratorConfig,
    defaults: TaskDefaults,
    rules: RwLock<Vec<Arc<dyn GenerationRule>>>,
    scheduler: Arc<Scheduler>,
    event_bus: Arc<EventBus>,
}

impl TaskGenerator {
    pub fn new(
        config: GeneratorConfig,
        defaults: TaskDefaults,
        scheduler: Arc<Scheduler>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            defaults,
            rules: RwLock::new(Vec::new()),
            scheduler,
            event_bus,
        }
    }

    /// Add a rule. A rule with the same name is replaced in place.
    pub fn register_rule(&self, rule: Arc<dyn GenerationRule>) {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        match rules.iter().position(|r| r.name() == rule.name()) {
            Some(index) => rules[index] = rule,
            None => {
                info!(rule = rule.name(), "registered generation rule");
                rules.push(rule);
            }
        }
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    /// Evaluate every rule once and submit the results
    pub fn run_once(&self, signals: &SystemSignals) -> GenerationReport {
        let rules = self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut report = GenerationReport::default();

        for rule in rules {
            report.rules_evaluated += 1;
            let evaluated = catch_unwind(AssertUnwindSafe(|| rule.evaluate(signals)));
            let requests = match evaluated {
                Ok(Ok(requests)) => requests,
                Ok(Err(e)) => {
                    self.rule_failed(rule.name(), format!("{e:#}"));
                    report.rules_failed += 1;
                    continue;
                }
                Err(panic) => {
                    self.rule_failed(
                        rule.name(),
                        format!("rule panicked: {}", panic_message(panic.as_ref())),
                    );
                    report.rules_failed += 1;
                    continue;
                }
            };

            for request in requests {
                let task = match Task::create(request, self.defaults) {
                    Ok(task) => task,
                    Err(e) => {
                        warn!(rule = rule.name(), error = %e, "rule produced an invalid task");
                        report.tasks_rejected += 1;
                        continue;
                    }
                };
                match self.scheduler.submit_unique(task) {
                    Ok(Some(_)) => report.tasks_submitted += 1,
                    Ok(None) => report.duplicates_dropped += 1,
                    Err(e) if e.is_back_pressure() => {
                        warn!(rule = rule.name(), "ready set full, ending generation cycle");
                        report.back_pressure = true;
                        return report;
                    }
                    Err(e) => {
                        warn!(rule = rule.name(), error = %e, "generated task rejected");
                        report.tasks_rejected += 1;
                    }
                }
            }
        }

        if report.tasks_submitted > 0 || report.rules_failed > 0 {
            info!(
                submitted = report.tasks_submitted,
                duplicates = report.duplicates_dropped,
                failed_rules = report.rules_failed,
                "generation cycle finished"
            );
        } else {
            debug!(rules = report.rules_evaluated, "generation cycle produced nothing");
        }
        report
    }

    fn rule_failed(&self, rule: &str, message: String) {
        let error = EngineError::RuleEvaluation {
            rule: rule.to_string(),
            message: message.clone(),
        };
        warn!(error = %error, "generation rule failed");
        self.event_bus.publish(EventPayload::RuleFailed {
            rule: rule.to_string(),
            error: message,
        });
    }

    /// Run generation cycles until `shutdown` is cancelled
    pub async fn run<F>(self: Arc<Self>, shutdown: CancellationToken, signals: F)
    where
        F: Fn() -> SystemSignals + Send + Sync + 'static,
    {
        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.config.interval_secs, "task generator started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_once(&signals());
                }
            }
        }

        info!("task generator stopped");
    }
}
