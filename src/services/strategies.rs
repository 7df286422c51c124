//! Built-in bot assignment strategies.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::domain::models::bot::Bot;
use crate::domain::models::task::Task;
use crate::domain::ports::{AssignmentStrategy, StrategyContext};

/// Ranking shared by the score-based strategies: highest score, then lowest
/// load, then lowest bot id.
fn best_by_score<F>(candidates: &[&Bot], score: F) -> Option<usize>
where
    F: Fn(&Bot) -> u32,
{
    candidates
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            score(b)
                .cmp(&score(a))
                .then(a.current_load.cmp(&b.current_load))
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|(index, _)| index)
}

fn best_fit_score(bot: &Bot, task: &Task, ctx: &StrategyContext) -> u32 {
    let bonus = if bot.prefers(task.priority) {
        ctx.priority_preference_bonus
    } else {
        0
    };
    bot.capability_score(&task.task_type).saturating_add(bonus)
}

/// Highest capability boost plus priority-preference bonus wins
#[derive(Debug, Default)]
pub struct BestFitStrategy;

impl AssignmentStrategy for BestFitStrategy {
    fn name(&self) -> &str {
        "best_fit"
    }

    fn select(&self, task: &Task, candidates: &[&Bot], ctx: &StrategyContext) -> Option<usize> {
        let index = best_by_score(candidates, |bot| best_fit_score(bot, task, ctx))?;
        debug!(
            task_id = %task.id,
            bot_id = %candidates[index].id,
            score = best_fit_score(candidates[index], task, ctx),
            "best_fit selected bot"
        );
        Some(index)
    }
}

/// Lowest `current_load / max_concurrent_tasks` wins
#[derive(Debug, Default)]
pub struct LoadBalancedStrategy;

impl AssignmentStrategy for LoadBalancedStrategy {
    fn name(&self) -> &str {
        "load_balanced"
    }

    fn select(&self, task: &Task, candidates: &[&Bot], _ctx: &StrategyContext) -> Option<usize> {
        let index = candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.load_ratio()
                    .partial_cmp(&b.load_ratio())
                    .unwrap_or(CmpOrdering::Equal)
                    .then(a.current_load.cmp(&b.current_load))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|(index, _)| index)?;
        debug!(
            task_id = %task.id,
            bot_id = %candidates[index].id,
            load = candidates[index].load_ratio(),
            "load_balanced selected bot"
        );
        Some(index)
    }
}

/// Rotating pointer over the eligible set ordered by bot id
///
/// The pointer advances on every call, whatever happens to the assignment.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssignmentStrategy for RoundRobinStrategy {
    fn name(&self) -> &str {
        "round_robin"
    }

    fn select(&self, task: &Task, candidates: &[&Bot], _ctx: &StrategyContext) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        debug!(
            task_id = %task.id,
            bot_id = %candidates[index].id,
            index,
            eligible = candidates.len(),
            "round_robin selected bot"
        );
        Some(index)
    }
}

/// best_fit among bots preferring the task's priority, else over everyone
#[derive(Debug, Default)]
pub struct PriorityFirstStrategy;

impl AssignmentStrategy for PriorityFirstStrategy {
    fn name(&self) -> &str {
        "priority_first"
    }

    fn select(&self, task: &Task, candidates: &[&Bot], ctx: &StrategyContext) -> Option<usize> {
        let preferring: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, bot)| bot.prefers(task.priority))
            .map(|(index, _)| index)
            .collect();

        if preferring.is_empty() {
            debug!(task_id = %task.id, "no bot prefers this priority, using best_fit");
            return BestFitStrategy.select(task, candidates, ctx);
        }

        let subset: Vec<&Bot> = preferring.iter().map(|&i| candidates[i]).collect();
        BestFitStrategy
            .select(task, &subset, ctx)
            .map(|picked| preferring[picked])
    }
}
