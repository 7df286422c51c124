//! Assignment strategy port: ranks eligible bots for a task.

use crate::domain::models::bot::Bot;
use crate::domain::models::task::Task;

/// Tunables shared by all strategies.
#[derive(Debug, Clone, Copy)]
pub struct StrategyContext {
    /// Score added when the task's priority is in a bot's preference list
    pub priority_preference_bonus: u32,
}

impl Default for StrategyContext {
    fn default() -> Self {
        Self {
            priority_preference_bonus: 10,
        }
    }
}

/// Port for bot selection algorithms
///
/// Strategies are looked up by name in the assignment engine's registry.
/// `select` runs while the bot table is locked, so it must not block.
pub trait AssignmentStrategy: Send + Sync {
    /// Registry name, e.g. `best_fit`
    fn name(&self) -> &str;

    /// Pick a bot for `task`
    ///
    /// # Arguments
    ///
    /// * `task` - The task being assigned
    /// * `candidates` - Eligible bots, sorted by id and never empty
    /// * `ctx` - Shared tunables
    ///
    /// # Returns
    ///
    /// Index into `candidates`, or `None` to decline.
    fn select(&self, task: &Task, candidates: &[&Bot], ctx: &StrategyContext) -> Option<usize>;
}
