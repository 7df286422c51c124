//! Domain errors for the Overwatch engine.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the scheduling and assignment engine.
///
/// Only construction-time validation and explicit caller requests (lookups,
/// direct assignments, lifecycle calls) return these synchronously. Failures
/// local to one task, rule or subscriber are contained at that boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad task, bot or configuration input, rejected before entering any queue.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The ready set is at its configured maximum length.
    #[error("Queue is full ({capacity} tasks); retry later")]
    QueueFull { capacity: usize },

    /// An explicitly targeted bot cannot accept the task.
    #[error("Bot {bot_id} is unavailable: {reason}")]
    BotUnavailable { bot_id: String, reason: String },

    /// A handler failed while executing a task.
    #[error("Handler failed for task {task_id}: {message}")]
    HandlerExecution { task_id: Uuid, message: String },

    /// A generation rule failed during evaluation.
    #[error("Rule '{rule}' failed: {message}")]
    RuleEvaluation { rule: String, message: String },

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Bot not found: {0}")]
    BotNotFound(String),

    #[error("Assignment not found: {0}")]
    AssignmentNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Engine is not running")]
    NotRunning,

    /// An in-process execution was requested outside a Tokio runtime.
    #[error("No async runtime available to execute task {0}")]
    RuntimeUnavailable(Uuid),
}

impl EngineError {
    /// Shorthand for a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the caller should retry the same request later.
    pub const fn is_back_pressure(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("serialization error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_full_is_back_pressure() {
        assert!(EngineError::QueueFull { capacity: 10 }.is_back_pressure());
        assert!(!EngineError::validation("bad").is_back_pressure());
    }

    #[test]
    fn test_error_messages() {
        let err = EngineError::BotUnavailable {
            bot_id: "bot-1".to_string(),
            reason: "offline".to_string(),
        };
        assert_eq!(err.to_string(), "Bot bot-1 is unavailable: offline");

        let err = EngineError::RuleEvaluation {
            rule: "disk".to_string(),
            message: "no sample".to_string(),
        };
        assert_eq!(err.to_string(), "Rule 'disk' failed: no sample");
    }
}
