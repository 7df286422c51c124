//! Assignment domain model: the binding of one task to one bot.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Completed,
    Failed,
}

impl AssignmentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assignment record. Only the status and completion timestamp ever change;
/// a reassignment creates a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub assignment_id: Uuid,
    pub task_id: Uuid,
    pub bot_id: String,
    pub assigned_at: DateTime<Utc>,
    pub status: AssignmentStatus,
    /// Name of the strategy that picked the bot, or `direct`
    pub strategy_used: String,
    /// Capability the load was attributed to
    pub capability: String,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn new(task_id: Uuid, bot_id: String, strategy_used: String, capability: String) -> Self {
        Self {
            assignment_id: Uuid::new_v4(),
            task_id,
            bot_id,
            assigned_at: Utc::now(),
            status: AssignmentStatus::Pending,
            strategy_used,
            capability,
            completed_at: None,
        }
    }

    pub fn accept(&mut self) -> EngineResult<()> {
        if self.status != AssignmentStatus::Pending {
            return Err(self.bad_transition(AssignmentStatus::Accepted));
        }
        self.status = AssignmentStatus::Accepted;
        Ok(())
    }

    /// Move to a terminal status. Terminal records are never touched again.
    pub fn finish(&mut self, success: bool) -> EngineResult<()> {
        let target = if success {
            AssignmentStatus::Completed
        } else {
            AssignmentStatus::Failed
        };
        if !self.status.is_open() {
            return Err(self.bad_transition(target));
        }
        self.status = target;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn bad_transition(&self, to: AssignmentStatus) -> EngineError {
        EngineError::InvalidStateTransition {
            from: self.status.to_string(),
            to: to.to_string(),
            reason: format!("assignment {}", self.assignment_id),
        }
    }
}
