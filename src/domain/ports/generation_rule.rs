//! Generation rule port and the system signals rules are evaluated against.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::domain::models::health::ResourceSample;
use crate::domain::models::task::NewTask;

/// Snapshot of system conditions a rule is evaluated against.
#[derive(Debug, Clone)]
pub struct SystemSignals {
    pub now: DateTime<Utc>,
    /// Most recent resource sample, error rate included
    pub sample: Option<ResourceSample>,
    pub queue_depth: usize,
    pub running_tasks: usize,
    pub bots_online: usize,
}

impl SystemSignals {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            sample: None,
            queue_depth: 0,
            running_tasks: 0,
            bots_online: 0,
        }
    }

    pub fn with_sample(mut self, sample: ResourceSample) -> Self {
        self.sample = Some(sample);
        self
    }
}

/// Port for task generation rules
///
/// A rule is a pure function of the current signals returning zero or more
/// tasks to submit. Rules are evaluated independently: an error or panic in
/// one is logged and the others still run.
pub trait GenerationRule: Send + Sync {
    /// Name used in logs and `rule_failed` events
    fn name(&self) -> &str;

    /// Evaluate the rule
    fn evaluate(&self, signals: &SystemSignals) -> Result<Vec<NewTask>>;
}
