//! Bot domain model.
//!
//! A bot is an autonomous worker with declared capabilities and a bounded
//! number of concurrent assignments.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{TaskPriority, TaskType};
use crate::domain::errors::{EngineError, EngineResult};

/// Role a bot plays in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotType {
    System,
    Worker,
    Monitor,
    Specialist,
    Assistant,
    User,
}

impl Default for BotType {
    fn default() -> Self {
        Self::Worker
    }
}

impl BotType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Worker => "worker",
            Self::Monitor => "monitor",
            Self::Specialist => "specialist",
            Self::Assistant => "assistant",
            Self::User => "user",
        }
    }
}

impl fmt::Display for BotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(Self::System),
            "worker" => Ok(Self::Worker),
            "monitor" => Ok(Self::Monitor),
            "specialist" => Ok(Self::Specialist),
            "assistant" => Ok(Self::Assistant),
            "user" => Ok(Self::User),
            _ => Err(EngineError::validation(format!("unknown bot type: {s}"))),
        }
    }
}

/// Bot availability.
///
/// `Offline -> Online -> Busy <-> Online -> Offline`; `Error` is reachable from
/// any state and only left through re-registration or a successful heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Online,
    Busy,
    Offline,
    Error,
}

impl BotStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Busy => "busy",
            Self::Offline => "offline",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named skill covering one or more task types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotCapability {
    pub name: String,
    pub task_types: Vec<TaskType>,
    #[serde(default)]
    pub priority_boost: u32,
    #[serde(default = "default_capability_concurrency")]
    pub max_concurrent: usize,
}

const fn default_capability_concurrency() -> usize {
    usize::MAX
}

impl BotCapability {
    pub fn new(name: impl Into<String>, task_types: Vec<TaskType>) -> Self {
        Self {
            name: name.into(),
            task_types,
            priority_boost: 0,
            max_concurrent: default_capability_concurrency(),
        }
    }

    pub const fn with_boost(mut self, boost: u32) -> Self {
        self.priority_boost = boost;
        self
    }

    pub const fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn covers(&self, task_type: &TaskType) -> bool {
        self.task_types.contains(task_type)
    }
}

/// Registration request for a bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotRegistration {
    /// Generated when omitted
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub bot_type: BotType,
    #[serde(default)]
    pub capabilities: Vec<BotCapability>,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default)]
    pub priority_preference: Vec<TaskPriority>,
}

const fn default_max_concurrent_tasks() -> usize {
    1
}

impl BotRegistration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            bot_type: BotType::default(),
            capabilities: Vec::new(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            priority_preference: Vec::new(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub const fn bot_type(mut self, bot_type: BotType) -> Self {
        self.bot_type = bot_type;
        self
    }

    pub fn capability(mut self, capability: BotCapability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub const fn max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn prefers(mut self, priorities: Vec<TaskPriority>) -> Self {
        self.priority_preference = priorities;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::validation("bot name cannot be empty"));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(EngineError::validation("bot id cannot be empty"));
            }
        }
        if self.max_concurrent_tasks == 0 {
            return Err(EngineError::validation(format!(
                "bot '{}' must accept at least one concurrent task",
                self.name
            )));
        }
        for cap in &self.capabilities {
            if cap.task_types.is_empty() {
                return Err(EngineError::validation(format!(
                    "capability '{}' of bot '{}' covers no task types",
                    cap.name, self.name
                )));
            }
            if cap.max_concurrent == 0 {
                return Err(EngineError::validation(format!(
                    "capability '{}' of bot '{}' has max_concurrent 0",
                    cap.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// A registered worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub name: String,
    pub bot_type: BotType,
    pub capabilities: Vec<BotCapability>,
    pub status: BotStatus,
    pub max_concurrent_tasks: usize,
    pub priority_preference: Vec<TaskPriority>,
    /// Active assignments
    pub current_load: usize,
    /// Active assignments per capability name
    pub capability_load: HashMap<String, usize>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
}

impl Bot {
    /// Create an online bot from a validated registration.
    pub fn from_registration(id: String, registration: BotRegistration) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: registration.name,
            bot_type: registration.bot_type,
            capabilities: registration.capabilities,
            status: BotStatus::Online,
            max_concurrent_tasks: registration.max_concurrent_tasks,
            priority_preference: registration.priority_preference,
            current_load: 0,
            capability_load: HashMap::new(),
            registered_at: now,
            last_heartbeat: now,
            completed_tasks: 0,
            failed_tasks: 0,
        }
    }

    pub fn covers(&self, task_type: &TaskType) -> bool {
        self.capabilities.iter().any(|c| c.covers(task_type))
    }

    /// First matching capability that still has room.
    pub fn open_capability(&self, task_type: &TaskType) -> Option<&BotCapability> {
        self.capabilities.iter().find(|c| {
            c.covers(task_type)
                && self.capability_load.get(&c.name).copied().unwrap_or(0) < c.max_concurrent
        })
    }

    pub const fn has_capacity(&self) -> bool {
        self.current_load < self.max_concurrent_tasks
    }

    /// Eligible: online, under capacity, with an open matching capability.
    pub fn is_eligible_for(&self, task_type: &TaskType) -> bool {
        self.status == BotStatus::Online
            && self.has_capacity()
            && self.open_capability(task_type).is_some()
    }

    pub fn load_ratio(&self) -> f64 {
        self.current_load as f64 / self.max_concurrent_tasks.max(1) as f64
    }

    /// Sum of matching capability boosts.
    pub fn capability_score(&self, task_type: &TaskType) -> u32 {
        self.capabilities
            .iter()
            .filter(|c| c.covers(task_type))
            .map(|c| c.priority_boost)
            .sum()
    }

    pub fn prefers(&self, priority: TaskPriority) -> bool {
        self.priority_preference.contains(&priority)
    }

    /// Take one unit of load, attributing it to the first open matching
    /// capability. Returns the capability name.
    pub fn reserve(&mut self, task_type: &TaskType) -> Option<String> {
        if !self.has_capacity() {
            return None;
        }
        let capability = self.open_capability(task_type)?.name.clone();
        *self.capability_load.entry(capability.clone()).or_insert(0) += 1;
        self.current_load += 1;
        self.refresh_busy();
        Some(capability)
    }

    /// Give back one unit of load previously taken with `reserve`.
    pub fn release(&mut self, capability: &str) {
        if let Some(load) = self.capability_load.get_mut(capability) {
            *load = load.saturating_sub(1);
        }
        self.current_load = self.current_load.saturating_sub(1);
        self.refresh_busy();
    }

    /// Toggle between `Online` and `Busy` to match the current load.
    fn refresh_busy(&mut self) {
        match self.status {
            BotStatus::Online if !self.has_capacity() => self.status = BotStatus::Busy,
            BotStatus::Busy if self.has_capacity() => self.status = BotStatus::Online,
            _ => {}
        }
    }

    pub fn is_stale(&self, threshold: chrono::Duration) -> bool {
        Utc::now() - self.last_heartbeat > threshold
    }
}
