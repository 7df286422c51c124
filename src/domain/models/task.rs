//! Task domain model.
//!
//! Tasks are units of schedulable work. Everything but the lifecycle fields
//! is fixed at creation; a retry is a new attempt carrying the same id and an
//! incremented `retry_count`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};

/// Kind of work a task represents.
///
/// The set is open: any unrecognised name round-trips through `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    SystemMaintenance,
    HealthCheck,
    Monitoring,
    DataProcessing,
    FileCleanup,
    Backup,
    Optimization,
    Diagnostics,
    Analysis,
    UserRequest,
    Custom(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SystemMaintenance => "system_maintenance",
            Self::HealthCheck => "health_check",
            Self::Monitoring => "monitoring",
            Self::DataProcessing => "data_processing",
            Self::FileCleanup => "file_cleanup",
            Self::Backup => "backup",
            Self::Optimization => "optimization",
            Self::Diagnostics => "diagnostics",
            Self::Analysis => "analysis",
            Self::UserRequest => "user_request",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "system_maintenance" | "maintenance" => Self::SystemMaintenance,
            "health_check" => Self::HealthCheck,
            "monitoring" => Self::Monitoring,
            "data_processing" => Self::DataProcessing,
            "file_cleanup" => Self::FileCleanup,
            "backup" => Self::Backup,
            "optimization" => Self::Optimization,
            "diagnostics" => Self::Diagnostics,
            "analysis" => Self::Analysis,
            "user_request" => Self::UserRequest,
            _ => Self::Custom(s),
        }
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<TaskType> for String {
    fn from(t: TaskType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority level for tasks. Lower numeric value is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
    Background = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub const ALL: [Self; 5] = [
        Self::Critical,
        Self::High,
        Self::Medium,
        Self::Low,
        Self::Background,
    ];

    pub const fn value(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Background => "background",
        }
    }
}

impl TryFrom<u8> for TaskPriority {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|p| p.value() == value)
            .ok_or_else(|| EngineError::validation(format!("unknown task priority: {value}")))
    }
}

impl FromStr for TaskPriority {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(value) = s.parse::<u8>() {
            return Self::try_from(value);
        }
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s.to_lowercase())
            .ok_or_else(|| EngineError::validation(format!("unknown task priority: {s}")))
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the ready set (or for its retry backoff to elapse)
    Pending,
    /// Bound to a bot, not yet executing
    Assigned,
    /// Currently executing
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this status.
    ///
    /// `Failed -> Pending` only happens through a new attempt, and
    /// `Assigned/Running -> Pending` only when a bot fails mid-flight.
    pub fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Assigned, Self::Running, Self::Cancelled],
            Self::Assigned => &[Self::Running, Self::Pending, Self::Completed, Self::Failed, Self::Cancelled],
            Self::Running => &[Self::Pending, Self::Completed, Self::Failed, Self::Cancelled],
            Self::Failed => &[Self::Pending],
            Self::Completed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl FromStr for TaskStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "assigned" => Ok(Self::Assigned),
            "running" => Ok(Self::Running),
            "completed" | "complete" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(EngineError::validation(format!("unknown task status: {s}"))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estimated resource cost of running a task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceHints {
    /// Fraction of one CPU (0..=1)
    #[serde(default)]
    pub cpu_requirement: f64,
    /// Memory in megabytes
    #[serde(default)]
    pub memory_requirement_mb: f64,
    /// Fraction of I/O bandwidth (0..=1)
    #[serde(default)]
    pub io_requirement: f64,
}

impl ResourceHints {
    pub const fn new(cpu: f64, memory_mb: f64, io: f64) -> Self {
        Self {
            cpu_requirement: cpu,
            memory_requirement_mb: memory_mb,
            io_requirement: io,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&self.cpu_requirement) {
            return Err(EngineError::validation(format!(
                "cpu_requirement must be within 0..=1, got {}",
                self.cpu_requirement
            )));
        }
        if !(0.0..=1.0).contains(&self.io_requirement) {
            return Err(EngineError::validation(format!(
                "io_requirement must be within 0..=1, got {}",
                self.io_requirement
            )));
        }
        if !self.memory_requirement_mb.is_finite() || self.memory_requirement_mb < 0.0 {
            return Err(EngineError::validation(format!(
                "memory_requirement_mb must be non-negative, got {}",
                self.memory_requirement_mb
            )));
        }
        Ok(())
    }
}

impl std::ops::Add for ResourceHints {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.cpu_requirement + rhs.cpu_requirement,
            self.memory_requirement_mb + rhs.memory_requirement_mb,
            self.io_requirement + rhs.io_requirement,
        )
    }
}

impl std::ops::Sub for ResourceHints {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(
            (self.cpu_requirement - rhs.cpu_requirement).max(0.0),
            (self.memory_requirement_mb - rhs.memory_requirement_mb).max(0.0),
            (self.io_requirement - rhs.io_requirement).max(0.0),
        )
    }
}

/// Free-form metadata attached to a task plus the subsystem that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskContext {
    #[serde(default)]
    pub subsystem: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskContext {
    pub fn for_subsystem(subsystem: impl Into<String>) -> Self {
        Self {
            subsystem: subsystem.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Identity used to suppress duplicate generated work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub task_type: TaskType,
    pub subsystem: String,
    pub bucket: i64,
}

/// Request to create a task. Defaults are filled in from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub context: TaskContext,
    #[serde(default)]
    pub resources: ResourceHints,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_backoff_base_ms: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl NewTask {
    pub fn new(name: impl Into<String>, task_type: impl Into<TaskType>, priority: TaskPriority) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            task_type: task_type.into(),
            priority,
            context: TaskContext::default(),
            resources: ResourceHints::default(),
            max_retries: None,
            retry_backoff_base_ms: None,
            timeout_secs: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn context(mut self, context: TaskContext) -> Self {
        self.context = context;
        self
    }

    pub fn resources(mut self, resources: ResourceHints) -> Self {
        self.resources = resources;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn retry_backoff_base_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_base_ms = Some(ms);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Retry and timeout defaults applied to a `NewTask` that leaves them unset.
#[derive(Debug, Clone, Copy)]
pub struct TaskDefaults {
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
    pub timeout_secs: u64,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_base_ms: 1000,
            timeout_secs: 300,
        }
    }
}

/// A unit of schedulable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable across every attempt of the same work
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub resources: ResourceHints,
    pub context: TaskContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of the current attempt, 0 for the first execution
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
    pub timeout_secs: u64,
}

impl Task {
    /// Build and validate a task. Nothing is queued.
    pub fn create(request: NewTask, defaults: TaskDefaults) -> EngineResult<Self> {
        if request.name.trim().is_empty() {
            return Err(EngineError::validation("task name cannot be empty"));
        }
        if request.task_type.as_str().trim().is_empty() {
            return Err(EngineError::validation("task type cannot be empty"));
        }
        request.resources.validate()?;

        let timeout_secs = request.timeout_secs.unwrap_or(defaults.timeout_secs);
        if timeout_secs == 0 {
            return Err(EngineError::validation("timeout_secs must be at least 1"));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name: request.name,
            description: request.description,
            task_type: request.task_type,
            priority: request.priority,
            status: TaskStatus::Pending,
            resources: request.resources,
            context: request.context,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(defaults.max_retries),
            retry_backoff_base_ms: request
                .retry_backoff_base_ms
                .unwrap_or(defaults.retry_backoff_base_ms),
            timeout_secs,
        })
    }

    /// Move to a new status, refusing transitions the lifecycle forbids.
    pub fn transition_to(&mut self, status: TaskStatus) -> EngineResult<()> {
        if !self.status.can_transition_to(status) {
            return Err(EngineError::InvalidStateTransition {
                from: self.status.to_string(),
                to: status.to_string(),
                reason: format!("task {}", self.id),
            });
        }
        self.status = status;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether another attempt is allowed after a failure.
    pub const fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Clone this failed attempt into the next pending one.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.retry_count += 1;
        next.status = TaskStatus::Pending;
        next.updated_at = Utc::now();
        next
    }

    /// Backoff before the attempt following this one: `base * 2^retry_count`, capped.
    pub fn retry_delay_ms(&self, max_backoff_ms: u64) -> u64 {
        let factor = 2u64.checked_pow(self.retry_count).unwrap_or(u64::MAX);
        self.retry_backoff_base_ms
            .saturating_mul(factor)
            .min(max_backoff_ms)
    }

    pub fn dedup_key(&self, bucket_secs: u64) -> DedupKey {
        let bucket_secs = i64::try_from(bucket_secs.max(1)).unwrap_or(i64::MAX);
        DedupKey {
            task_type: self.task_type.clone(),
            subsystem: self.context.subsystem.clone(),
            bucket: self.created_at.timestamp().div_euclid(bucket_secs),
        }
    }
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    /// `retry_count` of the attempt this result belongs to
    pub attempt: u32,
    pub status: TaskStatus,
    pub result_data: Option<serde_json::Value>,
    /// Set iff `status` is `Failed`
    pub error_message: Option<String>,
    pub execution_time_secs: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub bot_id: Option<String>,
}

impl TaskResult {
    fn finished(
        task: &Task,
        status: TaskStatus,
        start_time: DateTime<Utc>,
        bot_id: Option<String>,
    ) -> Self {
        let end_time = Utc::now();
        let execution_time_secs = (end_time - start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            task_id: task.id,
            attempt: task.retry_count,
            status,
            result_data: None,
            error_message: None,
            execution_time_secs,
            start_time,
            end_time,
            bot_id,
        }
    }

    pub fn completed(
        task: &Task,
        data: serde_json::Value,
        start_time: DateTime<Utc>,
        bot_id: Option<String>,
    ) -> Self {
        let mut result = Self::finished(task, TaskStatus::Completed, start_time, bot_id);
        result.result_data = Some(data);
        result
    }

    pub fn failed(
        task: &Task,
        error: impl Into<String>,
        start_time: DateTime<Utc>,
        bot_id: Option<String>,
    ) -> Self {
        let mut result = Self::finished(task, TaskStatus::Failed, start_time, bot_id);
        result.error_message = Some(error.into());
        result
    }

    pub fn cancelled(task: &Task, start_time: DateTime<Utc>, bot_id: Option<String>) -> Self {
        Self::finished(task, TaskStatus::Cancelled, start_time, bot_id)
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}
