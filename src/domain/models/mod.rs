pub mod assignment;
pub mod bot;
pub mod config;
pub mod health;
pub mod queue;
pub mod task;

pub use assignment::{Assignment, AssignmentStatus};
pub use bot::{Bot, BotCapability, BotRegistration, BotStatus, BotType};
pub use config::{
    AssignmentConfig, CapacityConfig, Config, EventBusConfig, GeneratorConfig, HealthConfig,
    LoggingConfig, RetryConfig, SchedulerConfig,
};
pub use health::{
    Alert, AlertLevel, HealthReport, HealthStatus, HealthThresholds, MetricKind, MetricReport,
    ResourceSample, ThresholdPair,
};
pub use queue::ReadySet;
pub use task::{
    DedupKey, NewTask, ResourceHints, Task, TaskContext, TaskDefaults, TaskPriority, TaskResult,
    TaskStatus, TaskType,
};
