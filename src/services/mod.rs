//! Engine services: scheduling, bot assignment, task generation, health
//! monitoring and the event bus that ties them together.

pub mod assignment_engine;
pub mod builtin_handlers;
pub mod engine;
pub mod event_bus;
pub mod handler_registry;
pub mod health_monitor;
pub mod scheduler;
pub mod strategies;
pub mod task_generator;

pub use assignment_engine::{AssignmentEngine, AssignmentStats};
pub use builtin_handlers::{CommandHandler, HealthCheckHandler};
pub use engine::{Engine, EngineStats, TaskDetail};
pub use event_bus::{EngineEvent, EventBus, EventPayload, SubscriptionId};
pub use handler_registry::HandlerRegistry;
pub use health_monitor::{HealthMonitor, HealthRule, PeriodicHealthCheckRule};
pub use scheduler::{Scheduler, SchedulerStats};
pub use task_generator::{GenerationReport, TaskGenerator};
