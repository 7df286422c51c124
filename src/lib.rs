//! Overwatch - task scheduling and bot assignment engine
//!
//! Overwatch queues prioritized, resource-hinted tasks, executes them through
//! registered handlers or routes them to capability-matched bots, retries
//! failures with exponential backoff, generates maintenance work from system
//! signals and publishes every state transition on an in-process event bus.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, error taxonomy and port traits
//! - **Service Layer** (`services`): scheduler, assignment engine, generator,
//!   health monitor, event bus and the `Engine` facade
//! - **Application Layer** (`application`): host resource samplers
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use overwatch::{Config, Engine, NewTask, SysinfoSampler, TaskPriority, TaskType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::new(Config::default(), Arc::new(SysinfoSampler::new()))?;
//!     engine.install_builtins();
//!     engine.start()?;
//!     engine.create_task(NewTask::new("backup db", TaskType::Backup, TaskPriority::High))?;
//!     engine.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{StaticSampler, SysinfoSampler};
pub use domain::errors::{EngineError, EngineResult};
pub use domain::models::{
    Assignment, AssignmentStatus, Bot, BotCapability, BotRegistration, BotStatus, BotType,
    Config, HealthReport, NewTask, ResourceHints, Task, TaskContext, TaskPriority, TaskResult,
    TaskStatus, TaskType,
};
pub use domain::ports::{
    AssignmentStrategy, ExecutionContext, GenerationRule, ResourceSampler, SystemSignals,
    TaskHandler,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{Engine, EngineEvent, EngineStats, EventPayload, TaskDetail};
