//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the seams where behaviour is plugged into the engine:
//! - TaskHandler: executes tasks of a given type
//! - AssignmentStrategy: picks a bot among eligible candidates
//! - GenerationRule: turns system signals into new tasks
//! - ResourceSampler: reads host resource usage

pub mod assignment_strategy;
pub mod generation_rule;
pub mod resource_sampler;
pub mod task_handler;

pub use assignment_strategy::{AssignmentStrategy, StrategyContext};
pub use generation_rule::{GenerationRule, SystemSignals};
pub use resource_sampler::ResourceSampler;
pub use task_handler::{ExecutionContext, TaskHandler};
