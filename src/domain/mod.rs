//! Domain layer for the Overwatch engine
//!
//! This module contains core business logic and domain models.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{EngineError, EngineResult};
