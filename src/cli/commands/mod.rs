//! Command handlers, one module per top-level command

pub mod config;
pub mod health;
pub mod run;
pub mod task;
