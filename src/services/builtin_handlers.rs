//! Built-in task handlers.
//!
//! `HealthCheckHandler` answers `health_check` tasks with a resource sample.
//! `CommandHandler` runs the shell command found in the task context and
//! kills it when the task is cancelled or times out.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, info};

use crate::domain::models::task::Task;
use crate::domain::ports::{ExecutionContext, ResourceSampler, TaskHandler};

/// Context metadata key holding the command line for `CommandHandler`
pub const COMMAND_KEY: &str = "command";

/// Answers health checks with a fresh resource sample
pub struct HealthCheckHandler {
    sampler: Arc<dyn ResourceSampler>,
}

impl HealthCheckHandler {
    pub fn new(sampler: Arc<dyn ResourceSampler>) -> Self {
        Self { sampler }
    }
}

#[async_trait]
impl TaskHandler for HealthCheckHandler {
    fn name(&self) -> &str {
        "health_check"
    }

    async fn execute(&self, task: &Task, ctx: &ExecutionContext) -> Result<serde_json::Value> {
        let sample = tokio::select! {
            sample = self.sampler.sample() => sample.context("failed to sample resources")?,
            () = ctx.cancelled() => bail!("health check cancelled"),
        };
        debug!(task_id = %task.id, cpu = sample.cpu_percent, "health check sampled");
        Ok(serde_json::to_value(sample)?)
    }
}

/// Runs `context.metadata["command"]` through `sh -c`
#[derive(Debug, Default)]
pub struct CommandHandler;

impl CommandHandler {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskHandler for CommandHandler {
    fn name(&self) -> &str {
        "command"
    }

    fn can_handle(&self, task: &Task) -> bool {
        task.context
            .get_str(COMMAND_KEY)
            .is_some_and(|c| !c.trim().is_empty())
    }

    async fn execute(&self, task: &Task, ctx: &ExecutionContext) -> Result<serde_json::Value> {
        let command = task
            .context
            .get_str(COMMAND_KEY)
            .context("task context has no command")?;
        info!(task_id = %task.id, command, "running command");

        // Dropping the child on cancellation kills it
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn: {command}"))?;

        let output = tokio::select! {
            output = child.wait_with_output() => output.context("failed to wait for command")?,
            () = ctx.cancelled() => bail!("command cancelled"),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        let exit_code = output.status.code();

        if !output.status.success() {
            bail!(
                "command exited with {}: {}",
                exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                stderr
            );
        }

        Ok(json!({
            "command": command,
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}
