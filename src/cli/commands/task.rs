//! `overwatch task run`: submit one task and wait for its outcome

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::application::SysinfoSampler;
use crate::cli::output::{
    CommandOutput, ProgressBarExt, TableFormatter, create_spinner_with_message, output,
};
use crate::domain::models::{Config, NewTask, TaskContext, TaskPriority, TaskStatus};
use crate::services::builtin_handlers::COMMAND_KEY;
use crate::services::{Engine, TaskDetail};

/// Arguments of `task run`
pub struct RunTaskArgs {
    pub name: String,
    pub task_type: String,
    pub priority: String,
    pub command: Option<String>,
    pub subsystem: String,
    pub max_retries: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub wait_secs: u64,
}

impl CommandOutput for TaskDetail {
    fn to_human(&self) -> String {
        let formatter = TableFormatter::new();
        let mut out = formatter.format_tasks(std::slice::from_ref(&self.task));
        if !self.results.is_empty() {
            out.push_str("\n\nAttempts:\n");
            out.push_str(&formatter.format_results(&self.results));
        }
        out
    }
}

fn build_request(args: &RunTaskArgs) -> Result<NewTask> {
    let priority: TaskPriority = args.priority.parse()?;
    let mut context = TaskContext::for_subsystem(args.subsystem.clone());
    if let Some(command) = &args.command {
        context = context.with(COMMAND_KEY, command.clone());
    }

    let mut request = NewTask::new(args.name.clone(), args.task_type.as_str(), priority).context(context);
    if let Some(retries) = args.max_retries {
        request = request.max_retries(retries);
    }
    if let Some(timeout) = args.timeout_secs {
        request = request.timeout_secs(timeout);
    }
    Ok(request)
}

/// Wait until the task reaches a terminal status with no retry pending
async fn wait_for_outcome(engine: &Engine, task_id: uuid::Uuid, wait: Duration) -> Result<TaskDetail> {
    let poll = async {
        loop {
            let detail = engine.get_task(task_id)?;
            if detail.task.status.is_terminal() {
                return Ok::<_, anyhow::Error>(detail);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    tokio::time::timeout(wait, poll)
        .await
        .with_context(|| format!("task {task_id} did not finish within {}s", wait.as_secs()))?
}

pub async fn execute(mut config: Config, args: RunTaskArgs, json: bool) -> Result<()> {
    // One-shot: only the submitted task runs, executed in-process
    config.generator.enabled = false;
    config.health.enabled = false;
    config.bots.clear();

    let engine = Engine::new(config, Arc::new(SysinfoSampler::new()))?;
    engine.install_builtins();

    let task = engine
        .create_task(build_request(&args)?)
        .context("Failed to submit task")?;
    engine.start()?;

    let spinner = (!json).then(|| create_spinner_with_message(format!("running {}", task.name)));
    let outcome = wait_for_outcome(&engine, task.id, Duration::from_secs(args.wait_secs)).await;
    engine.stop().await?;

    let detail = match outcome {
        Ok(detail) => detail,
        Err(e) => {
            if let Some(spinner) = spinner {
                spinner.finish_error("timed out");
            }
            return Err(e);
        }
    };

    if let Some(spinner) = &spinner {
        match detail.task.status {
            TaskStatus::Completed => spinner.finish_success(detail.task.status.to_string()),
            status => spinner.finish_error(status.to_string()),
        }
    }
    output(&detail, json);

    if detail.task.status != TaskStatus::Completed {
        bail!("task {} ended {}", detail.task.id, detail.task.status);
    }
    Ok(())
}
