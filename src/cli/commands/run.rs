//! `overwatch run`: start the engine and stream its events

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::application::SysinfoSampler;
use crate::cli::output::{CommandOutput, TableFormatter, output};
use crate::domain::models::Config;
use crate::services::{EngineEvent, EngineStats, Engine};

impl CommandOutput for EngineStats {
    fn to_human(&self) -> String {
        let uptime = self
            .uptime_secs
            .map_or_else(|| "-".to_string(), |s| format!("{s}s"));
        format!(
            "Engine {} (uptime {uptime})\n{}",
            if self.running { "running" } else { "stopped" },
            TableFormatter::new().format_stats(self)
        )
    }
}

fn event_line(event: &EngineEvent) -> String {
    let mut line = format!(
        "#{:<5} {} {:<8} {:<20}",
        event.sequence,
        event.timestamp.format("%H:%M:%S%.3f"),
        event.severity,
        event.name()
    );
    if let Some(task_id) = event.task_id {
        line.push_str(&format!(" task={}", &task_id.to_string()[..8]));
    }
    if let Some(bot_id) = &event.bot_id {
        line.push_str(&format!(" bot={bot_id}"));
    }
    line
}

fn print_event(event: &EngineEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to serialize event"),
        }
    } else {
        println!("{}", event_line(event));
    }
}

/// Run until Ctrl-C or `duration_secs`, printing every event
pub async fn execute(config: Config, duration_secs: Option<u64>, json: bool) -> Result<()> {
    let engine = Engine::new(config, Arc::new(SysinfoSampler::new()))
        .context("Failed to build engine")?;
    engine.install_builtins();

    let mut events = engine.subscribe();
    engine.start().context("Failed to start engine")?;
    if !json {
        println!(
            "Engine started with {} bot(s), strategy {}. Press Ctrl-C to stop.",
            engine.list_bots().len(),
            engine.current_strategy()
        );
    }

    let deadline = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = &mut deadline => break,
            received = events.recv() => match received {
                Ok(event) => print_event(&event, json),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.stop().await.context("Failed to stop engine")?;
    while let Ok(event) = events.try_recv() {
        print_event(&event, json);
    }

    let stats = engine.get_stats();
    if json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        output(&stats, false);
    }
    Ok(())
}
