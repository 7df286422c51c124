//! Table output formatting for CLI commands
//!
//! Tasks, task results, bots, statistics and health reports rendered with
//! comfy-table. Colors are disabled under `NO_COLOR` or a dumb terminal.

use std::env;

use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table, presets};

use super::truncate;
use crate::domain::models::{
    AlertLevel, Bot, BotStatus, HealthReport, Task, TaskResult, TaskStatus,
};
use crate::services::EngineStats;

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
        }
    }

    pub const fn with_colors(use_colors: bool) -> Self {
        Self { use_colors }
    }

    fn base_table(headers: &[&str]) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(
                headers
                    .iter()
                    .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                    .collect::<Vec<_>>(),
            );
        table
    }

    fn colored(&self, text: impl ToString, color: Color) -> Cell {
        let cell = Cell::new(text.to_string());
        if self.use_colors { cell.fg(color) } else { cell }
    }

    pub fn format_tasks(&self, tasks: &[Task]) -> String {
        let mut table = Self::base_table(&["ID", "Name", "Type", "Priority", "Status", "Retries"]);
        for task in tasks {
            table.add_row(vec![
                Cell::new(&task.id.to_string()[..8]),
                Cell::new(truncate(&task.name, 40)),
                Cell::new(task.task_type.as_str()),
                Cell::new(task.priority.as_str()),
                self.colored(task.status, status_color(task.status)),
                Cell::new(format!("{}/{}", task.retry_count, task.max_retries)),
            ]);
        }
        table.to_string()
    }

    pub fn format_results(&self, results: &[TaskResult]) -> String {
        let mut table = Self::base_table(&["Attempt", "Status", "Bot", "Seconds", "Outcome"]);
        for result in results {
            let outcome = result
                .error_message
                .clone()
                .or_else(|| result.result_data.as_ref().map(ToString::to_string))
                .unwrap_or_default();
            table.add_row(vec![
                Cell::new(result.attempt),
                self.colored(result.status, status_color(result.status)),
                Cell::new(result.bot_id.as_deref().unwrap_or("-")),
                Cell::new(format!("{:.3}", result.execution_time_secs)),
                Cell::new(truncate(&outcome, 60)),
            ]);
        }
        table.to_string()
    }

    pub fn format_bots(&self, bots: &[Bot]) -> String {
        let mut table = Self::base_table(&["ID", "Name", "Type", "Status", "Load", "Done", "Failed"]);
        for bot in bots {
            table.add_row(vec![
                Cell::new(&bot.id),
                Cell::new(truncate(&bot.name, 30)),
                Cell::new(bot.bot_type.as_str()),
                self.colored(bot.status, bot_status_color(bot.status)),
                Cell::new(format!("{}/{}", bot.current_load, bot.max_concurrent_tasks)),
                Cell::new(bot.completed_tasks),
                Cell::new(bot.failed_tasks),
            ]);
        }
        table.to_string()
    }

    pub fn format_stats(&self, stats: &EngineStats) -> String {
        let mut table = Self::base_table(&["Metric", "Value"]);
        let percent = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.1}%", v * 100.0));
        let secs = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.3}s"));

        table.add_row(vec![Cell::new("tasks"), Cell::new(stats.tasks.total_tasks)]);
        for (status, count) in &stats.tasks.by_status {
            table.add_row(vec![Cell::new(format!("  {status}")), Cell::new(count)]);
        }
        table.add_row(vec![Cell::new("queue depth"), Cell::new(stats.tasks.queue_depth)]);
        table.add_row(vec![Cell::new("running"), Cell::new(stats.tasks.running)]);
        table.add_row(vec![Cell::new("retries"), Cell::new(stats.tasks.retries)]);
        table.add_row(vec![Cell::new("success rate"), Cell::new(percent(stats.tasks.success_rate))]);
        table.add_row(vec![
            Cell::new("avg execution"),
            Cell::new(secs(stats.tasks.average_execution_secs)),
        ]);
        table.add_row(vec![Cell::new("bots"), Cell::new(stats.bots_total)]);
        for (status, count) in &stats.assignments.bots_by_status {
            table.add_row(vec![Cell::new(format!("  {status}")), Cell::new(count)]);
        }
        table.add_row(vec![
            Cell::new("assignments"),
            Cell::new(format!(
                "{} ({} open, {} completed, {} failed)",
                stats.assignments.total,
                stats.assignments.open,
                stats.assignments.completed,
                stats.assignments.failed
            )),
        ]);
        table.add_row(vec![Cell::new("strategy"), Cell::new(&stats.assignments.strategy)]);
        table.add_row(vec![Cell::new("events"), Cell::new(stats.events_published)]);
        table.to_string()
    }

    pub fn format_health(&self, report: &HealthReport) -> String {
        let mut table = Self::base_table(&["Metric", "Value", "Level", "Warning", "Critical"]);
        for metric in &report.metrics {
            table.add_row(vec![
                Cell::new(metric.metric),
                Cell::new(format!("{:.2}", metric.value)),
                self.colored(metric.level, level_color(metric.level)),
                Cell::new(metric.threshold.warning),
                Cell::new(metric.threshold.critical),
            ]);
        }
        let mut out = format!("Status: {}\n{table}", report.status);
        for alert in &report.recent_alerts {
            out.push_str(&format!("\n[{}] {}", alert.level, alert.message));
        }
        out
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if color output is supported
fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

const fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Completed => Color::Green,
        TaskStatus::Running => Color::Cyan,
        TaskStatus::Assigned => Color::Yellow,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Cancelled => Color::DarkGrey,
        TaskStatus::Pending => Color::White,
    }
}

const fn bot_status_color(status: BotStatus) -> Color {
    match status {
        BotStatus::Online => Color::Green,
        BotStatus::Busy => Color::Cyan,
        BotStatus::Offline => Color::DarkGrey,
        BotStatus::Error => Color::Red,
    }
}

const fn level_color(level: AlertLevel) -> Color {
    match level {
        AlertLevel::Normal => Color::Green,
        AlertLevel::Warning => Color::Yellow,
        AlertLevel::Critical => Color::Red,
    }
}
