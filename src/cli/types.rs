//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "overwatch")]
#[command(about = "Overwatch - task scheduling and bot assignment engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .overwatch/config.yaml + local.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the engine with the configured bots and stream its events
    Run {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(short, long)]
        duration_secs: Option<u64>,
    },

    /// Task commands
    #[command(subcommand)]
    Task(TaskCommands),

    /// Take one resource sample and evaluate it against the thresholds
    Health,

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Submit one task, wait for it to finish and print its history
    Run {
        /// Task name
        name: String,

        /// Task type (health_check, backup, command, ...)
        #[arg(short = 't', long = "type", default_value = "command")]
        task_type: String,

        /// Priority: critical, high, medium, low, background or 0-4
        #[arg(short, long, default_value = "medium")]
        priority: String,

        /// Shell command for `command` tasks
        #[arg(short = 'x', long)]
        command: Option<String>,

        /// Subsystem recorded in the task context
        #[arg(short, long, default_value = "cli")]
        subsystem: String,

        /// Retries after the first failure
        #[arg(short, long)]
        max_retries: Option<u32>,

        /// Execution timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Give up waiting after this many seconds
        #[arg(short, long, default_value = "600")]
        wait_secs: u64,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Load and validate the configuration
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_task_run() {
        let cli = Cli::try_parse_from([
            "overwatch", "--json", "task", "run", "nightly", "-x", "echo hi", "-p", "high",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Task(TaskCommands::Run {
                name,
                task_type,
                priority,
                command,
                ..
            }) => {
                assert_eq!(name, "nightly");
                assert_eq!(task_type, "command");
                assert_eq!(priority, "high");
                assert_eq!(command.as_deref(), Some("echo hi"));
            }
            _ => panic!("expected task run"),
        }
    }
}
