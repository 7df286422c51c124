//! Overwatch CLI entry point.

use clap::Parser;

use overwatch::cli::commands::task::RunTaskArgs;
use overwatch::cli::{self, Cli, Commands, ConfigCommands, TaskCommands};
use overwatch::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;
    let config_path = cli.config.as_deref();

    // `config` commands report load errors themselves
    if let Commands::Config(command) = &cli.command {
        let result = match command {
            ConfigCommands::Show => cli::commands::config::show(config_path, json),
            ConfigCommands::Validate => cli::commands::config::validate(config_path, json),
        };
        if let Err(err) = result {
            cli::handle_error(err, json);
        }
        return;
    }

    let config = match cli::load_config(config_path) {
        Ok(config) => config,
        Err(err) => cli::handle_error(err, json),
    };

    let mut log_config = LogConfig::from(&config.logging);
    // Keep stdout clean for machine-readable output
    log_config.enable_stdout &= !json;
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => logger,
        Err(err) => cli::handle_error(err, json),
    };

    let result = match cli.command {
        Commands::Run { duration_secs } => {
            cli::commands::run::execute(config, duration_secs, json).await
        }
        Commands::Task(TaskCommands::Run {
            name,
            task_type,
            priority,
            command,
            subsystem,
            max_retries,
            timeout_secs,
            wait_secs,
        }) => {
            let args = RunTaskArgs {
                name,
                task_type,
                priority,
                command,
                subsystem,
                max_retries,
                timeout_secs,
                wait_secs,
            };
            cli::commands::task::execute(config, args, json).await
        }
        Commands::Health => cli::commands::health::execute(config, json).await,
        Commands::Config(_) => Ok(()),
    };

    if let Err(err) = result {
        cli::handle_error(err, json);
    }
}
