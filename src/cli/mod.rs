//! Command-line interface
//!
//! A clap command tree over the engine facade. Every command prints either
//! human-readable tables or, with `--json`, a single JSON document.

pub mod commands;
pub mod output;
pub mod types;

use std::path::Path;

use anyhow::Result;

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

pub use types::{Cli, Commands, ConfigCommands, TaskCommands};

/// Load configuration from `path`, or from the default hierarchy
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Print a command error in the selected format and exit non-zero
pub fn handle_error(err: anyhow::Error, json: bool) -> ! {
    if json {
        let body = serde_json::json!({
            "error": err.to_string(),
            "causes": err.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
