//! `overwatch config show|validate`

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::cli::load_config;
use crate::cli::output::{CommandOutput, output};
use crate::domain::models::Config;

impl CommandOutput for Config {
    fn to_human(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_else(|e| format!("failed to render config: {e}"))
    }
}

#[derive(Debug, Serialize)]
struct ValidationReport {
    valid: bool,
    source: String,
    error: Option<String>,
}

impl CommandOutput for ValidationReport {
    fn to_human(&self) -> String {
        match &self.error {
            None => format!("Configuration from {} is valid.", self.source),
            Some(e) => format!("Configuration from {} is invalid: {e}", self.source),
        }
    }
}

pub fn show(path: Option<&Path>, json: bool) -> Result<()> {
    output(&load_config(path)?, json);
    Ok(())
}

pub fn validate(path: Option<&Path>, json: bool) -> Result<()> {
    let loaded = load_config(path);
    let report = ValidationReport {
        valid: loaded.is_ok(),
        source: path.map_or_else(|| ".overwatch/".to_string(), |p| p.display().to_string()),
        error: loaded.as_ref().err().map(|e| format!("{e:#}")),
    };
    output(&report, json);
    loaded.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate_reports_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scheduler:\n  max_concurrent_tasks: 0").unwrap();
        assert!(validate(Some(file.path()), true).is_err());
    }

    #[test]
    fn test_validate_accepts_good_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "assignment:\n  strategy: round_robin").unwrap();
        temp_env::with_vars_unset(["OVERWATCH_ASSIGNMENT__STRATEGY"], || {
            validate(Some(file.path()), false).unwrap();
        });
    }
}
