//! `overwatch health`: one sample evaluated against the thresholds

use std::sync::Arc;

use anyhow::Result;

use crate::application::SysinfoSampler;
use crate::cli::output::{CommandOutput, TableFormatter, output};
use crate::domain::models::{Config, HealthReport};
use crate::services::Engine;

impl CommandOutput for HealthReport {
    fn to_human(&self) -> String {
        TableFormatter::new().format_health(self)
    }
}

pub async fn execute(config: Config, json: bool) -> Result<()> {
    let engine = Engine::new(config, Arc::new(SysinfoSampler::new()))?;
    engine.sample_health().await?;
    output(&engine.get_health(), json);
    Ok(())
}
