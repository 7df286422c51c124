//! Resource sampler port.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::models::health::ResourceSample;

/// Port for reading host resource usage
///
/// Implementations report CPU, memory and disk as percentages. The error
/// rate is filled in by the engine from recent task results.
#[async_trait]
pub trait ResourceSampler: Send + Sync {
    async fn sample(&self) -> Result<ResourceSample>;
}
