//! Host resource samplers.
//!
//! `SysinfoSampler` reads live CPU, memory and disk usage. `StaticSampler`
//! reports a fixed sample that can be swapped at runtime, for tests and
//! dry runs.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::models::health::ResourceSample;
use crate::domain::ports::ResourceSampler;

/// Samples the local host through `sysinfo`
///
/// # Examples
///
/// ```no_run
/// use overwatch::application::SysinfoSampler;
/// use overwatch::domain::ports::ResourceSampler;
///
/// # async fn example() -> anyhow::Result<()> {
/// let sampler = SysinfoSampler::new();
/// let sample = sampler.sample().await?;
/// println!("cpu {:.1}%", sample.cpu_percent);
/// # Ok(())
/// # }
/// ```
pub struct SysinfoSampler {
    /// Shared system info; CPU usage is a delta between two refreshes
    system: Arc<RwLock<System>>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::new()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());

        Self {
            system: Arc::new(RwLock::new(System::new_with_specifics(refresh_kind))),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let ratio = used as f64 / total as f64;
        (ratio * 100.0).clamp(0.0, 100.0)
    }
}

/// Used percentage of the fullest mounted disk
fn disk_percent() -> f64 {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .map(|d| percent(d.total_space().saturating_sub(d.available_space()), d.total_space()))
        .fold(0.0, f64::max)
}

#[async_trait]
impl ResourceSampler for SysinfoSampler {
    async fn sample(&self) -> Result<ResourceSample> {
        let (cpu_percent, memory_percent) = {
            let mut sys = self.system.write().await;
            sys.refresh_cpu_all();
            sys.refresh_memory();
            (
                f64::from(sys.global_cpu_usage()).clamp(0.0, 100.0),
                percent(sys.used_memory(), sys.total_memory()),
            )
        };

        let disk_percent = tokio::task::spawn_blocking(disk_percent)
            .await
            .context("disk sampling task failed")?;

        debug!(cpu_percent, memory_percent, disk_percent, "resource sample taken");
        Ok(ResourceSample::new(cpu_percent, memory_percent, disk_percent))
    }
}

/// Reports whatever sample it was last given
#[derive(Debug)]
pub struct StaticSampler {
    sample: Mutex<ResourceSample>,
}

impl StaticSampler {
    pub fn new(cpu_percent: f64, memory_percent: f64, disk_percent: f64) -> Self {
        Self {
            sample: Mutex::new(ResourceSample::new(cpu_percent, memory_percent, disk_percent)),
        }
    }

    /// A host with nearly nothing in use
    pub fn idle() -> Self {
        Self::new(5.0, 20.0, 30.0)
    }

    pub fn set(&self, cpu_percent: f64, memory_percent: f64, disk_percent: f64) {
        *self.sample.lock().unwrap_or_else(PoisonError::into_inner) =
            ResourceSample::new(cpu_percent, memory_percent, disk_percent);
    }
}

#[async_trait]
impl ResourceSampler for StaticSampler {
    async fn sample(&self) -> Result<ResourceSample> {
        let current = *self.sample.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(ResourceSample::new(
            current.cpu_percent,
            current.memory_percent,
            current.disk_percent,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_handles_zero_total() {
        assert!((percent(5, 0) - 0.0).abs() < f64::EPSILON);
        assert!((percent(50, 200) - 25.0).abs() < f64::EPSILON);
        assert!((percent(300, 200) - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_sysinfo_sample_in_range() {
        let sampler = SysinfoSampler::new();
        let sample = sampler.sample().await.unwrap();

        for value in [sample.cpu_percent, sample.memory_percent, sample.disk_percent] {
            assert!((0.0..=100.0).contains(&value));
        }
        assert!(sample.memory_percent > 0.0);
    }

    #[tokio::test]
    async fn test_static_sampler_updates() {
        let sampler = StaticSampler::idle();
        assert!((sampler.sample().await.unwrap().cpu_percent - 5.0).abs() < f64::EPSILON);

        sampler.set(97.0, 10.0, 10.0);
        let sample = sampler.sample().await.unwrap();
        assert!((sample.cpu_percent - 97.0).abs() < f64::EPSILON);
    }
}
