//! ResourceSource (consumed, §6): host CPU/memory observations via
//! `sysinfo`. Refreshing is synchronous and fast enough to run inline rather
//! than on a blocking-pool thread; the `Mutex` exists only because `System`
//! needs `&mut self` to refresh and this is shared across concurrent tick
//! evaluations.

use async_trait::async_trait;
use domain::{ResourceLimits, ResourceSource};
use shared::{Error, Result};
use std::time::Duration;
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tokio::sync::Mutex;

pub struct SysinfoResourceSource {
    system: Mutex<System>,
}

impl SysinfoResourceSource {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_cpu(CpuRefreshKind::everything()),
        );
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoResourceSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceSource for SysinfoResourceSource {
    async fn limits(&self) -> Result<ResourceLimits> {
        let mut sys = self.system.lock().await;
        sys.refresh_cpu();
        sys.refresh_memory();
        let cpu_cores = sys.cpus().len() as u32;
        if cpu_cores == 0 {
            return Err(Error::ResourceUnavailable("sysinfo reported zero cpus".into()));
        }
        Ok(ResourceLimits {
            cpu_cores,
            memory_bytes: sys.total_memory(),
        })
    }

    async fn cpu_usage_percent(&self, sample: Duration) -> Result<f64> {
        let mut sys = self.system.lock().await;
        sys.refresh_cpu();
        tokio::time::sleep(sample).await;
        sys.refresh_cpu();
        if sys.cpus().is_empty() {
            return Err(Error::ResourceUnavailable("sysinfo reported no cpus".into()));
        }
        let total: f32 = sys.cpus().iter().map(|c| c.cpu_usage()).sum();
        Ok((total / sys.cpus().len() as f32) as f64)
    }

    async fn memory_used_percent(&self) -> Result<f64> {
        let mut sys = self.system.lock().await;
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return Err(Error::ResourceUnavailable("sysinfo reported zero total memory".into()));
        }
        Ok(sys.used_memory() as f64 / total as f64 * 100.0)
    }
}
