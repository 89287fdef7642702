//! On-demand CPU / memory / disk sampling and static host information.

use std::sync::{Arc, Mutex};

use scheduler_core::{ResourceUsage, SystemInfo};
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};
use tracing::warn;

use crate::identity::local_hostname;

/// Keeps one `System` between samples; CPU usage is measured as the delta
/// since the previous refresh, so the first sample may read 0%.
#[derive(Clone)]
pub struct ResourceSampler {
    system: Arc<Mutex<System>>,
}

impl ResourceSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system: Arc::new(Mutex::new(system)),
        }
    }

    pub async fn sample(&self) -> ResourceUsage {
        let system = Arc::clone(&self.system);
        match tokio::task::spawn_blocking(move || sample_blocking(&system)).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!("Resource sampling task failed: {}", e);
                ResourceUsage::default()
            }
        }
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn sample_blocking(system: &Mutex<System>) -> ResourceUsage {
    let mut sys = system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let disks = Disks::new_with_refreshed_list();
    let (disk_total, disk_available) = disks.list().iter().fold((0u64, 0u64), |acc, disk| {
        (acc.0 + disk.total_space(), acc.1 + disk.available_space())
    });

    ResourceUsage {
        cpu_percent: sys.global_cpu_usage().clamp(0.0, 100.0),
        memory_percent: percent(sys.used_memory(), sys.total_memory()),
        disk_percent: percent(disk_total.saturating_sub(disk_available), disk_total),
    }
}

/// Percentage of `used` in `total`, 0 when total is unknown.
pub fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    ((used as f64 / total as f64) * 100.0).clamp(0.0, 100.0) as f32
}

/// Static host description sent with registration.
pub fn system_info() -> SystemInfo {
    let sys = System::new_with_specifics(
        RefreshKind::new()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything()),
    );
    let disks = Disks::new_with_refreshed_list();

    SystemInfo {
        hostname: local_hostname(),
        os_name: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
        os_version: System::os_version().unwrap_or_default(),
        cpu_brand: sys
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .unwrap_or_default(),
        cpu_cores: sys.cpus().len(),
        total_memory_bytes: sys.total_memory(),
        total_disk_bytes: disks.list().iter().map(|disk| disk.total_space()).sum(),
    }
}
