//! Host snapshot reported once at startup.

use serde::{Deserialize, Serialize};
use sysinfo::System;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareReport {
    pub os: String,
    pub logical_cores: usize,
    pub host_memory_total_mb: f64,
    pub host_memory_available_mb: f64,
    pub gpu_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_name: Option<String>,
    pub device: String,
}

impl HardwareReport {
    /// Probes the host. `gpu_name` comes from the telemetry backend, when one
    /// was acquired.
    #[must_use]
    pub fn probe(device: &str, gpu_name: Option<String>) -> Self {
        let mut system = System::new();
        system.refresh_memory();

        let os = System::long_os_version()
            .or_else(System::name)
            .unwrap_or_else(|| std::env::consts::OS.to_string());
        let logical_cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);

        Self {
            os,
            logical_cores,
            host_memory_total_mb: bytes_to_mb(system.total_memory()),
            host_memory_available_mb: bytes_to_mb(system.available_memory()),
            gpu_available: gpu_name.is_some(),
            gpu_name,
            device: device.to_string(),
        }
    }
}

fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
