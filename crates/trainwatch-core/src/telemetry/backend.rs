use std::process::Command;
use tracing::debug;

/// Raw metrics from one query. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuReading {
    pub memory_used_mb: Option<f64>,
    pub memory_total_mb: Option<f64>,
    pub utilization_percent: Option<f64>,
    pub temperature_c: Option<f64>,
    pub power_draw_w: Option<f64>,
    pub power_limit_w: Option<f64>,
}

/// Source of accelerator metrics for one device.
///
/// `sample` is called from a blocking thread and may take as long as the
/// underlying query does. `None` means the query failed this time; the
/// caller keeps going.
pub trait GpuBackend: Send + Sync {
    fn device_name(&self) -> String;
    fn sample(&self) -> Option<GpuReading>;
}

const QUERY_FIELDS: &str = "memory.used,memory.total,utilization.gpu,temperature.gpu,power.draw,power.limit";

/// Queries the NVIDIA management interface through `nvidia-smi`.
#[derive(Debug, Clone)]
pub struct NvidiaSmiBackend {
    index: u32,
    name: String,
}

impl NvidiaSmiBackend {
    /// Resolves the device, or `None` when the tool or the device is absent.
    #[must_use]
    pub fn acquire(index: u32) -> Option<Self> {
        let output = Command::new("nvidia-smi")
            .args(["--query-gpu=name", "--format=csv,noheader", "-i", &index.to_string()])
            .output()
            .map_err(|e| debug!(error = %e, "nvidia-smi not runnable"))
            .ok()?;
        if !output.status.success() {
            debug!(index, status = ?output.status, "nvidia-smi could not resolve device");
            return None;
        }
        let name = String::from_utf8_lossy(&output.stdout).lines().next()?.trim().to_string();
        if name.is_empty() {
            return None;
        }
        Some(Self { index, name })
    }
}

impl GpuBackend for NvidiaSmiBackend {
    fn device_name(&self) -> String {
        self.name.clone()
    }

    fn sample(&self) -> Option<GpuReading> {
        let output = Command::new("nvidia-smi")
            .args([
                &format!("--query-gpu={QUERY_FIELDS}"),
                "--format=csv,noheader,nounits",
                "-i",
                &self.index.to_string(),
            ])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        parse_query_line(text.lines().next()?)
    }
}

fn parse_field(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.contains("N/A") || raw.contains("Not Supported") {
        return None;
    }
    raw.parse().ok()
}

/// One `nounits` CSV row in [`QUERY_FIELDS`] order.
pub(crate) fn parse_query_line(line: &str) -> Option<GpuReading> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 6 {
        return None;
    }
    Some(GpuReading {
        memory_used_mb: parse_field(fields[0]),
        memory_total_mb: parse_field(fields[1]),
        utilization_percent: parse_field(fields[2]),
        temperature_c: parse_field(fields[3]),
        power_draw_w: parse_field(fields[4]),
        power_limit_w: parse_field(fields[5]),
    })
}
