//! Accelerator telemetry: samples, bounded history, background sampling.

pub mod backend;
pub mod monitor;

pub use backend::{GpuBackend, GpuReading, NvidiaSmiBackend};
pub use monitor::{MonitorState, TelemetryMonitor};

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One point-in-time reading. Numeric fields are zero when the backend is
/// unavailable or did not report them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub memory_percent: f64,
    pub utilization_percent: f64,
    pub temperature_c: f64,
    pub power_draw_w: f64,
    pub power_limit_w: f64,
    pub warnings: Vec<String>,
}

/// Threshold policy applied to every sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub memory_high_water: f64,
    pub utilization_low_water: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { memory_high_water: 85.0, utilization_low_water: 30.0 }
    }
}

impl TelemetrySample {
    /// Builds a sample from a raw reading, evaluating thresholds only against
    /// the metrics the reading actually carries.
    #[must_use]
    pub fn from_reading(reading: &GpuReading, thresholds: &Thresholds) -> Self {
        let memory_percent = match (reading.memory_used_mb, reading.memory_total_mb) {
            (Some(used), Some(total)) if total > 0.0 => Some(used * 100.0 / total),
            _ => None,
        };

        let mut warnings = Vec::new();
        if let Some(pct) = memory_percent.filter(|p| *p > thresholds.memory_high_water) {
            warnings.push(format!(
                "High GPU memory usage: {pct:.1}% (threshold {:.0}%)",
                thresholds.memory_high_water
            ));
        }
        if let Some(util) = reading.utilization_percent.filter(|u| *u < thresholds.utilization_low_water) {
            warnings.push(format!(
                "Low GPU utilization: {util:.1}% (threshold {:.0}%)",
                thresholds.utilization_low_water
            ));
        }

        Self {
            memory_used_mb: reading.memory_used_mb.unwrap_or_default(),
            memory_total_mb: reading.memory_total_mb.unwrap_or_default(),
            memory_percent: memory_percent.unwrap_or_default(),
            utilization_percent: reading.utilization_percent.unwrap_or_default(),
            temperature_c: reading.temperature_c.unwrap_or_default(),
            power_draw_w: reading.power_draw_w.unwrap_or_default(),
            power_limit_w: reading.power_limit_w.unwrap_or_default(),
            warnings,
        }
    }
}

/// Aggregate over the retained history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub device_index: u32,
    pub available: bool,
    pub latest: Option<TelemetrySample>,
    pub sample_count: usize,
    pub avg_memory_percent: Option<f64>,
    pub max_memory_percent: Option<f64>,
    pub avg_utilization_percent: Option<f64>,
}

/// Fixed-capacity FIFO of samples plus the latest one.
#[derive(Debug, Clone)]
pub struct TelemetryHistory {
    capacity: usize,
    samples: VecDeque<TelemetrySample>,
    latest: Option<TelemetrySample>,
}

impl TelemetryHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, samples: VecDeque::with_capacity(capacity), latest: None }
    }

    /// Appends, evicting the oldest sample once full.
    pub fn push(&mut self, sample: TelemetrySample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.latest = Some(sample.clone());
        self.samples.push_back(sample);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.latest.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetrySample> {
        self.samples.iter()
    }

    #[must_use]
    pub fn summarize(&self, device_index: u32, available: bool) -> TelemetrySummary {
        let mut summary = TelemetrySummary {
            device_index,
            available,
            latest: self.latest.clone(),
            sample_count: self.samples.len(),
            ..TelemetrySummary::default()
        };
        if self.samples.is_empty() {
            return summary;
        }

        let n = self.samples.len() as f64;
        let mem_sum: f64 = self.samples.iter().map(|s| s.memory_percent).sum();
        let util_sum: f64 = self.samples.iter().map(|s| s.utilization_percent).sum();
        let mem_max = self.samples.iter().map(|s| s.memory_percent).fold(f64::MIN, f64::max);

        summary.avg_memory_percent = Some(mem_sum / n);
        summary.max_memory_percent = Some(mem_max);
        summary.avg_utilization_percent = Some(util_sum / n);
        summary
    }
}
