//! Supervisor settings file support.
//!
//! Settings live in an optional `trainwatch.toml`. Every field has a default,
//! so an empty or missing file yields the stock supervisor.

use crate::error::{Result, SupervisorError};
use crate::preflight::PreflightOptions;
use crate::telemetry::Thresholds;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use trainwatch_engine::{Augmentation, LossWeights};

/// File name looked up in the working directory by [`SupervisorSettings::discover`].
pub const SETTINGS_FILE: &str = "trainwatch.toml";

fn secs(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(fallback)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessSettings {
    /// Off when the supervisor is deliberately run without an owning
    /// process, e.g. as a container's first child.
    pub enabled: bool,
    pub interval_secs: f64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self { enabled: true, interval_secs: 10.0 }
    }
}

impl LivenessSettings {
    #[must_use]
    pub fn interval(&self) -> Duration {
        secs(self.interval_secs, Duration::from_secs(10))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub interval_secs: f64,
    pub history_capacity: usize,
    /// Memory percent above which a sample warns.
    pub memory_high_water: f64,
    /// Utilization percent below which a sample warns.
    pub utilization_low_water: f64,
    pub stop_timeout_secs: f64,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            interval_secs: 2.0,
            history_capacity: 100,
            memory_high_water: 85.0,
            utilization_low_water: 30.0,
            stop_timeout_secs: 5.0,
        }
    }
}

impl TelemetrySettings {
    #[must_use]
    pub fn interval(&self) -> Duration {
        secs(self.interval_secs, Duration::from_secs(2))
    }

    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        secs(self.stop_timeout_secs, Duration::from_secs(5))
    }

    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            memory_high_water: self.memory_high_water,
            utilization_low_water: self.utilization_low_water,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkSettings {
    pub enabled: bool,
    pub warmup: u32,
    pub num_runs: u32,
    pub batch_sizes: Vec<u32>,
    pub throughput_warmup: u32,
    pub throughput_runs: u32,
    pub realtime_fps: f64,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            warmup: 10,
            num_runs: 100,
            batch_sizes: vec![1, 4, 8, 16],
            throughput_warmup: 3,
            throughput_runs: 10,
            realtime_fps: 25.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualSettings {
    pub enabled: bool,
    pub every_n_epochs: u32,
    pub max_candidates: usize,
}

impl Default for VisualSettings {
    fn default() -> Self {
        Self { enabled: true, every_n_epochs: 5, max_candidates: 50 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub formats: Vec<String>,
}

/// Training policy forwarded to the engine with every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainSettings {
    pub augmentation: Augmentation,
    pub loss: LossWeights,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub train: TrainSettings,
    pub liveness: LivenessSettings,
    pub telemetry: TelemetrySettings,
    pub preflight: PreflightOptions,
    pub benchmark: BenchmarkSettings,
    pub visual: VisualSettings,
    pub export: ExportSettings,
}

impl SupervisorSettings {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SupervisorError::Settings(format!("{}: {}", path.display(), e)))?;
        let settings: Self = toml::from_str(&content)
            .map_err(|e| SupervisorError::Settings(format!("{}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// `./trainwatch.toml` when present, defaults otherwise.
    pub fn discover() -> Result<Self> {
        let local = PathBuf::from(SETTINGS_FILE);
        if local.is_file() { Self::load_from_file(&local) } else { Ok(Self::default()) }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("liveness.interval_secs", self.liveness.interval_secs),
            ("telemetry.interval_secs", self.telemetry.interval_secs),
            ("telemetry.stop_timeout_secs", self.telemetry.stop_timeout_secs),
            ("benchmark.realtime_fps", self.benchmark.realtime_fps),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(SupervisorError::Settings(format!("{name} must be a positive number, got {value}")));
            }
        }
        for (name, value) in [
            ("telemetry.memory_high_water", self.telemetry.memory_high_water),
            ("telemetry.utilization_low_water", self.telemetry.utilization_low_water),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(SupervisorError::Settings(format!("{name} must be within 0..=100, got {value}")));
            }
        }
        if self.telemetry.history_capacity == 0 {
            return Err(SupervisorError::Settings("telemetry.history_capacity must be at least 1".to_string()));
        }
        if self.benchmark.num_runs == 0 || self.benchmark.throughput_runs == 0 {
            return Err(SupervisorError::Settings("benchmark run counts must be at least 1".to_string()));
        }
        if self.benchmark.batch_sizes.contains(&0) {
            return Err(SupervisorError::Settings("benchmark.batch_sizes must not contain 0".to_string()));
        }
        if self.visual.every_n_epochs == 0 {
            return Err(SupervisorError::Settings("visual.every_n_epochs must be at least 1".to_string()));
        }
        self.train.augmentation.validate().map_err(|e| SupervisorError::Settings(format!("train: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SETTINGS_FILE);
        std::fs::write(&path, "").unwrap();

        let settings = SupervisorSettings::load_from_file(&path).unwrap();
        assert_eq!(settings, SupervisorSettings::default());
        assert_eq!(settings.telemetry.interval(), Duration::from_secs(2));
        assert_eq!(settings.liveness.interval(), Duration::from_secs(10));
        assert_eq!(settings.benchmark.batch_sizes, vec![1, 4, 8, 16]);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SETTINGS_FILE);
        std::fs::write(
            &path,
            r#"
[telemetry]
memory_high_water = 90.0

[benchmark]
realtime_fps = 30.0

[[preflight.dependencies]]
name = "trainer"
program = "yolo"
required = true

[export]
formats = ["onnx"]
"#,
        )
        .unwrap();

        let settings = SupervisorSettings::load_from_file(&path).unwrap();
        assert_eq!(settings.telemetry.memory_high_water, 90.0);
        assert_eq!(settings.telemetry.utilization_low_water, 30.0);
        assert_eq!(settings.benchmark.realtime_fps, 30.0);
        assert_eq!(settings.preflight.samples_per_split, 5);
        assert_eq!(settings.preflight.dependencies[0].args, vec!["--version".to_string()]);
        assert_eq!(settings.export.formats, vec!["onnx".to_string()]);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let mut settings = SupervisorSettings::default();
        settings.telemetry.memory_high_water = 120.0;
        assert!(settings.validate().is_err());

        let mut settings = SupervisorSettings::default();
        settings.telemetry.interval_secs = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = SupervisorSettings::default();
        settings.benchmark.batch_sizes = vec![1, 0];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_unparseable_file_is_settings_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SETTINGS_FILE);
        std::fs::write(&path, "[telemetry\n").unwrap();
        assert!(matches!(SupervisorSettings::load_from_file(&path), Err(SupervisorError::Settings(_))));
    }

    #[test]
    fn test_train_section_overrides_policy() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SETTINGS_FILE);
        std::fs::write(
            &path,
            r#"
[train.augmentation]
degrees = 90.0
mosaic = 0.0

[train.loss]
pose = 12.0
box = 5.0
"#,
        )
        .unwrap();

        let settings = SupervisorSettings::load_from_file(&path).unwrap();
        assert_eq!(settings.train.augmentation.degrees, 90.0);
        assert_eq!(settings.train.augmentation.mosaic, 0.0);
        assert_eq!(settings.train.augmentation.flipud, 0.5);
        assert_eq!(settings.train.loss.pose, 12.0);
        assert_eq!(settings.train.loss.box_, 5.0);
        assert_eq!(settings.train.loss.cls, LossWeights::default().cls);
    }

    #[test]
    fn test_train_section_is_validated() {
        let mut settings = SupervisorSettings::default();
        settings.train.augmentation.fliplr = 2.0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("fliplr"));
    }
}
