use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Compute device a run is pinned to.
///
/// Parsed from the launcher's `--device` value: `cpu`, `auto`, a bare ordinal
/// (`0`) or `cuda:<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    Auto,
    Cpu,
    Cuda(u32),
}

impl Device {
    /// Accelerator ordinal used for telemetry, if the run targets one.
    #[must_use]
    pub fn gpu_index(self) -> Option<u32> {
        match self {
            Self::Cuda(idx) => Some(idx),
            Self::Auto => Some(0),
            Self::Cpu => None,
        }
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::Cuda(0)
    }
}

impl FromStr for Device {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        let value = s.trim().to_lowercase();
        match value.as_str() {
            "cpu" => Ok(Self::Cpu),
            "auto" | "" => Ok(Self::Auto),
            other => {
                let ordinal = other.strip_prefix("cuda:").unwrap_or(other);
                ordinal
                    .parse::<u32>()
                    .map(Self::Cuda)
                    .map_err(|_| EngineError::InvalidConfig(format!("unrecognised device: {s}")))
            }
        }
    }
}

impl TryFrom<String> for Device {
    type Error = EngineError;

    fn try_from(value: String) -> EngineResult<Self> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(idx) => write!(f, "{idx}"),
        }
    }
}

/// Geometric and photometric augmentation knobs forwarded to the engine.
///
/// The defaults are the keypoint preset: subjects may appear at any rotation
/// and upside down, so full rotation and both flips are on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Augmentation {
    pub enabled: bool,
    pub degrees: f64,
    pub translate: f64,
    pub scale: f64,
    pub shear: f64,
    pub perspective: f64,
    pub fliplr: f64,
    pub flipud: f64,
    pub hsv_h: f64,
    pub hsv_s: f64,
    pub hsv_v: f64,
    pub mosaic: f64,
    pub close_mosaic: u32,
    pub mixup: f64,
    pub copy_paste: f64,
    pub erasing: f64,
    pub crop_fraction: f64,
}

impl Default for Augmentation {
    fn default() -> Self {
        Self {
            enabled: true,
            degrees: 180.0,
            translate: 0.1,
            scale: 0.5,
            shear: 0.0,
            perspective: 0.0,
            fliplr: 0.5,
            flipud: 0.5,
            hsv_h: 0.015,
            hsv_s: 0.7,
            hsv_v: 0.4,
            mosaic: 1.0,
            close_mosaic: 0,
            mixup: 0.0,
            copy_paste: 0.0,
            erasing: 0.4,
            crop_fraction: 1.0,
        }
    }
}

impl Augmentation {
    /// Augmentation block with every geometric transform switched off.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            degrees: 0.0,
            translate: 0.0,
            scale: 0.0,
            shear: 0.0,
            perspective: 0.0,
            fliplr: 0.0,
            flipud: 0.0,
            mosaic: 0.0,
            mixup: 0.0,
            copy_paste: 0.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(0.0..=180.0).contains(&self.degrees) {
            return Err(EngineError::InvalidConfig(format!(
                "augmentation.degrees must be within 0..=180, got {}",
                self.degrees
            )));
        }
        let probabilities = [
            ("fliplr", self.fliplr),
            ("flipud", self.flipud),
            ("mosaic", self.mosaic),
            ("mixup", self.mixup),
            ("copy_paste", self.copy_paste),
            ("erasing", self.erasing),
        ];
        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidConfig(format!(
                    "augmentation.{name} must be a probability within 0..=1, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossWeights {
    pub pose: f64,
    #[serde(rename = "box")]
    pub box_: f64,
    pub cls: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self { pose: 25.0, box_: 7.5, cls: 0.5 }
    }
}

/// Parameters of one training run, as handed to the engine's `train`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Path to the YAML data config.
    pub data: PathBuf,
    /// Base weights or model definition.
    pub model: String,
    pub epochs: u32,
    pub batch: u32,
    pub imgsz: u32,
    /// Directory holding all runs of the project.
    pub project: PathBuf,
    /// Run name inside `project`.
    pub name: String,
    pub device: Device,
    pub workers: u32,
    /// Continue from the last checkpoint, ignoring every other field.
    pub resume: bool,
    pub patience: u32,
    pub optimizer: String,
    pub cos_lr: bool,
    pub rect: bool,
    pub cache_images: bool,
    pub seed: u64,
    pub augmentation: Augmentation,
    pub loss: LossWeights,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data: PathBuf::from("data.yaml"),
            model: "yolov8s-pose.pt".to_string(),
            epochs: 120,
            batch: 8,
            imgsz: 640,
            project: PathBuf::from("runs"),
            name: "exp_auto".to_string(),
            device: Device::default(),
            workers: 0,
            resume: false,
            patience: 60,
            optimizer: "auto".to_string(),
            cos_lr: false,
            rect: false,
            cache_images: false,
            seed: 0,
            augmentation: Augmentation::default(),
            loss: LossWeights::default(),
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.model.trim().is_empty() {
            return Err(EngineError::InvalidConfig("model is required".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(EngineError::InvalidConfig("name is required".to_string()));
        }
        if self.resume {
            return Ok(());
        }
        if self.epochs == 0 {
            return Err(EngineError::InvalidConfig("epochs must be >= 1".to_string()));
        }
        if self.batch == 0 {
            return Err(EngineError::InvalidConfig("batch must be >= 1".to_string()));
        }
        if self.imgsz == 0 || self.imgsz % 32 != 0 {
            return Err(EngineError::InvalidConfig(format!(
                "imgsz must be a positive multiple of 32, got {}",
                self.imgsz
            )));
        }
        self.augmentation.validate()?;
        if [self.loss.pose, self.loss.box_, self.loss.cls].iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(EngineError::InvalidConfig("loss weights must be non-negative".to_string()));
        }
        Ok(())
    }
}
